//! # oxide-modules
//!
//! Pluggable modules with dependency-ordered init and per-request routing.
//!
//! This crate provides:
//! - The [`Module`] trait and [`ModuleDescriptor`] (dependencies, phase, jobs)
//! - A [`DependencyGraph`] that disables modules with broken dependencies
//! - An [`EventCoordinator`] releasing modules once their dependencies are done
//! - A [`ModuleRegistry`] booting every module at startup
//! - A [`RequestRouteOrchestrator`] routing requests through all modules
//! - A [`ResponseFinalizer`] rendering the result through a [`Theme`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use oxide_modules::{ModuleDescriptor, ModuleRegistry};
//! use oxide_router::{Output, Request, RouteOptions};
//!
//! let content = ModuleDescriptor::routes("content", |table| {
//!     table.add_route("GET /content/:id", RouteOptions::new(), |cx| async move {
//!         Ok(Output::content(format!("content {}", cx.params().get("id").unwrap_or_default())))
//!     })
//! });
//! let search = ModuleDescriptor::routes("search", |_| Ok(())).depends_on("content");
//!
//! let registry = ModuleRegistry::builder()
//!     .module(content)
//!     .module(search)
//!     .build()
//!     .await?;
//!
//! let response = registry.handle(Request::get("/content/42")).await;
//! ```
//!
//! ## Phases
//!
//! First-phase modules (sessions, say) route before anything else. Normal
//! modules route concurrently, each after its dependencies. Last-phase
//! modules route once every normal module is done.

mod config;
mod coordinator;
mod error;
mod event;
mod finalizer;
mod graph;
mod module;
mod orchestrator;
mod registry;

pub use config::{AppConfig, CacheConfig, ConfigError, ManifestEntry, ModuleManifest, ModuleSettings};
pub use coordinator::{EventCoordinator, ModuleTiming, StepState};
pub use error::{ModuleError, Result};
pub use event::{EventBus, EventListener, EventLog, ModuleEvent, Scope};
pub use finalizer::{BlockTheme, ResponseFinalizer, Theme};
pub use graph::{BrokenDependency, DependencyGraph, GraphNode};
pub use module::{
    InitContext, Job, JobContext, Module, ModuleContext, ModuleDescriptor, Phase, RoutesModule,
};
pub use orchestrator::{RequestRouteOrchestrator, Routed};
pub use registry::{
    BootReport, InitFailure, LoadedModule, ModuleRegistry, RegistryBuilder, STATIC_ASSETS,
};
