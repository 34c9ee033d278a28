//! The module contract and its descriptor.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use oxide_router::{
    BoxError, BoxFuture, ModuleRouteTable, Request, Result as RouterResult, RouteEnv,
    SharedResponse,
};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::event::{EventBus, ModuleEvent};
use crate::registry::ModuleRegistry;

/// When a module routes relative to the others.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Routes before every other module, e.g. session loading.
    First,
    /// Routes concurrently with other normal modules, ordered only by
    /// dependencies.
    #[default]
    Normal,
    /// Routes after every normal module finished.
    Last,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::Normal => "normal",
            Self::Last => "last",
        })
    }
}

/// Arguments of a module's init step.
pub struct InitContext {
    /// Module name.
    pub name: String,
    /// The module's empty route table, to be filled and returned.
    pub table: ModuleRouteTable,
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Event bus, for custom boot events.
    pub events: EventBus,
}

/// Arguments of a module's route step for one request.
pub struct ModuleContext<'a> {
    /// Module name.
    pub name: &'a str,
    /// The module's route table.
    pub table: &'a ModuleRouteTable,
    /// The request.
    pub request: &'a Request,
    /// Shared response state.
    pub response: &'a SharedResponse,
    /// Cache environment.
    pub env: &'a RouteEnv,
    /// The whole registry.
    pub registry: &'a ModuleRegistry,
}

impl ModuleContext<'_> {
    /// Dispatches the module's matching routes.
    pub async fn route_table(&self) -> RouterResult<()> {
        self.table.route(self.request, self.response, self.env).await
    }

    /// Emits a custom event on behalf of this module.
    pub fn emit(&self, key: impl Into<String>) {
        self.registry.events().emit(&ModuleEvent::Custom {
            module: self.name.to_string(),
            key: key.into(),
        });
    }
}

/// A pluggable unit contributing routes.
///
/// Both steps have defaults: `init` registers nothing and `route`
/// dispatches the route table.
pub trait Module: Send + Sync {
    /// Registers routes and templates. Runs once per boot, after every
    /// dependency finished its own init.
    fn init(&self, cx: InitContext) -> BoxFuture<'_, Result<ModuleRouteTable, BoxError>> {
        Box::pin(async move { Ok(cx.table) })
    }

    /// Routes one request. Runs after every dependency routed it.
    fn route<'a>(&'a self, cx: ModuleContext<'a>) -> BoxFuture<'a, RouterResult<()>> {
        Box::pin(async move { cx.route_table().await })
    }
}

/// A module whose init only registers routes.
pub struct RoutesModule<F> {
    register: F,
}

impl<F> RoutesModule<F>
where
    F: Fn(&mut ModuleRouteTable) -> RouterResult<()> + Send + Sync,
{
    /// Wraps a registration function.
    pub fn new(register: F) -> Self {
        Self { register }
    }
}

impl<F> Module for RoutesModule<F>
where
    F: Fn(&mut ModuleRouteTable) -> RouterResult<()> + Send + Sync,
{
    fn init(&self, cx: InitContext) -> BoxFuture<'_, Result<ModuleRouteTable, BoxError>> {
        let mut table = cx.table;
        let registered = (self.register)(&mut table);
        Box::pin(async move {
            registered?;
            Ok(table)
        })
    }
}

/// Arguments of a job run.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Owning module.
    pub module: String,
    /// Job name.
    pub job: String,
    /// Caller supplied arguments.
    pub args: serde_json::Value,
}

/// A named background function of a module, run by a scheduler.
pub type Job = Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Everything the registry knows about a module before boot.
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// Unique name.
    pub name: String,
    /// Whether the module is enabled, before configuration overrides.
    pub enabled: bool,
    /// Modules that must finish init and route before this one.
    pub depends: Vec<String>,
    /// Execution phase.
    pub phase: Phase,
    /// Implementation.
    pub module: Arc<dyn Module>,
    /// Named jobs.
    pub jobs: BTreeMap<String, Job>,
}

impl ModuleDescriptor {
    /// Creates an enabled, normal-phase descriptor.
    pub fn new(name: impl Into<String>, module: impl Module + 'static) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            depends: Vec::new(),
            phase: Phase::Normal,
            module: Arc::new(module),
            jobs: BTreeMap::new(),
        }
    }

    /// Creates a descriptor whose init registers routes with `register`.
    pub fn routes<F>(name: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut ModuleRouteTable) -> RouterResult<()> + Send + Sync + 'static,
    {
        Self::new(name, RoutesModule::new(register))
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.depends.push(module.into());
        self
    }

    /// Runs the module in the first phase.
    #[must_use]
    pub fn first(mut self) -> Self {
        self.phase = Phase::First;
        self
    }

    /// Runs the module in the last phase.
    #[must_use]
    pub fn last(mut self) -> Self {
        self.phase = Phase::Last;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a job.
    #[must_use]
    pub fn job<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.jobs
            .insert(name.into(), Arc::new(move |cx| Box::pin(f(cx))));
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("depends", &self.depends)
            .field("phase", &self.phase)
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
