//! The module registry: descriptors, graph, route tables and collaborators.
//!
//! Built once at boot and passed by reference into every request. Request
//! handling only reads it; [`ModuleRegistry::reload`] replaces it wholesale.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use oxide_router::{
    BlockCache, BoxFuture, MemoryCache, ModuleRouteTable, Request, Response, RouteEnv, RouterError,
};
use regex::Regex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::coordinator::EventCoordinator;
use crate::error::{ModuleError, Result};
use crate::event::{EventBus, EventListener, Scope};
use crate::finalizer::{BlockTheme, Theme};
use crate::graph::{BrokenDependency, DependencyGraph, GraphNode};
use crate::module::{InitContext, JobContext, Module, ModuleDescriptor};
use crate::orchestrator::RequestRouteOrchestrator;

/// Paths served as static files, never routed through modules.
pub const STATIC_ASSETS: &str = r"^/images|^/js|^/css|^/favicon\.ico|png$|jpg$|gif$|css$|js$";

/// A module's init step that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    /// Module name.
    pub module: String,
    /// Failure message.
    pub message: String,
}

/// Outcome of a boot.
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    /// Enabled modules in init order.
    pub order: Vec<String>,
    /// Modules whose init failed. They stay enabled with no routes.
    pub failures: Vec<InitFailure>,
    /// Modules disabled by the dependency graph.
    pub diagnostics: Vec<BrokenDependency>,
    /// Wall time of the boot.
    pub elapsed: Duration,
}

/// A module after boot.
#[derive(Debug)]
pub struct LoadedModule {
    descriptor: ModuleDescriptor,
    enabled: bool,
    table: ModuleRouteTable,
}

impl LoadedModule {
    /// Returns the descriptor.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Returns whether the module survived configuration and validation.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the route table filled by init.
    pub fn table(&self) -> &ModuleRouteTable {
        &self.table
    }

    /// Returns the implementation.
    pub fn module(&self) -> &dyn Module {
        self.descriptor.module.as_ref()
    }
}

/// Builder for [`ModuleRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    config: AppConfig,
    descriptors: Vec<ModuleDescriptor>,
    listeners: Vec<Arc<dyn EventListener>>,
    cache: Option<Arc<dyn BlockCache>>,
    theme: Option<Arc<dyn Theme>>,
}

impl RegistryBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a module.
    #[must_use]
    pub fn module(mut self, descriptor: ModuleDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Adds an event listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sets the block cache used when caching is enabled. Defaults to a
    /// [`MemoryCache`].
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn BlockCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the theme. Defaults to [`BlockTheme`].
    #[must_use]
    pub fn theme(mut self, theme: Arc<dyn Theme>) -> Self {
        self.theme = Some(theme);
        self
    }

    /// Validates the modules and runs every enabled module's init.
    pub async fn build(self) -> Result<ModuleRegistry> {
        let theme = self.theme.unwrap_or_else(|| Arc::new(BlockTheme));
        ModuleRegistry::assemble(
            self.config,
            self.descriptors,
            EventBus::new(self.listeners),
            self.cache,
            theme,
        )
        .await
    }
}

/// Every module of the application, booted.
pub struct ModuleRegistry {
    config: Arc<AppConfig>,
    modules: BTreeMap<String, LoadedModule>,
    graph: DependencyGraph,
    events: EventBus,
    cache: Option<Arc<dyn BlockCache>>,
    env: RouteEnv,
    theme: Arc<dyn Theme>,
    assets: Regex,
    report: BootReport,
}

impl ModuleRegistry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    async fn assemble(
        config: AppConfig,
        descriptors: Vec<ModuleDescriptor>,
        events: EventBus,
        cache: Option<Arc<dyn BlockCache>>,
        theme: Arc<dyn Theme>,
    ) -> Result<Self> {
        let started = Instant::now();
        config.validate()?;
        let config = Arc::new(config);

        let mut seen = BTreeSet::new();
        for desc in &descriptors {
            if !seen.insert(desc.name.as_str()) {
                return Err(ModuleError::DuplicateModule(desc.name.clone()));
            }
        }

        let graph = DependencyGraph::build(descriptors.iter().map(|desc| GraphNode {
            name: desc.name.clone(),
            enabled: config.module_enabled(&desc.name, desc.enabled),
            depends: desc.depends.clone(),
            phase: desc.phase,
        }));

        let env = if config.cache.enabled {
            let store = cache
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryCache::new()));
            RouteEnv::cached(store, config.cache_ttl())
        } else {
            RouteEnv::uncached()
        };
        let assets =
            Regex::new(STATIC_ASSETS).map_err(|e| RouterError::InvalidPattern(e.to_string()))?;

        let (mut tables, failures) = boot(&config, &descriptors, &graph, &events).await?;
        let modules = descriptors
            .into_iter()
            .map(|descriptor| {
                let name = descriptor.name.clone();
                let enabled = graph.is_enabled(&name);
                let table = tables
                    .remove(&name)
                    .unwrap_or_else(|| ModuleRouteTable::new(name.as_str()));
                (
                    name,
                    LoadedModule {
                        descriptor,
                        enabled,
                        table,
                    },
                )
            })
            .collect();

        let report = BootReport {
            order: graph.boot_order().to_vec(),
            failures,
            diagnostics: graph.diagnostics().to_vec(),
            elapsed: started.elapsed(),
        };
        info!(
            enabled = graph.enabled().count(),
            disabled = graph.disabled().count(),
            failed = report.failures.len(),
            elapsed = ?report.elapsed,
            "modules booted"
        );

        Ok(Self {
            config,
            modules,
            graph,
            events,
            cache,
            env,
            theme,
            assets,
            report,
        })
    }

    /// Rebuilds the registry from the same modules with a new configuration.
    ///
    /// On failure the current registry is left untouched.
    pub async fn reload(&mut self, config: AppConfig) -> Result<()> {
        info!("reloading modules");
        let descriptors = self
            .modules
            .values()
            .map(|m| m.descriptor.clone())
            .collect();
        *self = Self::assemble(
            config,
            descriptors,
            self.events.clone(),
            self.cache.clone(),
            Arc::clone(&self.theme),
        )
        .await?;
        Ok(())
    }

    /// Routes a request. Returns `None` for static assets, which are
    /// served elsewhere.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        RequestRouteOrchestrator::new(self).handle(request).await
    }

    /// Runs a job of an enabled module.
    pub async fn run_job(&self, module: &str, job: &str, args: serde_json::Value) -> Result<()> {
        let loaded = self
            .modules
            .get(module)
            .ok_or_else(|| ModuleError::UnknownModule(module.to_string()))?;
        if !loaded.enabled {
            return Err(ModuleError::ModuleDisabled(module.to_string()));
        }
        let run = loaded
            .descriptor
            .jobs
            .get(job)
            .ok_or_else(|| ModuleError::UnknownJob {
                module: module.to_string(),
                job: job.to_string(),
            })?;

        info!(module, job, "running job");
        let cx = JobContext {
            module: module.to_string(),
            job: job.to_string(),
            args,
        };
        run(cx).await.map_err(|e| {
            error!(module, job, error = %e, "job failed");
            ModuleError::Job {
                module: module.to_string(),
                job: job.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the validated dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns the event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the cache environment of route dispatch.
    pub fn env(&self) -> &RouteEnv {
        &self.env
    }

    /// Returns the theme.
    pub fn theme(&self) -> &dyn Theme {
        self.theme.as_ref()
    }

    /// Returns the outcome of the last boot.
    pub fn report(&self) -> &BootReport {
        &self.report
    }

    /// Looks up a module, enabled or not.
    pub fn module(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.get(name)
    }

    /// Returns every module by name.
    pub fn modules(&self) -> impl Iterator<Item = &LoadedModule> {
        self.modules.values()
    }

    /// Returns whether `path` is a static asset.
    pub fn is_static_asset(&self, path: &str) -> bool {
        self.assets.is_match(path)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("config", &self.config)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

type InitOutcome = std::result::Result<ModuleRouteTable, String>;

/// Runs the init step of every enabled module in dependency order.
async fn boot(
    config: &Arc<AppConfig>,
    descriptors: &[ModuleDescriptor],
    graph: &DependencyGraph,
    events: &EventBus,
) -> Result<(BTreeMap<String, ModuleRouteTable>, Vec<InitFailure>)> {
    let modules: BTreeMap<&str, Arc<dyn Module>> = descriptors
        .iter()
        .map(|d| (d.name.as_str(), Arc::clone(&d.module)))
        .collect();
    let deadline = config.init_timeout();
    let mut tables = BTreeMap::new();
    let mut failures = Vec::new();

    let mut coordinator = EventCoordinator::new(Scope::Boot, graph, graph.enabled(), events.clone());
    coordinator
        .run(
            |name| -> BoxFuture<'static, InitOutcome> {
                let module = modules.get(name).cloned();
                let cx = InitContext {
                    name: name.to_string(),
                    table: ModuleRouteTable::new(name),
                    config: Arc::clone(config),
                    events: events.clone(),
                };
                Box::pin(async move {
                    let Some(module) = module else {
                        return Err("no descriptor".to_string());
                    };
                    match tokio::time::timeout(deadline, module.init(cx)).await {
                        Ok(Ok(table)) => Ok(table),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("init timed out after {deadline:?}")),
                    }
                })
            },
            |name, outcome| match outcome {
                Ok(table) => {
                    tables.insert(name.to_string(), table);
                    None
                }
                Err(message) => {
                    warn!(module = name, error = %message, "module init failed");
                    failures.push(InitFailure {
                        module: name.to_string(),
                        message: message.clone(),
                    });
                    Some(message)
                }
            },
        )
        .await?;

    Ok((tables, failures))
}
