//! Per-request driver of module routing.
//!
//! A request goes through first-phase modules, then every normal module
//! gated by its dependencies, then last-phase modules, and is finalized
//! once. Each phase is one coordinated step; a phase starts only after the
//! previous one completed.

use std::time::Duration;

use oxide_router::{recorded, RecordedError, Request, Response, SharedResponse};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::coordinator::{EventCoordinator, ModuleTiming};
use crate::error::Result;
use crate::event::Scope;
use crate::finalizer::ResponseFinalizer;
use crate::module::{ModuleContext, Phase};
use crate::registry::ModuleRegistry;

/// Attribution of failures that belong to no single module.
const ORCHESTRATOR: &str = "router";

/// A finalized request.
#[derive(Debug)]
pub struct Routed {
    /// The response to send.
    pub response: Response,
    /// Route step timings of every module that ran.
    pub timings: Vec<ModuleTiming>,
    /// Time from arrival to finalized response.
    pub elapsed: Duration,
}

/// Routes requests through the modules of a registry.
#[derive(Debug, Clone, Copy)]
pub struct RequestRouteOrchestrator<'r> {
    registry: &'r ModuleRegistry,
}

impl<'r> RequestRouteOrchestrator<'r> {
    /// Creates an orchestrator over `registry`.
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Routes a request and returns only the response.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        self.route(request).await.map(|routed| routed.response)
    }

    /// Routes a request through every phase and finalizes it.
    ///
    /// Static assets are not routed and yield `None`.
    pub async fn route(&self, request: Request) -> Option<Routed> {
        let started = Instant::now();
        if self.registry.is_static_asset(&request.path) {
            debug!(path = %request.path, "static asset, not routed");
            return None;
        }

        let response = SharedResponse::new();
        let mut timings = Vec::new();
        for phase in [Phase::First, Phase::Normal, Phase::Last] {
            if let Err(e) = self
                .run_phase(phase, &request, &response, &mut timings)
                .await
            {
                error!(%phase, error = %e, "phase did not complete");
                response.record_error(RecordedError {
                    module: ORCHESTRATOR.to_string(),
                    message: e.to_string(),
                    stack: Vec::new(),
                });
            }
        }

        let config = self.registry.config();
        let response =
            ResponseFinalizer::new(config, self.registry.theme(), &request, response)
                .finalize()
                .await;
        let elapsed = started.elapsed();
        info!(
            method = request.method.as_str(),
            path = %request.path,
            status = response.status,
            reason = response.status_text(),
            redirect = response.is_redirect(),
            ?elapsed,
            "request routed"
        );
        Some(Routed {
            response,
            timings,
            elapsed,
        })
    }

    async fn run_phase(
        &self,
        phase: Phase,
        request: &Request,
        response: &SharedResponse,
        timings: &mut Vec<ModuleTiming>,
    ) -> Result<()> {
        let graph = self.registry.graph();
        let mut coordinator = EventCoordinator::new(
            Scope::Request,
            graph,
            graph.enabled_in(phase),
            self.registry.events().clone(),
        );
        let deadline = self.registry.config().route_timeout();
        let this = *self;
        let outcome = coordinator
            .run(
                move |name| {
                    Box::pin(this.route_module(name.to_string(), request, response, deadline))
                },
                |_, failure| failure,
            )
            .await;
        timings.extend(coordinator.timings());
        outcome?;

        if coordinator.take_completion() {
            debug!(%phase, path = %request.path, "phase complete");
        }
        Ok(())
    }

    /// Routes one module. Returns its failure message, if any.
    async fn route_module(
        self,
        name: String,
        request: &Request,
        response: &SharedResponse,
        deadline: Duration,
    ) -> Option<String> {
        let Some(loaded) = self.registry.module(&name) else {
            return Some(format!("unknown module `{name}`"));
        };
        let cx = ModuleContext {
            name: &name,
            table: loaded.table(),
            request,
            response,
            env: self.registry.env(),
            registry: self.registry,
        };
        match tokio::time::timeout(deadline, loaded.module().route(cx)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                response.record_error(recorded(&name, &e));
                Some(e.to_string())
            }
            Err(_) => {
                error!(module = %name, ?deadline, "module route timed out");
                Some(format!("route timed out after {deadline:?}"))
            }
        }
    }
}
