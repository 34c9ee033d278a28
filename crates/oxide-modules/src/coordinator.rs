//! Dependency-driven release of module steps.
//!
//! One coordinator tracks one set of participating modules through a single
//! step: init at boot, or route for one request. A module is released once
//! every participating dependency is done; completing a module notifies its
//! dependents, which may release them in turn. Released modules are queued
//! rather than started recursively, so a cascade is a plain loop.

use std::collections::{BTreeMap, VecDeque};

use futures::stream::{FuturesUnordered, StreamExt};
use oxide_router::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{ModuleError, Result};
use crate::event::{EventBus, ModuleEvent, Scope};
use crate::graph::DependencyGraph;

/// Where a module stands in the coordinated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Waiting for dependencies.
    Pending,
    /// Dependencies done, queued to run.
    Satisfied,
    /// Released and running.
    Running,
    /// Finished, with or without error.
    Done,
}

/// Start and finish of one module's step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTiming {
    /// Module name.
    pub module: String,
    /// When the module was released.
    pub started_at: Option<Instant>,
    /// When the module completed.
    pub finished_at: Option<Instant>,
    /// Failure message, if the step failed or timed out.
    pub error: Option<String>,
}

#[derive(Debug)]
struct Tracker {
    state: StepState,
    check: BTreeMap<String, bool>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl Tracker {
    fn satisfied(&self) -> bool {
        self.check.values().all(|done| *done)
    }
}

/// Tracks one coordinated step over a set of modules.
#[derive(Debug)]
pub struct EventCoordinator {
    scope: Scope,
    trackers: BTreeMap<String, Tracker>,
    notify: BTreeMap<String, Vec<String>>,
    ready: VecDeque<String>,
    done: usize,
    latched: bool,
    events: EventBus,
}

impl EventCoordinator {
    /// Creates a coordinator over `participants`.
    ///
    /// Only dependencies that also participate are waited for. A dependency
    /// outside the set, such as a first-phase module during the normal
    /// phase, already ran and counts as done.
    pub fn new<'g>(
        scope: Scope,
        graph: &DependencyGraph,
        participants: impl IntoIterator<Item = &'g str>,
        events: EventBus,
    ) -> Self {
        let names: Vec<&str> = participants.into_iter().collect();
        let mut trackers = BTreeMap::new();
        for name in &names {
            let check = graph
                .dependencies(name)
                .iter()
                .filter(|dep| names.contains(&dep.as_str()))
                .map(|dep| (dep.clone(), false))
                .collect();
            trackers.insert(
                (*name).to_string(),
                Tracker {
                    state: StepState::Pending,
                    check,
                    started_at: None,
                    finished_at: None,
                    error: None,
                },
            );
        }

        let notify = names
            .iter()
            .map(|name| {
                let dependents = graph
                    .dependents(name)
                    .iter()
                    .filter(|d| trackers.contains_key(d.as_str()))
                    .cloned()
                    .collect();
                ((*name).to_string(), dependents)
            })
            .collect();

        let mut ready = VecDeque::new();
        for (name, tracker) in &mut trackers {
            if tracker.satisfied() {
                tracker.state = StepState::Satisfied;
                ready.push_back(name.clone());
            }
        }

        Self {
            scope,
            trackers,
            notify,
            ready,
            done: 0,
            latched: false,
            events,
        }
    }

    /// Releases the next satisfied module, marking it running.
    pub fn next_ready(&mut self) -> Option<String> {
        let name = self.ready.pop_front()?;
        if let Some(tracker) = self.trackers.get_mut(&name) {
            tracker.state = StepState::Running;
            tracker.started_at = Some(Instant::now());
        }
        debug!(scope = %self.scope, module = %name, "module released");
        self.events.emit(&ModuleEvent::Pre {
            scope: self.scope,
            module: name.clone(),
        });
        Some(name)
    }

    /// Marks a running module done and notifies its dependents.
    ///
    /// Returns how many dependents became satisfied.
    pub fn complete(&mut self, name: &str, error: Option<String>) -> Result<usize> {
        let tracker = self
            .trackers
            .get_mut(name)
            .ok_or_else(|| ModuleError::InvalidTransition {
                module: name.to_string(),
                reason: "not a participant".to_string(),
            })?;
        if tracker.state != StepState::Running {
            return Err(ModuleError::InvalidTransition {
                module: name.to_string(),
                reason: format!("state is {:?}, not Running", tracker.state),
            });
        }
        tracker.state = StepState::Done;
        tracker.finished_at = Some(Instant::now());
        tracker.error = error;
        self.done += 1;
        self.events.emit(&ModuleEvent::Post {
            scope: self.scope,
            module: name.to_string(),
        });

        let mut released = 0;
        for dependent in self.notify.get(name).into_iter().flatten() {
            let Some(tracker) = self.trackers.get_mut(dependent) else {
                continue;
            };
            if let Some(done) = tracker.check.get_mut(name) {
                *done = true;
            }
            if tracker.state == StepState::Pending && tracker.satisfied() {
                tracker.state = StepState::Satisfied;
                self.ready.push_back(dependent.clone());
                released += 1;
            }
        }
        Ok(released)
    }

    /// Returns whether every participant is done.
    pub fn is_complete(&self) -> bool {
        self.done == self.trackers.len()
    }

    /// Returns `true` the first time it is called on a complete step, and
    /// `false` ever after.
    pub fn take_completion(&mut self) -> bool {
        if self.latched || !self.is_complete() {
            return false;
        }
        self.latched = true;
        true
    }

    /// Returns the state of `module`.
    pub fn state(&self, module: &str) -> Option<StepState> {
        self.trackers.get(module).map(|t| t.state)
    }

    /// Returns the modules that are not done yet.
    pub fn pending(&self) -> Vec<String> {
        self.trackers
            .iter()
            .filter(|(_, t)| t.state != StepState::Done)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns per-module timings.
    pub fn timings(&self) -> Vec<ModuleTiming> {
        self.trackers
            .iter()
            .map(|(name, t)| ModuleTiming {
                module: name.clone(),
                started_at: t.started_at,
                finished_at: t.finished_at,
                error: t.error.clone(),
            })
            .collect()
    }

    /// Drives the step to completion.
    ///
    /// `start` builds the step future of a released module; all released
    /// steps are polled concurrently. `finish` turns a step's output into
    /// the module's failure message, if any.
    pub async fn run<'a, T, S, F>(&mut self, mut start: S, mut finish: F) -> Result<()>
    where
        S: FnMut(&str) -> BoxFuture<'a, T>,
        F: FnMut(&str, T) -> Option<String>,
    {
        let mut running = FuturesUnordered::new();
        loop {
            while let Some(name) = self.next_ready() {
                let step = start(&name);
                running.push(async move { (name, step.await) });
            }
            let Some((name, output)) = running.next().await else {
                break;
            };
            let failure = finish(&name, output);
            self.complete(&name, failure)?;
        }

        if self.is_complete() {
            Ok(())
        } else {
            let pending = self.pending();
            error!(scope = %self.scope, ?pending, "modules never became ready");
            Err(ModuleError::Stalled { pending })
        }
    }
}
