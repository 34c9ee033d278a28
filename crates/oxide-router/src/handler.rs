//! Route handler contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::request::{PathParams, Request};
use crate::state::SharedResponse;

/// A boxed future for async routing operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler produced for its block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Rendered fragment, stored under the route's block id.
    pub content: Option<String>,
    /// Layout override.
    pub layout: Option<String>,
}

impl Output {
    /// Nothing to render; the handler only touched the response state.
    pub fn none() -> Self {
        Self::default()
    }

    /// A rendered fragment.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            layout: None,
        }
    }

    /// Sets a layout override.
    #[must_use]
    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }
}

/// Arguments of a single handler dispatch.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Owning module.
    pub module: String,
    /// The request, with `params` set for the matched route.
    pub request: Request,
    /// Shared response state of the request.
    pub response: SharedResponse,
    /// Block id the output is stored under.
    pub block: String,
    /// Source of the route's template, if it declared one.
    pub template: Option<Arc<str>>,
    /// Whether the matched route is a raw regex route.
    pub is_wildcard: bool,
}

impl RouteContext {
    /// Shortcut for `self.request.params`.
    pub fn params(&self) -> &PathParams {
        &self.request.params
    }
}

/// Result of a handler.
pub type HandlerResult = Result<Output, BoxError>;

/// A boxed async route handler.
pub type Handler = Arc<dyn Fn(RouteContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Boxes an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |cx| Box::pin(f(cx)))
}
