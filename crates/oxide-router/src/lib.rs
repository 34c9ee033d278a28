//! # oxide-router
//!
//! Request-level routing for pluggable modules.
//!
//! This crate provides:
//! - Path pattern matching with `:param`, optional and wildcard routes
//! - Permission gating with an administrator bypass
//! - Per-module route tables that dispatch every matching route concurrently
//! - Block caching for cacheable route output
//! - Response state shared by all modules routing one request
//!
//! ## Quick Start
//!
//! ```ignore
//! use oxide_router::{ModuleRouteTable, Output, Request, RouteEnv, RouteOptions, SharedResponse};
//!
//! let mut table = ModuleRouteTable::new("content");
//! table.add_route("GET /content/:id", RouteOptions::new().block("content.show"), |cx| async move {
//!     let id = cx.params().get("id").unwrap_or_default().to_string();
//!     Ok(Output::content(format!("<article>{id}</article>")))
//! })?;
//!
//! let response = SharedResponse::new();
//! table.route(&Request::get("/content/42"), &response, &RouteEnv::uncached()).await?;
//! assert!(response.route_matched());
//! ```
//!
//! ## Path Patterns
//!
//! Routes are declared as `"METHOD /pattern"`:
//!
//! ```ignore
//! table.add_route("GET /posts/:post_id/comments/:comment_id?", options, handler)?;
//! ```
//!
//! A raw [`regex::Regex`] registers an always-on route that ignores the
//! method and never counts towards 404 detection:
//!
//! ```ignore
//! table.add_route(Regex::new(".*")?, RouteOptions::new().block("search.form"), handler)?;
//! ```
//!
//! ## Permissions
//!
//! ```ignore
//! let map = PermissionMap::new().grant("content:edit", "editor");
//! let options = RouteOptions::new().permit(Permit::from_map(&map, "content:edit"));
//! ```
//!
//! Denied callers get status 401, an error flash and a redirect to `/`.

mod cache;
mod error;
mod handler;
mod path;
mod permission;
mod request;
mod response;
mod state;
mod table;

pub use cache::{cache_key, BlockCache, CachedBlock, MemoryCache};
pub use error::{BoxError, Result, RouterError};
pub use handler::{handler, BoxFuture, Handler, HandlerResult, Output, RouteContext};
pub use path::{PathMatcher, RouteMatch, RouteSpec};
pub use permission::{
    Decision, PermissionGate, PermissionMap, Permit, LOGIN_REQUIRED, PERMISSION_DENIED,
};
pub use request::{Method, PathParams, Request, Session, User};
pub use response::Response;
pub use state::{Flash, RecordedError, ResponseState, SharedResponse, ADMIN_LAYOUT};
pub use table::{recorded, ModuleRouteTable, RouteEntry, RouteEnv, RouteOptions, DEFAULT_LAYOUT};
