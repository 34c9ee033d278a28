//! Per-module route table.
//!
//! Every route of a module whose pattern matches the request is dispatched;
//! matching is fan-out, not first-match-wins, so several modules and several
//! routes of one module can contribute fragments to the same page.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::cache::{cache_key, BlockCache, CachedBlock};
use crate::error::{Result, RouterError};
use crate::handler::{handler, Handler, HandlerResult, Output, RouteContext};
use crate::path::{PathMatcher, RouteMatch, RouteSpec};
use crate::permission::{PermissionGate, Permit};
use crate::request::Request;
use crate::state::{RecordedError, SharedResponse};

/// Layout name used in cache keys when no override is set.
pub const DEFAULT_LAYOUT: &str = "default";

/// Options of a registered route.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Admin route: gated for non-administrators, rendered in the admin layout.
    pub admin: bool,
    /// Permission predicate.
    pub permit: Option<Permit>,
    /// Whether the block output may be cached.
    pub cache: bool,
    /// Block id the output is stored under. Defaults to the module name.
    pub block: Option<String>,
    /// Template the handler renders with.
    pub template: Option<String>,
}

impl RouteOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the route as an admin route.
    #[must_use]
    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Sets the permission predicate.
    #[must_use]
    pub fn permit(mut self, permit: Permit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Allows caching of the block output.
    #[must_use]
    pub fn cache(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Sets the block id.
    #[must_use]
    pub fn block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    /// Sets the template name.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// The permit actually enforced: the configured one, or admin-only for
    /// admin routes without one.
    fn effective_permit(&self) -> Option<Permit> {
        self.permit
            .clone()
            .or_else(|| self.admin.then(Permit::admin_only))
    }
}

/// One registered route.
#[derive(Clone)]
pub struct RouteEntry {
    /// Compiled path specification.
    pub matcher: PathMatcher,
    /// Route options.
    pub options: RouteOptions,
    handler: Handler,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("matcher", &self.matcher.source())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Request-independent collaborators of a routing pass.
#[derive(Clone)]
pub struct RouteEnv {
    /// Block cache; `None` disables caching globally.
    pub cache: Option<Arc<dyn BlockCache>>,
    /// Lifetime of cached blocks.
    pub cache_ttl: Duration,
}

impl RouteEnv {
    /// An environment without caching.
    pub fn uncached() -> Self {
        Self {
            cache: None,
            cache_ttl: Duration::ZERO,
        }
    }

    /// An environment caching blocks in `cache` for `ttl`.
    pub fn cached(cache: Arc<dyn BlockCache>, ttl: Duration) -> Self {
        Self {
            cache: Some(cache),
            cache_ttl: ttl,
        }
    }
}

impl Default for RouteEnv {
    fn default() -> Self {
        Self::uncached()
    }
}

/// The ordered routes and templates of one module.
#[derive(Debug, Clone)]
pub struct ModuleRouteTable {
    module: String,
    routes: Vec<RouteEntry>,
    templates: HashMap<String, Arc<str>>,
}

impl ModuleRouteTable {
    /// Creates an empty table for `module`.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            routes: Vec::new(),
            templates: HashMap::new(),
        }
    }

    /// Registers a route. Registration order is preserved.
    pub fn add_route<F, Fut>(
        &mut self,
        spec: impl Into<RouteSpec>,
        options: RouteOptions,
        f: F,
    ) -> Result<()>
    where
        F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_handler(spec, options, handler(f))
    }

    /// Registers an already boxed handler.
    pub fn add_handler(
        &mut self,
        spec: impl Into<RouteSpec>,
        options: RouteOptions,
        handler: Handler,
    ) -> Result<()> {
        let matcher = PathMatcher::compile(spec)?;
        debug!(module = %self.module, route = matcher.source(), "route registered");
        self.routes.push(RouteEntry {
            matcher,
            options,
            handler,
        });
        Ok(())
    }

    /// Registers a precompiled template.
    pub fn add_template(&mut self, name: impl Into<String>, source: impl Into<Arc<str>>) {
        self.templates.insert(name.into(), source.into());
    }

    /// Returns the owning module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Returns the routes in registration order.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Returns the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches every matching route and waits for all of them.
    ///
    /// Each dispatch completes exactly once whatever happens to it. Sibling
    /// routes still run when one fails. After the join, the failure of the
    /// earliest registered route is returned, annotated with the module
    /// name, however late it finished; the others are only recorded on the
    /// response.
    pub async fn route(
        &self,
        request: &Request,
        response: &SharedResponse,
        env: &RouteEnv,
    ) -> Result<()> {
        let dispatches = self.routes.iter().filter_map(|entry| {
            let matched = entry.matcher.match_request(request)?;
            Some(self.dispatch(entry, matched, request, response, env))
        });

        let mut first_error = None;
        for result in join_all(dispatches).await {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn dispatch(
        &self,
        entry: &RouteEntry,
        matched: RouteMatch,
        request: &Request,
        response: &SharedResponse,
        env: &RouteEnv,
    ) -> Result<()> {
        let options = &entry.options;
        if !matched.is_wildcard {
            response.mark_matched(options.admin);
        }

        let permit = options.effective_permit();
        if permit.is_some() {
            let decision = PermissionGate::check(permit.as_ref(), &request.session);
            if !decision.allow {
                warn!(
                    module = %self.module,
                    route = entry.matcher.source(),
                    path = %request.path,
                    "permission denied"
                );
                response.flash("error", decision.message);
                response.set_status(401);
                response.redirect("/");
                return Ok(());
            }
        }

        let template = match &options.template {
            Some(name) => match self.templates.get(name) {
                Some(source) => Some(Arc::clone(source)),
                None => {
                    let err = RouterError::MissingTemplate {
                        module: self.module.clone(),
                        template: name.clone(),
                    };
                    self.fail(response, &err);
                    return Err(err);
                }
            },
            None => None,
        };

        let block = options.block.clone().unwrap_or_else(|| self.module.clone());
        let cx = RouteContext {
            module: self.module.clone(),
            request: request.with_params(matched.params),
            response: response.clone(),
            block: block.clone(),
            template,
            is_wildcard: matched.is_wildcard,
        };

        let cache = match (&options.block, &env.cache) {
            (Some(_), Some(cache)) if options.cache && !request.session.is_admin() => Some(cache),
            _ => None,
        };
        let Some(cache) = cache else {
            let output = self.invoke(entry, cx).await?;
            apply(response, &block, &output);
            return Ok(());
        };

        let layout = response
            .layout()
            .unwrap_or_else(|| DEFAULT_LAYOUT.to_string());
        let key = cache_key(&layout, &block, &cx.request.params);
        match lookup(cache.as_ref(), &key).await {
            Ok(Some(hit)) => {
                debug!(module = %self.module, key = %key, "block cache hit");
                apply(
                    response,
                    &block,
                    &Output {
                        content: Some(hit.content),
                        layout: hit.layout,
                    },
                );
                return Ok(());
            }
            Ok(None) => debug!(module = %self.module, key = %key, "block cache miss"),
            Err(e) => warn!(module = %self.module, key = %key, error = %e, "block cache lookup failed"),
        }

        let output = self.invoke(entry, cx).await?;
        if let Some(content) = &output.content {
            let value = CachedBlock {
                content: content.clone(),
                layout: output.layout.clone(),
            };
            if let Err(e) = cache.set(&key, value, env.cache_ttl).await {
                warn!(module = %self.module, key = %key, error = %e, "block cache store failed");
            }
        }
        apply(response, &block, &output);
        Ok(())
    }

    async fn invoke(&self, entry: &RouteEntry, cx: RouteContext) -> Result<Output> {
        let response = cx.response.clone();
        match (entry.handler)(cx).await {
            Ok(output) => Ok(output),
            Err(e) => {
                let err = RouterError::handler(&self.module, &*e);
                self.fail(&response, &err);
                Err(err)
            }
        }
    }

    fn fail(&self, response: &SharedResponse, err: &RouterError) {
        error!(module = %self.module, error = %err, "route dispatch failed");
        response.record_error(recorded(&self.module, err));
    }
}

/// Converts a routing failure into the form kept on the response.
pub fn recorded(module: &str, err: &RouterError) -> RecordedError {
    match err {
        RouterError::Handler {
            module,
            message,
            stack,
        } => RecordedError {
            module: module.clone(),
            message: message.clone(),
            stack: stack.clone(),
        },
        other => RecordedError {
            module: other.module().unwrap_or(module).to_string(),
            message: other.to_string(),
            stack: Vec::new(),
        },
    }
}

async fn lookup(cache: &dyn BlockCache, key: &str) -> Result<Option<CachedBlock>> {
    if cache.check(key).await? {
        cache.get(key).await
    } else {
        Ok(None)
    }
}

fn apply(response: &SharedResponse, block: &str, output: &Output) {
    if let Some(content) = &output.content {
        response.render_block(block, content);
    }
    if let Some(layout) = &output.layout {
        response.set_layout(layout.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use regex::Regex;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::permission::{PermissionMap, LOGIN_REQUIRED};
    use crate::request::User;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting_table(hits: &Arc<AtomicUsize>, routes: &[(&str, bool)]) -> ModuleRouteTable {
        let mut table = ModuleRouteTable::new("content");
        for (i, (spec, fail)) in routes.iter().enumerate() {
            let hits = Arc::clone(hits);
            let fail = *fail;
            table
                .add_route(*spec, RouteOptions::new(), move |_cx| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        if fail {
                            Err(format!("handler {i} exploded").into())
                        } else {
                            Ok(Output::content("x"))
                        }
                    }
                })
                .unwrap();
        }
        table
    }

    #[tokio::test]
    async fn test_no_match_completes_cleanly() {
        let hits = counter();
        let table = counting_table(&hits, &[("GET /a", false)]);
        let res = SharedResponse::new();
        table
            .route(&Request::get("/b"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!res.route_matched());
    }

    #[tokio::test]
    async fn test_all_matches_fire() {
        let hits = counter();
        let table = counting_table(
            &hits,
            &[("GET /page", false), ("GET /:any", false), ("GET /other", false)],
        );
        let res = SharedResponse::new();
        table
            .route(&Request::get("/page"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(res.snapshot().blocks["content"], "xx");
    }

    #[tokio::test]
    async fn test_errors_do_not_hang_the_join() {
        let hits = counter();
        let table = counting_table(
            &hits,
            &[("GET /page", true), ("GET /page", false), ("GET /page", true)],
        );
        let res = SharedResponse::new();
        let err = table
            .route(&Request::get("/page"), &res, &RouteEnv::uncached())
            .await
            .unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(err.module(), Some("content"));
        assert_eq!(res.status(), 500);
        assert_eq!(res.snapshot().errors.len(), 2);
    }

    #[tokio::test]
    async fn test_wildcard_does_not_count_as_match() {
        let mut table = ModuleRouteTable::new("search");
        table
            .add_route(Regex::new(".*").unwrap(), RouteOptions::new(), |_cx| async {
                Ok(Output::content("search box"))
            })
            .unwrap();
        let res = SharedResponse::new();
        table
            .route(&Request::get("/whatever"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        assert!(!res.route_matched());
        assert_eq!(res.snapshot().blocks["search"], "search box");
    }

    #[tokio::test]
    async fn test_admin_route_denies_anonymous() {
        let hits = counter();
        let mut table = ModuleRouteTable::new("admin");
        let seen = Arc::clone(&hits);
        table
            .add_route("GET /admin", RouteOptions::new().admin(), move |_cx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(Output::none()) }
            })
            .unwrap();

        let res = SharedResponse::new();
        table
            .route(&Request::get("/admin"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        let state = res.snapshot();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(state.status, 401);
        assert_eq!(state.redirect.as_deref(), Some("/"));
        assert_eq!(state.flash[0].kind, "error");

        let res = SharedResponse::new();
        table
            .route(
                &Request::get("/admin").user(User::admin("root")),
                &res,
                &RouteEnv::uncached(),
            )
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(res.status(), 200);
        assert_eq!(res.layout().as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_denied_admin_route_leaves_sibling_output() {
        let hits = counter();
        let mut table = ModuleRouteTable::new("content");
        let seen = Arc::clone(&hits);
        table
            .add_route("GET /page", RouteOptions::new().admin(), move |_cx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(Output::content("edit controls")) }
            })
            .unwrap();
        table
            .add_route("GET /page", RouteOptions::new(), |_cx| async {
                Ok(Output::content("public"))
            })
            .unwrap();

        let res = SharedResponse::new();
        table
            .route(&Request::get("/page"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        let state = res.snapshot();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(state.status, 401);
        assert_eq!(state.redirect.as_deref(), Some("/"));
        assert_eq!(state.flash[0].message, LOGIN_REQUIRED);
        assert_eq!(state.blocks["content"], "public");
        assert!(state.errors.is_empty());
    }

    #[tokio::test]
    async fn test_permission_map_gates_by_role() {
        let hits = counter();
        let map = PermissionMap::new().grant("edit posts", "editor");
        let mut table = ModuleRouteTable::new("content");
        let seen = Arc::clone(&hits);
        table
            .add_route(
                "POST /post/:id",
                RouteOptions::new().permit(Permit::from_map(&map, "edit posts")),
                move |_cx| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Output::content("saved")) }
                },
            )
            .unwrap();

        let res = SharedResponse::new();
        let editor = Request::post("/post/3").user(User::new("ed").role("editor"));
        table.route(&editor, &res, &RouteEnv::uncached()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(res.status(), 200);
        assert_eq!(res.snapshot().blocks["content"], "saved");

        let res = SharedResponse::new();
        let guest = Request::post("/post/3").user(User::new("guest"));
        table.route(&guest, &res, &RouteEnv::uncached()).await.unwrap();
        let state = res.snapshot();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(state.status, 401);
        assert_eq!(state.redirect.as_deref(), Some("/"));
        assert_eq!(
            state.flash[0].message,
            "You need the `edit posts` permission to access this page."
        );
        assert!(!state.blocks.contains_key("content"));
    }

    #[tokio::test]
    async fn test_earliest_registered_failure_is_returned() {
        let mut table = ModuleRouteTable::new("content");
        table
            .add_route("GET /page", RouteOptions::new(), |_cx| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err("slow failure".into())
            })
            .unwrap();
        table
            .add_route("GET /page", RouteOptions::new(), |_cx| async {
                Err("fast failure".into())
            })
            .unwrap();

        let res = SharedResponse::new();
        let err = table
            .route(&Request::get("/page"), &res, &RouteEnv::uncached())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "content: slow failure");
        assert_eq!(res.snapshot().errors.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_template_fails_only_its_route() {
        let hits = counter();
        let mut table = counting_table(&hits, &[("GET /page", false)]);
        table
            .add_route(
                "GET /page",
                RouteOptions::new().template("missing"),
                |_cx| async { Ok(Output::none()) },
            )
            .unwrap();
        let res = SharedResponse::new();
        let err = table
            .route(&Request::get("/page"), &res, &RouteEnv::uncached())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingTemplate { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_template_is_passed_to_handler() {
        let mut table = ModuleRouteTable::new("content");
        table.add_template("show", "<h1>{{title}}</h1>");
        table
            .add_route("GET /show", RouteOptions::new().template("show"), |cx| async move {
                Ok(Output::content(cx.template.as_deref().unwrap_or_default()))
            })
            .unwrap();
        let res = SharedResponse::new();
        table
            .route(&Request::get("/show"), &res, &RouteEnv::uncached())
            .await
            .unwrap();
        assert_eq!(res.snapshot().blocks["content"], "<h1>{{title}}</h1>");
    }

    #[tokio::test]
    async fn test_cached_block_skips_handler() {
        let hits = counter();
        let mut table = ModuleRouteTable::new("content");
        let seen = Arc::clone(&hits);
        table
            .add_route(
                "GET /post/:id",
                RouteOptions::new().cache().block("content.post"),
                move |cx| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let id = cx.params().get("id").unwrap_or_default().to_string();
                    async move { Ok(Output::content(format!("post {id}")).with_layout("wide")) }
                },
            )
            .unwrap();

        let env = RouteEnv::cached(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        for _ in 0..2 {
            let res = SharedResponse::new();
            table.route(&Request::get("/post/7"), &res, &env).await.unwrap();
            let state = res.snapshot();
            assert_eq!(state.blocks["content.post"], "post 7");
            assert_eq!(state.layout.as_deref(), Some("wide"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Admins always see fresh output.
        let res = SharedResponse::new();
        table
            .route(&Request::get("/post/7").user(User::admin("root")), &res, &env)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Different parameters, different key.
        table
            .route(&Request::get("/post/8"), &SharedResponse::new(), &env)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalid_route_is_rejected() {
        let mut table = ModuleRouteTable::new("content");
        let result = table.add_route("BREW /pot", RouteOptions::new(), |_cx| async {
            Ok(Output::none())
        });
        assert!(result.is_err());
        assert!(table.is_empty());
    }
}
