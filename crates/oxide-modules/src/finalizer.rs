//! Turning the routed response state into an HTTP response.

use std::error::Error;

use ironhtml::typed::{Document, Element};
use ironhtml_elements::{Body, Div, Head, Html, Li, Meta, Title, Ul, H1, H2, P};
use oxide_router::{BoxError, BoxFuture, Request, Response, ResponseState, SharedResponse};
use tracing::{error, info};

use crate::config::AppConfig;

/// Renders the final page.
///
/// Called exactly once per routed request, after every module finished.
/// The state's status tells the theme which page to render: 404 for an
/// unmatched path, 500 when errors were recorded.
pub trait Theme: Send + Sync {
    /// Renders the page body.
    fn render<'a>(
        &'a self,
        request: &'a Request,
        state: &'a ResponseState,
    ) -> BoxFuture<'a, Result<String, BoxError>>;
}

/// A minimal theme laying out blocks in id order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockTheme;

impl BlockTheme {
    fn page(state: &ResponseState) -> String {
        let layout = format!("layout-{}", state.layout.as_deref().unwrap_or("default"));
        let title = match state.status {
            404 => "Page not found",
            500 => "Internal server error",
            _ => "Oxide CMS",
        };
        Document::new()
            .doctype()
            .root::<Html, _>(|html| {
                html.attr("lang", "en")
                    .child::<Head, _>(|head| {
                        head.child::<Meta, _>(|m| m.attr("charset", "UTF-8"))
                            .child::<Title, _>(|t| t.text(title))
                    })
                    .child::<Body, _>(|body| {
                        let body = body.class(&layout).children(
                            state.flash.iter(),
                            |flash, div: Element<Div>| {
                                div.class(&format!("flash {}", flash.kind))
                                    .text(&flash.message)
                            },
                        );
                        match state.status {
                            404 => body.child::<H1, _>(|h| h.text(title)),
                            500 => body.child::<H1, _>(|h| h.text(title)).children(
                                state.errors.iter(),
                                |err, div: Element<Div>| {
                                    div.class("error")
                                        .child::<H2, _>(|h| h.text(&err.module))
                                        .child::<P, _>(|p| p.text(&err.message))
                                        .raw(stack_list(&err.stack))
                                },
                            ),
                            _ => body.children(state.blocks.iter(), |block, div: Element<Div>| {
                                let (id, content) = block;
                                div.attr("id", id).raw(content)
                            }),
                        }
                    })
            })
            .build()
    }
}

impl Theme for BlockTheme {
    fn render<'a>(
        &'a self,
        _request: &'a Request,
        state: &'a ResponseState,
    ) -> BoxFuture<'a, Result<String, BoxError>> {
        Box::pin(async move { Ok(Self::page(state)) })
    }
}

/// Builds the response of one routed request.
pub struct ResponseFinalizer<'a> {
    config: &'a AppConfig,
    theme: &'a dyn Theme,
    request: &'a Request,
    response: SharedResponse,
}

impl<'a> ResponseFinalizer<'a> {
    /// Creates a finalizer for `request`.
    pub fn new(
        config: &'a AppConfig,
        theme: &'a dyn Theme,
        request: &'a Request,
        response: SharedResponse,
    ) -> Self {
        Self {
            config,
            theme,
            request,
            response,
        }
    }

    /// Produces the response. Consumes the finalizer so it runs once.
    ///
    /// An uninstalled site redirects everything but the installer. A
    /// redirect keeps a non-200 status and otherwise becomes a 302. With
    /// no structural match the status becomes 404, unless a module already
    /// chose a status. Theme failures fall back to a raw error page.
    pub async fn finalize(self) -> Response {
        let path = self.request.path.as_str();
        if !self.config.installed && path != self.config.install_path {
            info!(path, location = %self.config.install_path, "not installed, redirecting");
            return Response::redirect(&self.config.install_path);
        }

        let mut state = self.response.snapshot();
        if let Some(location) = &state.redirect {
            let status = if state.status == 200 { 302 } else { state.status };
            return Response::new(status).header("Location", location);
        }

        if !state.route_matched && state.status == 200 {
            self.response.set_status(404);
            state.status = 404;
        }

        match self.theme.render(self.request, &state).await {
            Ok(html) => Response::html(html).status(state.status),
            Err(e) => {
                error!(path, error = %e, "theme render failed");
                Response::html(fallback_page(&*e)).status(500)
            }
        }
    }
}

fn fallback_page(err: &(dyn Error + 'static)) -> String {
    let mut stack = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        stack.push(cause.to_string());
        source = cause.source();
    }
    let message = err.to_string();
    Document::new()
        .doctype()
        .root::<Html, _>(|html| {
            html.attr("lang", "en")
                .child::<Head, _>(|head| {
                    head.child::<Title, _>(|t| t.text("Internal server error"))
                })
                .child::<Body, _>(|body| {
                    body.child::<H1, _>(|h| h.text("Internal server error"))
                        .child::<P, _>(|p| p.text(&message))
                        .when(!stack.is_empty(), |b| {
                            b.child::<Ul, _>(|ul| {
                                ul.class("stack")
                                    .children(stack.iter(), |line, li: Element<Li>| li.text(line))
                            })
                        })
                })
        })
        .build()
}

/// Renders an error chain as a list, or nothing when it is empty.
fn stack_list(stack: &[String]) -> String {
    if stack.is_empty() {
        return String::new();
    }
    Element::<Ul>::new()
        .class("stack")
        .children(stack.iter(), |line, li: Element<Li>| li.text(line))
        .render()
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use oxide_router::RecordedError;

    use super::*;

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("template <main> missing")
        }
    }

    impl Error for Broken {}

    struct BrokenTheme;

    impl Theme for BrokenTheme {
        fn render<'a>(
            &'a self,
            _request: &'a Request,
            _state: &'a ResponseState,
        ) -> BoxFuture<'a, Result<String, BoxError>> {
            Box::pin(async { Err(Box::new(Broken) as BoxError) })
        }
    }

    async fn finalize(config: &AppConfig, request: &Request, response: SharedResponse) -> Response {
        ResponseFinalizer::new(config, &BlockTheme, request, response)
            .finalize()
            .await
    }

    #[tokio::test]
    async fn test_unmatched_becomes_404() {
        let config = AppConfig::default();
        let response = SharedResponse::new();
        let res = finalize(&config, &Request::get("/nowhere"), response.clone()).await;
        assert_eq!(res.status, 404);
        assert_eq!(response.status(), 404);
        assert!(res.body_string().unwrap().contains("Page not found"));
    }

    #[tokio::test]
    async fn test_matched_renders_blocks() {
        let config = AppConfig::default();
        let response = SharedResponse::new();
        response.mark_matched(false);
        response.render_block("content", "<p>hello</p>");
        let res = finalize(&config, &Request::get("/page"), response).await;
        assert_eq!(res.status, 200);
        let body = res.body_string().unwrap();
        assert!(body.contains("id=\"content\""));
        assert!(body.contains("<p>hello</p>"));
        assert!(body.contains("layout-default"));
    }

    #[tokio::test]
    async fn test_flash_and_layout_are_escaped() {
        let config = AppConfig::default();
        let response = SharedResponse::new();
        response.mark_matched(false);
        response.flash("error", "<b>denied</b> & gone");
        response.set_layout("admin");
        let res = finalize(&config, &Request::get("/page"), response).await;
        let body = res.body_string().unwrap();
        assert!(body.contains("layout-admin"));
        assert!(body.contains("flash error"));
        assert!(body.contains("&lt;b&gt;denied&lt;/b&gt; &amp; gone"));
        assert!(!body.contains("<b>denied</b>"));
    }

    #[tokio::test]
    async fn test_redirect_keeps_error_status() {
        let config = AppConfig::default();
        let denied = SharedResponse::new();
        denied.set_status(401);
        denied.redirect("/");
        let res = finalize(&config, &Request::get("/admin"), denied).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.get_header("Location"), Some("/"));

        let moved = SharedResponse::new();
        moved.redirect("/new");
        let res = finalize(&config, &Request::get("/old"), moved).await;
        assert_eq!(res.status, 302);
    }

    #[tokio::test]
    async fn test_uninstalled_redirects_to_installer() {
        let config = AppConfig {
            installed: false,
            ..AppConfig::default()
        };
        let res = finalize(&config, &Request::get("/page"), SharedResponse::new()).await;
        assert_eq!(res.status, 302);
        assert_eq!(res.get_header("Location"), Some("/admin/install"));

        let res = finalize(&config, &Request::get("/admin/install"), SharedResponse::new()).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn test_errors_are_escaped_on_500_page() {
        let config = AppConfig::default();
        let response = SharedResponse::new();
        response.mark_matched(false);
        response.record_error(RecordedError {
            module: "content".into(),
            message: "<script>".into(),
            stack: vec!["db down".into()],
        });
        let res = finalize(&config, &Request::get("/page"), response).await;
        let body = res.body_string().unwrap();
        assert_eq!(res.status, 500);
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("<li>db down</li>"));
        assert!(body.contains("Internal server error"));
    }

    #[tokio::test]
    async fn test_theme_failure_falls_back() {
        let config = AppConfig::default();
        let request = Request::get("/page");
        let res = ResponseFinalizer::new(&config, &BrokenTheme, &request, SharedResponse::new())
            .finalize()
            .await;
        assert_eq!(res.status, 500);
        assert!(res
            .body_string()
            .unwrap()
            .contains("template &lt;main&gt; missing"));
    }
}
