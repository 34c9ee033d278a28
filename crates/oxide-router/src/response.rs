//! The finalized HTTP response of a routed request.

use std::collections::HashMap;

/// An HTTP response, produced once per request after every module routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Response {
    /// An empty response with `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// A rendered page. The status is 200 until changed.
    pub fn html(page: impl Into<String>) -> Self {
        Self::new(200)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(page.into())
    }

    /// A 302 redirect to `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302).header("Location", location)
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the status code.
    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns a header value.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns the body as text, if it is valid UTF-8.
    pub fn body_string(&self) -> Option<String> {
        String::from_utf8(self.body.clone()).ok()
    }

    /// Returns whether the response redirects.
    pub fn is_redirect(&self) -> bool {
        self.headers.contains_key("Location")
    }

    /// Reason phrase of the statuses routing produces.
    pub fn status_text(&self) -> &'static str {
        match self.status {
            200 => "OK",
            302 => "Found",
            401 => "Unauthorized",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_page() {
        let res = Response::html("<h1>Hello</h1>").status(404);
        assert_eq!(res.status, 404);
        assert_eq!(res.status_text(), "Not Found");
        assert_eq!(
            res.get_header("Content-Type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(res.body_string().as_deref(), Some("<h1>Hello</h1>"));
        assert!(!res.is_redirect());
    }

    #[test]
    fn test_redirect() {
        let res = Response::redirect("/admin/install");
        assert_eq!(res.status, 302);
        assert_eq!(res.get_header("Location"), Some("/admin/install"));
        assert!(res.is_redirect());

        let denied = Response::new(401).header("Location", "/");
        assert!(denied.is_redirect());
        assert_eq!(denied.status_text(), "Unauthorized");
    }
}
