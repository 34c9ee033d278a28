//! Response state shared by every module routing one request.
//!
//! Handlers of several modules run concurrently for the same request and all
//! contribute to one page: they set the status, flag structural matches,
//! render blocks and record errors. The theme reads the final state once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Layout used for admin routes unless a module picked one first.
pub const ADMIN_LAYOUT: &str = "admin";

/// A failure recorded while routing, shown on the 500 page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    /// Module the failure belongs to.
    pub module: String,
    /// Error message.
    pub message: String,
    /// Error chain, outermost first.
    pub stack: Vec<String>,
}

/// A one-shot message for the next page the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    /// Message kind, e.g. `error` or `info`.
    pub kind: String,
    /// Message text.
    pub message: String,
}

/// Mutable per-request response state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseState {
    /// HTTP status code.
    pub status: u16,
    /// Set once any structural (non-wildcard) route matched.
    pub route_matched: bool,
    /// Redirect target, if a handler or a permission check redirected.
    pub redirect: Option<String>,
    /// Layout override.
    pub layout: Option<String>,
    /// Rendered fragments by block id.
    pub blocks: BTreeMap<String, String>,
    /// Flash messages.
    pub flash: Vec<Flash>,
    /// Recorded failures.
    pub errors: Vec<RecordedError>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: 200,
            route_matched: false,
            redirect: None,
            layout: None,
            blocks: BTreeMap::new(),
            flash: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Cloneable handle to the response state of one request.
#[derive(Debug, Clone, Default)]
pub struct SharedResponse {
    inner: Arc<Mutex<ResponseState>>,
}

impl SharedResponse {
    /// Creates fresh state with status 200.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        // A panicking handler must not take the rest of the page down.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the status code.
    pub fn set_status(&self, status: u16) {
        self.lock().status = status;
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    /// Flags a structural match. The first admin match selects the admin layout.
    pub fn mark_matched(&self, admin: bool) {
        let mut state = self.lock();
        state.route_matched = true;
        if admin && state.layout.is_none() {
            state.layout = Some(ADMIN_LAYOUT.to_string());
        }
    }

    /// Returns whether a structural route matched.
    pub fn route_matched(&self) -> bool {
        self.lock().route_matched
    }

    /// Redirects to `location`.
    pub fn redirect(&self, location: impl Into<String>) {
        self.lock().redirect = Some(location.into());
    }

    /// Overrides the layout.
    pub fn set_layout(&self, layout: impl Into<String>) {
        self.lock().layout = Some(layout.into());
    }

    /// Returns the layout override.
    pub fn layout(&self) -> Option<String> {
        self.lock().layout.clone()
    }

    /// Stores a rendered block, appending to earlier output for the same id.
    pub fn render_block(&self, block: &str, content: &str) {
        self.lock()
            .blocks
            .entry(block.to_string())
            .or_default()
            .push_str(content);
    }

    /// Adds a flash message.
    pub fn flash(&self, kind: impl Into<String>, message: impl Into<String>) {
        self.lock().flash.push(Flash {
            kind: kind.into(),
            message: message.into(),
        });
    }

    /// Records a failure and sets status 500. An identical failure is kept once.
    pub fn record_error(&self, error: RecordedError) {
        let mut state = self.lock();
        state.status = 500;
        if !state.errors.contains(&error) {
            state.errors.push(error);
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> ResponseState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let res = SharedResponse::new();
        assert_eq!(res.status(), 200);
        assert!(!res.route_matched());
    }

    #[test]
    fn test_first_admin_match_picks_layout() {
        let res = SharedResponse::new();
        res.mark_matched(false);
        assert_eq!(res.layout(), None);
        res.set_layout("wide");
        res.mark_matched(true);
        assert_eq!(res.layout(), Some("wide".to_string()));

        let admin = SharedResponse::new();
        admin.mark_matched(true);
        assert_eq!(admin.layout(), Some(ADMIN_LAYOUT.to_string()));
    }

    #[test]
    fn test_blocks_accumulate() {
        let res = SharedResponse::new();
        res.render_block("content", "<p>a</p>");
        res.clone().render_block("content", "<p>b</p>");
        assert_eq!(res.snapshot().blocks["content"], "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_record_error_sets_500() {
        let res = SharedResponse::new();
        res.record_error(RecordedError {
            module: "content".into(),
            message: "boom".into(),
            stack: vec![],
        });
        let state = res.snapshot();
        assert_eq!(state.status, 500);
        assert_eq!(state.errors.len(), 1);
    }
}
