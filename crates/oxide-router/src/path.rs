//! Path pattern matching.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use regex::{Regex, RegexBuilder};

use crate::error::{Result, RouterError};
use crate::request::{Method, PathParams, Request};

/// How a route selects requests.
#[derive(Debug, Clone)]
pub enum RouteSpec {
    /// A `"METHOD /pattern"` string, e.g. `"GET /content/:id?"`.
    Pattern(String),
    /// A raw regular expression tried against every request path.
    ///
    /// Such routes ignore the method and fire on every matching page.
    Regex(Regex),
}

impl From<&str> for RouteSpec {
    fn from(spec: &str) -> Self {
        Self::Pattern(spec.to_string())
    }
}

impl From<String> for RouteSpec {
    fn from(spec: String) -> Self {
        Self::Pattern(spec)
    }
}

impl From<Regex> for RouteSpec {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

/// The result of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Named path parameters, plus query parameters for structural routes.
    pub params: PathParams,
    /// Whether the route was registered as a raw regular expression.
    pub is_wildcard: bool,
}

/// A compiled route specification.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    /// The original specification text.
    source: String,
    /// Required method; `None` matches any method.
    method: Option<Method>,
    /// Compiled, case-insensitive regex.
    regex: Regex,
    /// Capture group names by position. Unnamed groups are `None`.
    keys: Vec<Option<String>>,
    /// Set for raw regex routes.
    wildcard: bool,
}

impl PathMatcher {
    /// Compiles a route specification.
    ///
    /// Pattern syntax:
    /// - `GET /users` - Literal path
    /// - `GET /users/:id` - Named parameter (at least one non-`/` character)
    /// - `GET /users/:id?` - Optional parameter; the preceding `/` is optional too
    /// - `GET /files/*` - Greedy unnamed capture (not exposed as a parameter)
    ///
    /// A trailing slash is always accepted.
    ///
    /// # Example
    ///
    /// ```
    /// use oxide_router::{Method, PathMatcher};
    ///
    /// let matcher = PathMatcher::compile("GET /posts/:id/comments/:comment_id").unwrap();
    /// let m = matcher.match_path(Method::Get, "/posts/123/comments/456").unwrap();
    /// assert_eq!(m.params.get("id"), Some("123"));
    /// assert_eq!(m.params.get("comment_id"), Some("456"));
    /// ```
    pub fn compile(spec: impl Into<RouteSpec>) -> Result<Self> {
        match spec.into() {
            RouteSpec::Pattern(text) => {
                let (method, pattern) = split_method(&text)?;
                let (regex, keys) = pattern_to_regex(pattern)?;
                Ok(Self {
                    source: text.clone(),
                    method,
                    regex,
                    keys,
                    wildcard: false,
                })
            }
            RouteSpec::Regex(regex) => {
                let keys = regex
                    .capture_names()
                    .skip(1)
                    .map(|name| name.map(str::to_string))
                    .collect();
                let regex = RegexBuilder::new(regex.as_str())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RouterError::InvalidPattern(e.to_string()))?;
                Ok(Self {
                    source: regex.as_str().to_string(),
                    method: None,
                    regex,
                    keys,
                    wildcard: true,
                })
            }
        }
    }

    /// Matches a path, without query parameters.
    pub fn match_path(&self, method: Method, path: &str) -> Option<RouteMatch> {
        self.matches(method, path, &HashMap::new())
    }

    /// Matches a request.
    pub fn match_request(&self, request: &Request) -> Option<RouteMatch> {
        self.matches(request.method, &request.path, &request.query)
    }

    /// Matches a method, path and query.
    ///
    /// Query parameters are merged into structural matches only; a path
    /// parameter wins over a query parameter of the same name.
    pub fn matches(
        &self,
        method: Method,
        path: &str,
        query: &HashMap<String, String>,
    ) -> Option<RouteMatch> {
        if self.method.is_some_and(|m| m != method) {
            return None;
        }

        let caps = self.regex.captures(path)?;
        let mut params = PathParams::new();

        for (i, key) in self.keys.iter().enumerate() {
            let (Some(name), Some(value)) = (key, caps.get(i + 1)) else {
                continue;
            };
            params.insert(name.clone(), value.as_str());
        }

        if !self.wildcard {
            for (key, value) in query {
                params.insert_missing(key, value);
            }
        }

        Some(RouteMatch {
            params,
            is_wildcard: self.wildcard,
        })
    }

    /// Returns the original specification text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the required method, if any.
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// Returns the declared parameter names in order.
    pub fn param_names(&self) -> Vec<&str> {
        self.keys.iter().flatten().map(String::as_str).collect()
    }

    /// Returns whether this is a raw regex route.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }
}

fn split_method(text: &str) -> Result<(Option<Method>, &str)> {
    let text = text.trim_start();
    if text.starts_with('/') {
        return Ok((None, text));
    }
    let (method, pattern) = text.split_once(' ').unwrap_or((text, ""));
    let method =
        Method::from_str(method).ok_or_else(|| RouterError::UnsupportedMethod(text.to_string()))?;
    Ok((Some(method), pattern.trim()))
}

fn pattern_to_regex(pattern: &str) -> Result<(Regex, Vec<Option<String>>)> {
    let mut source = String::from("^");
    let mut keys = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' | '.' if chars.peek() == Some(&':') => {
                chars.next();
                push_param(&mut source, &mut keys, &mut chars, Some(c), pattern)?;
            }
            ':' => push_param(&mut source, &mut keys, &mut chars, None, pattern)?,
            '*' => {
                source.push_str("(.*)");
                keys.push(None);
            }
            // Quantifier on the previous literal, e.g. `/a/?`.
            '?' => source.push('?'),
            other => {
                let mut buf = [0; 4];
                source.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    source.push_str("/?$");

    let regex = RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| RouterError::InvalidPattern(format!("{pattern}: {e}")))?;
    Ok((regex, keys))
}

fn push_param(
    source: &mut String,
    keys: &mut Vec<Option<String>>,
    chars: &mut Peekable<Chars<'_>>,
    prefix: Option<char>,
    pattern: &str,
) -> Result<()> {
    let mut name = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
        name.push(c);
    }
    if name.is_empty() {
        return Err(RouterError::InvalidPattern(format!(
            "{pattern}: parameter without a name"
        )));
    }

    let optional = chars.next_if_eq(&'?').is_some();
    let (prefix, capture) = match prefix {
        Some('.') => ("\\.", "([^/.]+?)"),
        Some(_) => ("/", "([^/]+?)"),
        None => ("", "([^/]+?)"),
    };
    if optional {
        source.push_str(&format!("(?:{prefix}{capture})?"));
    } else {
        source.push_str(prefix);
        source.push_str(capture);
    }
    keys.push(Some(name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(spec: &str, path: &str) -> Option<RouteMatch> {
        PathMatcher::compile(spec).unwrap().match_path(Method::Get, path)
    }

    #[test]
    fn test_literal_path() {
        assert!(get("GET /users", "/users").is_some());
        assert!(get("GET /users", "/users/").is_some());
        assert!(get("GET /users", "/posts").is_none());
    }

    #[test]
    fn test_single_param() {
        let m = get("GET /a/:id", "/a/123").unwrap();
        assert_eq!(m.params.get("id"), Some("123"));
        assert!(!m.is_wildcard);
        assert!(get("GET /a/:id", "/a/123/extra").is_none());
        assert!(get("GET /a/:id", "/a/").is_none());
    }

    #[test]
    fn test_multiple_params() {
        let m = get("GET /posts/:post_id/comments/:comment_id", "/posts/42/comments/7").unwrap();
        assert_eq!(m.params.get("post_id"), Some("42"));
        assert_eq!(m.params.get("comment_id"), Some("7"));
    }

    #[test]
    fn test_optional_param() {
        let without = get("GET /a/:id?", "/a").unwrap();
        assert!(!without.params.contains("id"));
        let with = get("GET /a/:id?", "/a/123").unwrap();
        assert_eq!(with.params.get("id"), Some("123"));
    }

    #[test]
    fn test_format_param() {
        let m = get("GET /feed.:format?", "/feed.rss").unwrap();
        assert_eq!(m.params.get("format"), Some("rss"));
        assert!(get("GET /feed.:format?", "/feed").is_some());
    }

    #[test]
    fn test_star_is_not_a_param() {
        let m = get("GET /files/*", "/files/docs/readme.md").unwrap();
        assert!(m.params.is_empty());
    }

    #[test]
    fn test_empty_pattern_matches_root() {
        assert!(get("GET ", "/").is_some());
        assert!(get("GET ", "/a").is_none());
    }

    #[test]
    fn test_optional_trailing_slash() {
        assert!(get("GET /admin/?", "/admin").is_some());
        assert!(get("GET /admin/?", "/admin/").is_some());
    }

    #[test]
    fn test_case_insensitive() {
        assert!(get("GET /About", "/about").is_some());
    }

    #[test]
    fn test_method_must_match() {
        let matcher = PathMatcher::compile("POST /user/login").unwrap();
        assert!(matcher.match_path(Method::Get, "/user/login").is_none());
        assert!(matcher.match_path(Method::Post, "/user/login").is_some());
    }

    #[test]
    fn test_methodless_pattern_matches_any_method() {
        let matcher = PathMatcher::compile("/ping").unwrap();
        assert_eq!(matcher.method(), None);
        assert!(matcher.match_path(Method::Delete, "/ping").is_some());
    }

    #[test]
    fn test_structural_route_absorbs_query() {
        let matcher = PathMatcher::compile("GET /a/:id").unwrap();
        let m = matcher
            .match_request(&Request::get("/a/5?x=1&id=9"))
            .unwrap();
        assert_eq!(m.params.get("id"), Some("5"));
        assert_eq!(m.params.get("x"), Some("1"));
    }

    #[test]
    fn test_wildcard_route_ignores_query() {
        let matcher = PathMatcher::compile(Regex::new(".*").unwrap()).unwrap();
        let m = matcher
            .match_request(&Request::post("/anything?x=1"))
            .unwrap();
        assert!(m.is_wildcard);
        assert!(!m.params.contains("x"));
    }

    #[test]
    fn test_wildcard_named_groups() {
        let matcher = PathMatcher::compile(Regex::new("^/tag/(?P<tag>[a-z]+)").unwrap()).unwrap();
        let m = matcher.match_path(Method::Get, "/TAG/rust").unwrap();
        assert_eq!(m.params.get("tag"), Some("rust"));
    }

    #[test]
    fn test_param_names() {
        let matcher = PathMatcher::compile("GET /a/:b/*/:c?").unwrap();
        assert_eq!(matcher.param_names(), vec!["b", "c"]);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            PathMatcher::compile("FETCH /a"),
            Err(RouterError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            PathMatcher::compile("GET /a/:"),
            Err(RouterError::InvalidPattern(_))
        ));
    }
}
