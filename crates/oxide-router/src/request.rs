//! HTTP request type.

use std::collections::{BTreeSet, HashMap};

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method
    Get,
    /// POST method
    Post,
    /// PUT method
    Put,
    /// PATCH method
    Patch,
    /// DELETE method
    Delete,
    /// HEAD method
    Head,
    /// OPTIONS method
    Options,
}

impl Method {
    /// Parses a method from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    /// Returns the method as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters extracted from the URL for one matched route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: HashMap<String, String>,
}

impl PathParams {
    /// Creates new empty path params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Inserts a parameter unless one with the same name is already present.
    pub fn insert_missing(&mut self, key: &str, value: &str) {
        if !self.params.contains_key(key) {
            self.params.insert(key.to_string(), value.to_string());
        }
    }

    /// Gets a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns whether a parameter is present.
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns an iterator over the parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the parameters as `key=value` pairs sorted by key.
    pub fn canonical(&self) -> String {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable();
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// The authenticated caller attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Login name.
    pub username: String,
    /// Administrators bypass every permission check.
    pub is_admin: bool,
    /// Role names held by the user.
    pub roles: BTreeSet<String>,
}

impl User {
    /// Creates a regular user without roles.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_admin: false,
            roles: BTreeSet::new(),
        }
    }

    /// Creates an administrator.
    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::new(username)
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// Session state of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// The logged in user, if any.
    pub user: Option<User>,
}

impl Session {
    /// An anonymous session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session for the given user.
    pub fn for_user(user: User) -> Self {
        Self { user: Some(user) }
    }

    /// Returns whether the caller is an administrator.
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    /// Returns whether someone is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Returns the caller's roles (empty when anonymous).
    pub fn roles(&self) -> Vec<String> {
        self.user
            .as_ref()
            .map(|u| u.roles.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// An HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Request path, without the query string.
    pub path: String,
    /// Parameters of the route currently being dispatched.
    pub params: PathParams,
    /// Query string parameters.
    pub query: HashMap<String, String>,
    /// Caller session.
    pub session: Session,
}

impl Request {
    /// Creates a new request.
    ///
    /// A query string in `target` is split off and parsed.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        let target = target.into();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Self::parse_query_string(query)),
            None => (target, HashMap::new()),
        };
        Self {
            method,
            path,
            params: PathParams::new(),
            query,
            session: Session::anonymous(),
        }
    }

    /// Creates a GET request.
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    /// Creates a POST request.
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::Post, target)
    }

    /// Sets a query parameter.
    #[must_use]
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Sets the session.
    #[must_use]
    pub fn session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Logs the given user in for this request.
    #[must_use]
    pub fn user(self, user: User) -> Self {
        self.session(Session::for_user(user))
    }

    /// Gets a query parameter.
    pub fn get_query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Returns a copy of this request carrying the given route parameters.
    #[must_use]
    pub fn with_params(&self, params: PathParams) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }

    /// Parses query parameters from a query string.
    pub fn parse_query_string(query: &str) -> HashMap<String, String> {
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                let key = parts.next()?;
                let value = parts.next().unwrap_or("");
                Some((urlencoding_decode(key), urlencoding_decode(value)))
            })
            .collect()
    }
}

/// Simple URL decoding.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!(Method::from_str("GET"), Some(Method::Get));
        assert_eq!(Method::from_str("post"), Some(Method::Post));
        assert_eq!(Method::from_str("INVALID"), None);
    }

    #[test]
    fn test_path_params() {
        let mut params = PathParams::new();
        params.insert("id", "123");
        params.insert("name", "test");
        params.insert_missing("id", "999");

        assert_eq!(params.get("id"), Some("123"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.canonical(), "id=123&name=test");
    }

    #[test]
    fn test_request_splits_query() {
        let req = Request::get("/a/123?x=1&y=two");
        assert_eq!(req.path, "/a/123");
        assert_eq!(req.get_query("x"), Some("1"));
        assert_eq!(req.get_query("y"), Some("two"));
    }

    #[test]
    fn test_request_builder() {
        let req = Request::get("/users")
            .query_param("page", "1")
            .user(User::new("alice").role("editor"));

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/users");
        assert_eq!(req.get_query("page"), Some("1"));
        assert!(req.session.is_authenticated());
        assert!(!req.session.is_admin());
        assert_eq!(req.session.roles(), vec!["editor".to_string()]);
    }

    #[test]
    fn test_query_string_parsing() {
        let query = Request::parse_query_string("name=John+Doe&age=30&city=New%20York&q=%C3%A9&bad=%zz");
        assert_eq!(query.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(query.get("age"), Some(&"30".to_string()));
        assert_eq!(query.get("city"), Some(&"New York".to_string()));
        assert_eq!(query.get("q"), Some(&"é".to_string()));
        assert_eq!(query.get("bad"), Some(&"%zz".to_string()));
    }
}
