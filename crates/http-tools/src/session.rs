//! Cookie session shared by every outgoing request.
//!
//! [`SessionState`] owns the process-wide [`CookieJar`], the flattened cookie header cached at
//! login, and the `reqwest::Client` every request goes through. The jar is plugged into the
//! client as its cookie provider, so `Set-Cookie` headers from every response (redirect hops
//! included) land in it automatically.
//!
//! Outbound cookies are resolved in order:
//! 1. jar entries whose path matches the request URL
//! 2. jar entries for the request origin regardless of path
//! 3. the header cached by the last successful login
//! 4. the configured process default
//!
//! A jar lookup error is logged and resolution continues with the next step.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::safety::redact_url;
use chrono::{DateTime, Utc};
use cookie_store::{CookieExpiration, RawCookie, StoreAction};
use parking_lot::RwLock;
use reqwest::Client;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum JarError {
    #[error("invalid cookie url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("cookie url '{0}' has no host")]
    MissingHost(String),
}

/// Read-only view of a cookie held by the jar. The value is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    #[serde(skip)]
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn from_stored(cookie: &cookie_store::Cookie<'static>, host: &str) -> Self {
        let path: &str = cookie.path.as_ref();
        let expires = match &cookie.expires {
            CookieExpiration::AtUtc(at) => DateTime::from_timestamp(at.unix_timestamp(), 0),
            CookieExpiration::SessionEnd => None,
        };
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie
                .domain()
                .map_or_else(|| host.to_string(), |d| d.trim_start_matches('.').to_ascii_lowercase()),
            path: path.to_string(),
            secure: cookie.secure().unwrap_or(false),
            http_only: cookie.http_only().unwrap_or(false),
            expires,
        }
    }
}

/// Which cookies a lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// Cookies whose path matches the request path.
    Matching,
    /// Every cookie for the host.
    AnyPath,
}

/// In-memory cookie jar over [`cookie_store::CookieStore`]. Last writer wins for a given
/// name/domain/path.
///
/// A `Domain` attribute naming a public suffix (`com`, `co.uk`, ...) is only accepted when it is
/// the request host itself, and then the cookie stays host-only.
#[derive(Default)]
pub struct CookieJar {
    store: RwLock<cookie_store::CookieStore>,
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar").field("len", &self.len()).finish()
    }
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one `Set-Cookie` value received from `url`. An already-expired cookie removes any
    /// stored cookie in the same slot. Returns whether a cookie was kept.
    pub fn store(&self, set_cookie: &str, url: &Url) -> bool {
        let Ok(raw) = RawCookie::parse(set_cookie.to_string()) else {
            return false;
        };
        let Some(raw) = scope_to_host(raw, url) else {
            debug!(url = %redact_url(url), "rejected cookie scoped to a public suffix");
            return false;
        };
        matches!(
            self.store.write().insert_raw(&raw, url),
            Ok(StoreAction::Inserted | StoreAction::UpdatedExisting)
        )
    }

    pub fn store_all<'a, I>(&self, set_cookies: I, url: &Url) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        set_cookies
            .into_iter()
            .filter(|sc| self.store(sc, url))
            .count()
    }

    /// Cookie header for `url` using path matching.
    ///
    /// # Errors
    ///
    /// Returns [`JarError`] if `url` is not an absolute URL with a host.
    pub fn lookup(&self, url: &str) -> std::result::Result<Option<String>, JarError> {
        let url = parse_cookie_url(url)?;
        Ok(self.header_for(&url, PathScope::Matching))
    }

    /// Cookie header for `url`'s host, ignoring cookie paths.
    ///
    /// # Errors
    ///
    /// Returns [`JarError`] if `url` is not an absolute URL with a host.
    pub fn lookup_any_path(&self, url: &str) -> std::result::Result<Option<String>, JarError> {
        let url = parse_cookie_url(url)?;
        Ok(self.header_for(&url, PathScope::AnyPath))
    }

    /// Flattened `name=value; ...` header, longest paths first. `None` when nothing matches.
    #[must_use]
    pub fn header_for(&self, url: &Url, scope: PathScope) -> Option<String> {
        let store = self.store.read();
        let mut matched: Vec<&cookie_store::Cookie<'static>> = match scope {
            PathScope::Matching => store.matches(url),
            PathScope::AnyPath => store
                .iter_unexpired()
                .filter(|c| c.matches(&at_cookie_path(url, c)))
                .collect(),
        };
        if matched.is_empty() {
            return None;
        }
        matched.sort_by(|a, b| {
            cookie_path(b)
                .len()
                .cmp(&cookie_path(a).len())
                .then_with(|| a.name().cmp(b.name()))
        });
        Some(
            matched
                .iter()
                .map(|c| format!("{}={}", c.name(), c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Live cookies that would be sent to `url`'s host on any path.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Vec<StoredCookie> {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Vec::new();
        };
        let store = self.store.read();
        let mut cookies: Vec<StoredCookie> = store
            .iter_unexpired()
            .filter(|c| c.matches(&at_cookie_path(url, c)))
            .map(|c| StoredCookie::from_stored(c, &host))
            .collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        cookies
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().iter_unexpired().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().iter_unexpired().next().is_none()
    }

    /// Remove every cookie. Returns how many live cookies were removed.
    pub fn clear(&self) -> usize {
        let mut store = self.store.write();
        let removed = store.iter_unexpired().count();
        store.clear();
        removed
    }
}

fn cookie_path<'a>(cookie: &'a cookie_store::Cookie<'static>) -> &'a str {
    cookie.path.as_ref()
}

/// `url` with its path swapped for the cookie's own path, so a path-matching check only tests
/// domain, scheme and expiry.
fn at_cookie_path(url: &Url, cookie: &cookie_store::Cookie<'static>) -> Url {
    let mut probe = url.clone();
    probe.set_path(cookie_path(cookie));
    probe
}

/// Drop cookies whose `Domain` is a public suffix other than the request host. A `Domain`
/// equal to the host is removed, which leaves the cookie host-only.
fn scope_to_host(mut raw: RawCookie<'static>, url: &Url) -> Option<RawCookie<'static>> {
    let Some(domain) = raw
        .domain()
        .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
    else {
        return Some(raw);
    };
    if psl::suffix_str(&domain) != Some(domain.as_str()) {
        return Some(raw);
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if host == domain {
        raw.unset_domain();
        Some(raw)
    } else {
        None
    }
}

fn parse_cookie_url(raw: &str) -> std::result::Result<Url, JarError> {
    let url = Url::parse(raw).map_err(|e| JarError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(JarError::MissingHost(raw.to_string()));
    }
    Ok(url)
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let values: Vec<&str> = cookie_headers.filter_map(|v| v.to_str().ok()).collect();
        let stored = self.store_all(values, url);
        if stored > 0 {
            debug!(url = %redact_url(url), stored, "stored response cookies");
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url, PathScope::Matching)
            .and_then(|h| HeaderValue::from_str(&h).ok())
    }
}

/// Where an outbound `Cookie` header came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CookieSource {
    Jar,
    JarAnyPath,
    LoginCache,
    ProcessDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCookie {
    pub header: String,
    pub source: CookieSource,
}

type JarLookup = fn(&CookieJar, &str) -> std::result::Result<Option<String>, JarError>;

/// The single logical session of the process.
#[derive(Debug)]
pub struct SessionState {
    jar: Arc<CookieJar>,
    login_header: RwLock<Option<String>>,
    default_header: Option<String>,
    client: Client,
}

impl SessionState {
    /// Create an empty session and the HTTP client bound to its jar.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let jar = Arc::new(CookieJar::new());
        let mut builder = Client::builder().cookie_provider(Arc::clone(&jar));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            jar,
            login_header: RwLock::new(None),
            default_header: config
                .default_cookie
                .clone()
                .filter(|c| !c.trim().is_empty()),
            client,
        })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    #[must_use]
    pub fn login_header(&self) -> Option<String> {
        self.login_header.read().clone()
    }

    /// Resolve the `Cookie` header for a request to `url`.
    #[must_use]
    pub fn resolve_cookie_header(&self, url: &str) -> Option<ResolvedCookie> {
        let lookups: [(CookieSource, JarLookup); 2] = [
            (CookieSource::Jar, CookieJar::lookup),
            (CookieSource::JarAnyPath, CookieJar::lookup_any_path),
        ];
        for (source, lookup) in lookups {
            match lookup(&self.jar, url) {
                Ok(Some(header)) => return Some(ResolvedCookie { header, source }),
                Ok(None) => {}
                Err(e) => warn!(error = %e, ?source, "cookie jar lookup failed"),
            }
        }

        if let Some(header) = self.login_header() {
            return Some(ResolvedCookie {
                header,
                source: CookieSource::LoginCache,
            });
        }

        self.default_header.clone().map(|header| ResolvedCookie {
            header,
            source: CookieSource::ProcessDefault,
        })
    }

    /// Record login cookies under both the login origin and the API origin, then cache the
    /// flattened header for the API origin. Returns the number of values accepted.
    pub fn remember_login(&self, set_cookies: &[String], login_url: &Url, api_url: &Url) -> usize {
        let login_origin = origin_root(login_url);
        let api_origin = origin_root(api_url);

        let mut stored = self
            .jar
            .store_all(set_cookies.iter().map(String::as_str), &login_origin);
        if api_origin != login_origin {
            stored += self
                .jar
                .store_all(set_cookies.iter().map(String::as_str), &api_origin);
        }

        let header = self.jar.header_for(&api_origin, PathScope::AnyPath);
        debug!(
            stored,
            cached = header.is_some(),
            api_origin = %api_origin,
            "recorded login cookies"
        );
        *self.login_header.write() = header;
        stored
    }

    /// Drop every cookie and the cached login header. Returns how many cookies were removed.
    pub fn clear(&self) -> usize {
        *self.login_header.write() = None;
        self.jar.clear()
    }
}

/// `scheme://host[:port]/` for `url`.
#[must_use]
pub fn origin_root(url: &Url) -> Url {
    let mut root = url.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("url")
    }

    #[test]
    fn stored_cookie_view_carries_attributes_but_no_value() {
        let jar = CookieJar::new();
        let login = url("https://erp.example.com/entity/auth/login");
        assert!(jar.store("ASP.NET_SessionId=abc; path=/; HttpOnly; Secure", &login));
        assert!(jar.store("a=1", &login));

        let cookies = jar.cookies_for(&url("https://erp.example.com/"));
        assert_eq!(cookies.len(), 2);
        let session = &cookies[0];
        assert_eq!(session.name, "ASP.NET_SessionId");
        assert_eq!(session.value, "abc");
        assert_eq!(session.domain, "erp.example.com");
        assert_eq!(session.path, "/");
        assert!(session.secure && session.http_only);
        assert_eq!(cookies[1].path, "/entity/auth");

        let v = serde_json::to_value(session).expect("serializes");
        assert!(v.get("value").is_none());
        assert_eq!(v["httpOnly"], true);
    }

    #[test]
    fn rejects_malformed_and_foreign_cookies() {
        let jar = CookieJar::new();
        let u = url("http://erp.example.com/");
        assert!(!jar.store("a=1; Domain=other.com", &u));
        assert!(!jar.store("=1", &u));
        assert!(!jar.store("novalue", &u));
        assert!(jar.is_empty());
    }

    #[test]
    fn public_suffix_domains_are_rejected() {
        let jar = CookieJar::new();
        let u = url("https://erp.example.com/");
        assert!(!jar.store("a=b; Domain=com; Path=/", &u));
        assert!(!jar.store("c=d; Domain=.co.uk; Path=/", &url("https://erp.example.co.uk/")));
        assert!(jar.is_empty());
        assert_eq!(jar.lookup("https://other.com/").expect("lookup"), None);

        assert!(jar.store("e=f; Domain=example.com; Path=/", &u));
        assert_eq!(
            jar.lookup("https://api.example.com/").expect("lookup").as_deref(),
            Some("e=f")
        );
    }

    #[test]
    fn expiry_comes_from_expires_or_max_age() {
        let jar = CookieJar::new();
        let u = url("http://h/");
        assert!(!jar.store("old=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", &u));
        assert!(jar.store("later=1; expires=Fri, 01-Jan-2100 00:00:00 GMT", &u));
        assert!(jar.store("soon=1; Max-Age=3600; Expires=Wed, 21 Oct 2015 07:28:00 GMT", &u));

        let cookies = jar.cookies_for(&u);
        let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["later", "soon"]);
        assert!(cookies.iter().all(|c| c.expires.is_some_and(|at| at > Utc::now())));
    }

    #[test]
    fn expired_cookie_removes_existing_slot() {
        let jar = CookieJar::new();
        let u = url("http://h/");
        assert!(jar.store("a=1; Path=/", &u));
        assert_eq!(jar.len(), 1);
        assert!(!jar.store("a=; Path=/; Max-Age=0", &u));
        assert!(jar.is_empty());
    }

    #[test]
    fn lookup_respects_path_and_domain() {
        let jar = CookieJar::new();
        jar.store("root=1; Path=/", &url("http://erp.example.com/"));
        jar.store("auth=2; Path=/entity/auth", &url("http://erp.example.com/"));
        jar.store("wide=3; Domain=example.com; Path=/", &url("http://erp.example.com/"));

        let header = jar
            .lookup("http://erp.example.com/entity/auth/login")
            .expect("lookup")
            .expect("cookies");
        assert_eq!(header, "auth=2; root=1; wide=3");

        let header = jar
            .lookup("http://erp.example.com/entity/Default/StockItem")
            .expect("lookup")
            .expect("cookies");
        assert_eq!(header, "root=1; wide=3");

        let header = jar
            .lookup("http://api.example.com/x")
            .expect("lookup")
            .expect("cookies");
        assert_eq!(header, "wide=3");

        assert_eq!(jar.lookup("http://elsewhere.org/").expect("lookup"), None);
    }

    #[test]
    fn any_path_lookup_ignores_cookie_path() {
        let jar = CookieJar::new();
        jar.store("auth=2; Path=/entity/auth", &url("http://h/"));
        assert_eq!(jar.lookup("http://h/other").expect("lookup"), None);
        assert_eq!(
            jar.lookup_any_path("http://h/other").expect("lookup"),
            Some("auth=2".to_string())
        );
    }

    #[test]
    fn secure_cookies_are_not_sent_over_http() {
        let jar = CookieJar::new();
        jar.store("s=1; Secure; Path=/", &url("https://h/"));
        assert_eq!(jar.lookup("http://h/").expect("lookup"), None);
        assert_eq!(jar.lookup("https://h/").expect("lookup"), Some("s=1".to_string()));
    }

    #[test]
    fn lookup_errors_are_distinct_from_no_cookie() {
        let jar = CookieJar::new();
        assert!(matches!(
            jar.lookup("not a url"),
            Err(JarError::InvalidUrl { .. })
        ));
        assert!(matches!(
            jar.lookup("data:text/plain,hi"),
            Err(JarError::MissingHost(_))
        ));
        assert_eq!(jar.lookup("http://h/").expect("lookup"), None);
    }

    #[test]
    fn resolution_falls_back_to_login_cache_then_default() {
        let session = SessionState::new(&RuntimeConfig {
            default_cookie: Some("fallback=1".to_string()),
            ..RuntimeConfig::default()
        })
        .expect("session");

        let resolved = session
            .resolve_cookie_header("http://api.local/x")
            .expect("default");
        assert_eq!(resolved.source, CookieSource::ProcessDefault);
        assert_eq!(resolved.header, "fallback=1");

        *session.login_header.write() = Some("cached=1".to_string());
        let resolved = session
            .resolve_cookie_header("not a url")
            .expect("cache");
        assert_eq!(resolved.source, CookieSource::LoginCache);

        session.jar().store("jar=1; Path=/", &url("http://api.local/"));
        let resolved = session
            .resolve_cookie_header("http://api.local/x")
            .expect("jar");
        assert_eq!(resolved.source, CookieSource::Jar);
        assert_eq!(resolved.header, "jar=1");
    }

    #[test]
    fn remember_login_writes_both_origins_and_caches_api_header() {
        let session = SessionState::new(&RuntimeConfig::default()).expect("session");
        let stored = session.remember_login(
            &[".ASPXAUTH=tok; path=/; HttpOnly".to_string()],
            &url("http://login.local:8080/entity/auth/login"),
            &url("http://api.local:9090/entity/Default/23.200.001"),
        );
        assert_eq!(stored, 2);
        assert_eq!(session.login_header().as_deref(), Some(".ASPXAUTH=tok"));
        assert_eq!(
            session
                .jar()
                .lookup("http://login.local:8080/anything")
                .expect("lookup")
                .as_deref(),
            Some(".ASPXAUTH=tok")
        );

        assert_eq!(session.clear(), 2);
        assert_eq!(session.login_header(), None);
        assert!(session.jar().is_empty());
    }
}
