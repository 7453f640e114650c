//! Cookie-session login and logout.
//!
//! The ERP authenticates with a JSON `POST` to its login endpoint and answers with session
//! cookies. Those cookies are written into the shared [`SessionState`] so every later operation
//! call carries them. Neither tool returns an `Err`: failures come back as structured results
//! with `ok: false`.

use crate::config::CredentialDefaults;
use crate::error::{OpenApiToolsError, Result};
use myob_http_tools::args::unwrap_call_input;
use myob_http_tools::runtime::decode_body;
use myob_http_tools::safety::{redact_response_headers, sanitize_reqwest_error};
use myob_http_tools::session::{SessionState, StoredCookie, origin_root};
use reqwest::header::{ACCEPT, CONTENT_TYPE, SET_COOKIE};
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::{debug, info, warn};
use url::Url;

pub const LOGIN_PATH: &str = "entity/auth/login";
pub const LOGOUT_PATH: &str = "entity/auth/logout";

/// Argument keys accepted for the user name, in precedence order.
pub const NAME_KEYS: [&str; 4] = ["name", "username", "user", "email"];

/// Where login and logout requests go, plus the API base whose origin receives login cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login: Url,
    pub logout: Url,
    pub api_base: Url,
}

impl AuthEndpoints {
    /// Explicit URLs win; otherwise both endpoints live under the API base's origin.
    ///
    /// # Errors
    ///
    /// Returns an error if any URL does not parse.
    pub fn resolve(api_base: &str, login: Option<&str>, logout: Option<&str>) -> Result<Self> {
        let api_base = parse_url(api_base)?;
        let origin = origin_root(&api_base);
        let endpoint = |explicit: Option<&str>, path: &str| match explicit
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(url) => parse_url(url),
            None => origin
                .join(path)
                .map_err(|e| OpenApiToolsError::Config(format!("Invalid auth URL: {e}"))),
        };
        Ok(Self {
            login: endpoint(login, LOGIN_PATH)?,
            logout: endpoint(logout, LOGOUT_PATH)?,
            api_base,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| OpenApiToolsError::Config(format!("Invalid URL '{raw}': {e}")))
}

/// Fully resolved login credentials.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub name: String,
    pub password: String,
    pub company: String,
    pub branch: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("password", &"***")
            .field("company", &self.company)
            .field("branch", &self.branch)
            .finish()
    }
}

/// Resolve credentials field by field: `args`, then the JSON bundle, then the individual
/// defaults. Blank values count as missing.
///
/// # Errors
///
/// Returns the names of the fields that could not be resolved.
pub fn resolve_credentials(
    args: &Value,
    defaults: &CredentialDefaults,
) -> std::result::Result<Credentials, Vec<&'static str>> {
    let args = unwrap_call_input(args);
    let empty = Map::new();
    let args = args.as_object().unwrap_or(&empty);

    let bundle = defaults
        .bundle_json
        .as_deref()
        .and_then(|raw| match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                warn!("ignoring credential bundle: not a JSON object");
                None
            }
        })
        .unwrap_or_default();

    let name = first_of(args, &NAME_KEYS)
        .or_else(|| first_of(&bundle, &NAME_KEYS))
        .or_else(|| non_blank(defaults.name.as_deref()));
    let password = first_of(args, &["password"])
        .or_else(|| first_of(&bundle, &["password"]))
        .or_else(|| non_blank(defaults.password.as_deref()));
    let company = first_of(args, &["company"])
        .or_else(|| first_of(&bundle, &["company"]))
        .or_else(|| non_blank(defaults.company.as_deref()));
    let branch = first_of(args, &["branch"])
        .or_else(|| first_of(&bundle, &["branch"]))
        .or_else(|| non_blank(defaults.branch.as_deref()));

    match (name, password, company, branch) {
        (Some(name), Some(password), Some(company), Some(branch)) => Ok(Credentials {
            name,
            password,
            company,
            branch,
        }),
        (name, password, company, branch) => Err([
            ("name", name.is_none()),
            ("password", password.is_none()),
            ("company", company.is_none()),
            ("branch", branch.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, missing)| missing.then_some(field))
        .collect()),
    }
}

fn first_of(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .and_then(|s| non_blank(Some(s)))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[must_use]
pub fn missing_credentials_message(missing: &[&str]) -> String {
    format!(
        "Missing credentials: {}. Provide args or set MYOB_AUTOLOGIN_JSON or MYOB_LOGIN_* env vars.",
        missing.join(", ")
    )
}

/// Structured result of the `login` tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginOutcome {
    pub status_code: u16,
    pub ok: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Cookies now held for the login origin. Values are never serialized.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<StoredCookie>,
    #[serde(skip)]
    text: String,
}

impl LoginOutcome {
    fn failed(status_code: u16, data: Value, text: impl Into<String>) -> Self {
        Self {
            status_code,
            ok: false,
            data,
            origin: None,
            cookies: Vec::new(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_call_tool_result(self) -> CallToolResult {
        outcome_result(&self, &self.text, self.ok)
    }
}

/// Structured result of the `logout` tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogoutOutcome {
    pub status_code: u16,
    pub ok: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Cookies dropped from the session. Zero when the logout request failed.
    pub cleared: usize,
}

impl LogoutOutcome {
    #[must_use]
    pub fn text(&self) -> &'static str {
        if self.ok { "logout ok" } else { "logout failed" }
    }

    #[must_use]
    pub fn into_call_tool_result(self) -> CallToolResult {
        outcome_result(&self, self.text(), self.ok)
    }
}

fn outcome_result<T: Serialize>(outcome: &T, text: &str, ok: bool) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(text.to_string())],
        structured_content: Some(serde_json::to_value(outcome).unwrap_or(Value::Null)),
        is_error: Some(!ok),
        meta: None,
    }
}

/// Log in and record the session cookies.
///
/// With `preflight` set, the login origin root is fetched first so any pre-session cookies are
/// in the jar before credentials are posted. Its outcome is ignored.
pub async fn login(
    session: &SessionState,
    endpoints: &AuthEndpoints,
    args: &Value,
    defaults: &CredentialDefaults,
    preflight: bool,
) -> LoginOutcome {
    let credentials = match resolve_credentials(args, defaults) {
        Ok(c) => c,
        Err(missing) => {
            let message = missing_credentials_message(&missing);
            warn!(missing = ?missing, "login rejected before sending");
            return LoginOutcome::failed(400, Value::String(message.clone()), message);
        }
    };

    if preflight {
        let root = origin_root(&endpoints.login);
        match session.client().get(root.clone()).send().await {
            Ok(resp) => debug!(status = resp.status().as_u16(), url = %root, "login preflight"),
            Err(e) => debug!(error = %sanitize_reqwest_error(&e), "login preflight failed"),
        }
    }

    debug!(url = %endpoints.login, credentials = ?credentials, "login out");
    let sent = session
        .client()
        .post(endpoints.login.clone())
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(&credentials)
        .send()
        .await;

    let response = match sent {
        Ok(r) => r,
        Err(e) => {
            let status = e.status().map_or(500, |s| s.as_u16());
            let message = sanitize_reqwest_error(&e);
            warn!(status, error = %message, "login request failed");
            let data = if message.trim().is_empty() {
                Value::String("Login failed".to_string())
            } else {
                Value::String(message)
            };
            return LoginOutcome::failed(status, data, "login failed");
        }
    };

    let status = response.status();
    let set_cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    debug!(
        status = status.as_u16(),
        headers = ?redact_response_headers(response.headers()),
        "login in"
    );
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let data = match response.bytes().await {
        Ok(bytes) => decode_body(&bytes, content_type.as_deref()),
        Err(e) => Value::String(sanitize_reqwest_error(&e)),
    };

    if !status.is_success() {
        warn!(status = status.as_u16(), "login rejected");
        let data = if data.is_null() {
            Value::String("Login failed".to_string())
        } else {
            data
        };
        return LoginOutcome::failed(status.as_u16(), data, "login failed");
    }

    let stored = session.remember_login(&set_cookies, &endpoints.login, &endpoints.api_base);
    let origin = origin_root(&endpoints.login);
    info!(status = status.as_u16(), stored, "login ok");

    LoginOutcome {
        status_code: status.as_u16(),
        ok: true,
        data,
        origin: Some(origin.origin().ascii_serialization()),
        cookies: session.jar().cookies_for(&origin),
        text: "login ok".to_string(),
    }
}

/// Log in from the payload alone: a JSON string, an object, or a call envelope around either.
///
/// Configured credentials are not consulted and no preflight is sent. The outcome carries the
/// status only; cookies still land in the session.
pub async fn login_raw(
    session: &SessionState,
    endpoints: &AuthEndpoints,
    raw: &Value,
) -> LoginOutcome {
    let none = CredentialDefaults::default();
    if let Err(missing) = resolve_credentials(raw, &none) {
        warn!(missing = ?missing, "raw login rejected before sending");
        let message = format!(
            "Missing fields: {}. Provide JSON with name,password,company,branch.",
            missing.join(", ")
        );
        return LoginOutcome::failed(400, Value::String(message.clone()), message);
    }

    let mut outcome = login(session, endpoints, raw, &none, false).await;
    outcome.origin = None;
    outcome.cookies.clear();
    if outcome.ok {
        outcome.data = Value::Null;
    }
    outcome
}

/// Log out. The session is cleared only when the ERP accepts the request.
pub async fn logout(session: &SessionState, endpoints: &AuthEndpoints) -> LogoutOutcome {
    let sent = session.client().post(endpoints.logout.clone()).send().await;
    let response = match sent {
        Ok(r) => r,
        Err(e) => {
            let message = sanitize_reqwest_error(&e);
            warn!(error = %message, "logout request failed");
            return LogoutOutcome {
                status_code: e.status().map_or(500, |s| s.as_u16()),
                ok: false,
                data: Value::String(message),
                cleared: 0,
            };
        }
    };

    let status = response.status();
    if status.is_success() {
        let cleared = session.clear();
        info!(status = status.as_u16(), cleared, "logout ok");
        LogoutOutcome {
            status_code: status.as_u16(),
            ok: true,
            data: Value::Null,
            cleared,
        }
    } else {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map(|b| decode_body(&b, content_type.as_deref()))
            .unwrap_or(Value::Null);
        warn!(status = status.as_u16(), "logout rejected; session kept");
        LogoutOutcome {
            status_code: status.as_u16(),
            ok: false,
            data: if data.is_null() {
                json!("Logout failed")
            } else {
                data
            },
            cleared: 0,
        }
    }
}

/// Best-effort login from configured credentials only. Returns whether a session was
/// established; nothing is attempted when credentials are incomplete.
pub async fn auto_login(
    session: &SessionState,
    endpoints: &AuthEndpoints,
    defaults: &CredentialDefaults,
) -> bool {
    if let Err(missing) = resolve_credentials(&Value::Null, defaults) {
        debug!(missing = ?missing, "auto-login skipped");
        return false;
    }
    let outcome = login(session, endpoints, &Value::Null, defaults, false).await;
    if outcome.ok {
        info!(status = outcome.status_code, "auto-login completed");
    } else {
        warn!(status = outcome.status_code, "auto-login failed");
    }
    outcome.ok
}
