use myob_http_tools::config::RuntimeConfig;
use serde::{Deserialize, Serialize};

/// Operations whose id, path or summary match this pattern are never exposed.
pub const DEFAULT_EXCLUDE_PATTERN: &str = "(salesperson|salespersons|adhocschema)";

/// Searched in order when no spec path is configured.
pub const SPEC_FALLBACK_CANDIDATES: [&str; 3] =
    ["./openapi.json", "./spec/openapi.json", "../openapi.json"];

/// Configuration for the ERP tool source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    /// `OpenAPI` document path (JSON or YAML). When unset, [`SPEC_FALLBACK_CANDIDATES`] are
    /// tried.
    #[serde(default)]
    pub spec: Option<String>,

    /// Override base URL from spec (`servers[0].url`).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Login endpoint. Defaults to `{base origin}/entity/auth/login`.
    #[serde(default)]
    pub login_url: Option<String>,

    /// Logout endpoint. Defaults to `{base origin}/entity/auth/logout`.
    #[serde(default)]
    pub logout_url: Option<String>,

    #[serde(default)]
    pub mode: ServerMode,

    /// Register `login`, `logout`, `ping` and `echo`.
    #[serde(default = "default_true")]
    pub auth_tools: bool,

    /// Prime the login origin with a GET before posting credentials.
    #[serde(default = "default_true")]
    pub login_preflight: bool,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Fallback credentials for `login` and auto-login.
    #[serde(default)]
    pub credentials: CredentialDefaults,

    /// Request/response runtime settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            spec: None,
            base_url: None,
            login_url: None,
            logout_url: None,
            mode: ServerMode::default(),
            auth_tools: true,
            login_preflight: true,
            discovery: DiscoveryConfig::default(),
            credentials: CredentialDefaults::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Which tools a source exposes.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Auth/diagnostic tools plus one tool per `OpenAPI` operation.
    #[default]
    Full,
    /// Auth/diagnostic tools only. The `OpenAPI` document is not loaded.
    Auth,
}

impl ServerMode {
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("auth") {
            Self::Auth
        } else {
            Self::Full
        }
    }
}

/// Operation discovery filters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Case-insensitive regex matched against `"{id} {path} {summary}"`. `None` disables it.
    #[serde(default = "default_exclude_pattern")]
    pub exclude_pattern: Option<String>,

    /// Keep only operations carrying at least one of these tags. Empty keeps all.
    #[serde(default)]
    pub include_tags: Vec<String>,

    /// Drop operations carrying any of these tags.
    #[serde(default)]
    pub exclude_tags: Vec<String>,

    /// Cap on the number of operations exposed.
    #[serde(default)]
    pub max_tools: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            exclude_pattern: default_exclude_pattern(),
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            max_tools: None,
        }
    }
}

/// Credentials used when `login` arguments leave fields out.
///
/// Precedence per field: explicit arguments, then `bundle_json`, then the individual fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefaults {
    /// JSON object with `name|username|user|email`, `password`, `company`, `branch`.
    #[serde(default)]
    pub bundle_json: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Split a comma- or semicolon-separated list, dropping blanks.
#[must_use]
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unnecessary_wraps)]
fn default_exclude_pattern() -> Option<String> {
    Some(DEFAULT_EXCLUDE_PATTERN.to_string())
}
