use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SAMPLE_SIZE: usize = 5;
pub const DEFAULT_PREVIEW_MAX_BYTES: usize = 12_000;
pub const MIN_PREVIEW_MAX_BYTES: usize = 512;
pub const DEFAULT_TOP: u64 = 50;

/// How successful responses are rendered into `structuredContent`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Array payloads are reduced to `count` + `sample`.
    #[default]
    Summary,
    /// The full payload is returned under `data`.
    Full,
}

impl ResponseMode {
    /// Parse a user-supplied mode. Anything other than `full` (any casing) means summary.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("full") {
            Self::Full
        } else {
            Self::Summary
        }
    }
}

/// Response shaping settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeConfig {
    #[serde(default)]
    pub mode: ResponseMode,

    /// Number of leading elements kept in `sample` (minimum 1).
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Cap for the pretty-printed preview in the text content (minimum 512).
    #[serde(default = "default_preview_max_bytes")]
    pub preview_max_bytes: usize,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            mode: ResponseMode::default(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            preview_max_bytes: DEFAULT_PREVIEW_MAX_BYTES,
        }
    }
}

impl ShapeConfig {
    #[must_use]
    pub fn effective_sample_size(&self) -> usize {
        self.sample_size.max(1)
    }

    #[must_use]
    pub fn effective_preview_max_bytes(&self) -> usize {
        self.preview_max_bytes.max(MIN_PREVIEW_MAX_BYTES)
    }
}

/// Defaults injected into GET requests when `apply` is enabled.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestDefaults {
    #[serde(default)]
    pub apply: bool,

    /// `$top` used when the caller did not supply one.
    #[serde(default = "default_top")]
    pub top: u64,

    /// Fields joined into `$select` when the caller did not supply one. Empty means no default.
    #[serde(default)]
    pub select: Vec<String>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            apply: false,
            top: DEFAULT_TOP,
            select: Vec::new(),
        }
    }
}

impl RequestDefaults {
    /// Parse a comma-separated field list (blank entries dropped).
    #[must_use]
    pub fn parse_select(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Process-wide runtime configuration for the execution engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub shape: ShapeConfig,

    #[serde(default)]
    pub defaults: RequestDefaults,

    /// Log outbound requests and inbound statuses at `info` instead of `debug`.
    #[serde(default)]
    pub debug_http: bool,

    /// Cookie header used when neither the jar nor a login provides one.
    #[serde(default)]
    pub default_cookie: Option<String>,

    /// Per-request timeout in seconds. `None` or `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RuntimeConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

fn default_preview_max_bytes() -> usize {
    DEFAULT_PREVIEW_MAX_BYTES
}

fn default_top() -> u64 {
    DEFAULT_TOP
}

/// Interpret `1`, `true` or `yes` (any casing) as enabled.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
