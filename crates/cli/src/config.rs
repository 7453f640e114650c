use anyhow::Context as _;
use clap::Args;
use myob_http_tools::config::{RequestDefaults, ResponseMode};
use myob_openapi_tools::config::{ApiServerConfig, ServerMode, parse_list};
use std::path::{Path, PathBuf};

/// Connection, discovery and runtime settings. Every value overrides the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// JSON or YAML file holding the full source configuration.
    #[arg(long, env = "MYOB_TOOLS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// `OpenAPI` document (JSON or YAML).
    #[arg(long, env = "MYOB_OPENAPI_PATH", global = true)]
    pub spec: Option<String>,

    #[arg(long, env = "MYOB_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[arg(long, env = "MYOB_LOGIN_URL", global = true)]
    pub login_url: Option<String>,

    #[arg(long, env = "MYOB_LOGOUT_URL", global = true)]
    pub logout_url: Option<String>,

    /// `full` or `auth`.
    #[arg(long, env = "MYOB_MODE", global = true)]
    pub mode: Option<String>,

    #[arg(long, env = "MYOB_INCLUDE_TAGS", global = true)]
    pub include_tags: Option<String>,

    #[arg(long, env = "MYOB_EXCLUDE_TAGS", global = true)]
    pub exclude_tags: Option<String>,

    /// Case-insensitive regex of operations to hide. Empty disables it.
    #[arg(long, env = "MYOB_EXCLUDE_PATTERN", global = true)]
    pub exclude_pattern: Option<String>,

    #[arg(long, env = "MYOB_MAX_TOOLS", global = true)]
    pub max_tools: Option<usize>,

    #[arg(long, env = "MYOB_DISABLE_AUTH_TOOLS", global = true, num_args = 0..=1, default_missing_value = "true", value_parser = parse_bool)]
    pub disable_auth_tools: Option<bool>,

    /// `summary` or `full`.
    #[arg(long, env = "MYOB_RESPONSE_MODE", global = true)]
    pub response_mode: Option<String>,

    #[arg(long, env = "MYOB_SAMPLE_SIZE", global = true)]
    pub sample_size: Option<usize>,

    #[arg(long, env = "MYOB_PREVIEW_MAX_BYTES", global = true)]
    pub preview_max_bytes: Option<usize>,

    #[arg(long, env = "MYOB_APPLY_DEFAULTS", global = true, num_args = 0..=1, default_missing_value = "true", value_parser = parse_bool)]
    pub apply_defaults: Option<bool>,

    #[arg(long, env = "DEFAULT_TOP", global = true)]
    pub default_top: Option<u64>,

    #[arg(long, env = "DEFAULT_SELECT", global = true)]
    pub default_select: Option<String>,

    #[arg(long, env = "MYOB_DEBUG_HTTP", global = true, num_args = 0..=1, default_missing_value = "true", value_parser = parse_bool)]
    pub debug_http: Option<bool>,

    /// `Cookie` header used when the session holds no cookies.
    #[arg(long, env = "MYOB_COOKIE", global = true, hide_env_values = true)]
    pub cookie: Option<String>,

    #[arg(long, env = "MYOB_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "MYOB_AUTOLOGIN_JSON", global = true, hide_env_values = true)]
    pub autologin_json: Option<String>,

    #[arg(long, env = "MYOB_LOGIN_NAME", global = true)]
    pub login_name: Option<String>,

    #[arg(long, env = "MYOB_LOGIN_PASSWORD", global = true, hide_env_values = true)]
    pub login_password: Option<String>,

    #[arg(long, env = "MYOB_LOGIN_COMPANY", global = true)]
    pub login_company: Option<String>,

    #[arg(long, env = "MYOB_LOGIN_BRANCH", global = true)]
    pub login_branch: Option<String>,
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    Ok(myob_http_tools::config::parse_flag(raw))
}

impl ConnectionArgs {
    /// Load the config file (if any) and overlay these settings on it.
    pub fn resolve(self) -> anyhow::Result<ApiServerConfig> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => ApiServerConfig::default(),
        };
        Ok(self.apply(base))
    }

    fn apply(self, mut cfg: ApiServerConfig) -> ApiServerConfig {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set_opt(&mut cfg.spec, self.spec);
        set_opt(&mut cfg.base_url, self.base_url);
        set_opt(&mut cfg.login_url, self.login_url);
        set_opt(&mut cfg.logout_url, self.logout_url);
        set(&mut cfg.mode, self.mode.as_deref().map(ServerMode::parse_lenient));
        set(&mut cfg.auth_tools, self.disable_auth_tools.map(|d| !d));

        let discovery = &mut cfg.discovery;
        set(&mut discovery.include_tags, self.include_tags.as_deref().map(parse_list));
        set(&mut discovery.exclude_tags, self.exclude_tags.as_deref().map(parse_list));
        if let Some(pattern) = self.exclude_pattern {
            discovery.exclude_pattern = Some(pattern).filter(|p| !p.trim().is_empty());
        }
        set_opt(&mut discovery.max_tools, self.max_tools);

        let runtime = &mut cfg.runtime;
        set(
            &mut runtime.shape.mode,
            self.response_mode.as_deref().map(ResponseMode::parse_lenient),
        );
        set(&mut runtime.shape.sample_size, self.sample_size);
        set(&mut runtime.shape.preview_max_bytes, self.preview_max_bytes);
        set(&mut runtime.defaults.apply, self.apply_defaults);
        set(&mut runtime.defaults.top, self.default_top);
        set(
            &mut runtime.defaults.select,
            self.default_select.as_deref().map(RequestDefaults::parse_select),
        );
        set(&mut runtime.debug_http, self.debug_http);
        set_opt(&mut runtime.default_cookie, self.cookie);
        set_opt(&mut runtime.timeout_secs, self.timeout_secs);

        let creds = &mut cfg.credentials;
        set_opt(&mut creds.bundle_json, self.autologin_json);
        set_opt(&mut creds.name, self.login_name);
        set_opt(&mut creds.password, self.login_password);
        set_opt(&mut creds.company, self.login_company);
        set_opt(&mut creds.branch, self.login_branch);

        cfg
    }
}

/// Read a JSON or YAML [`ApiServerConfig`].
pub fn load_config(path: &Path) -> anyhow::Result<ApiServerConfig> {
    let bytes = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: ApiServerConfig =
        serde_yaml::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn flags_override_file_values() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            f,
            "baseUrl: https://file.example.com/entity/Default/23.200.001\nmode: auth\ndiscovery:\n  maxTools: 3\nruntime:\n  shape:\n    sampleSize: 9"
        )
        .expect("write");

        let args = ConnectionArgs {
            config: Some(f.path().to_path_buf()),
            base_url: Some("https://flag.example.com/entity".to_string()),
            include_tags: Some("StockItem;Customer".to_string()),
            exclude_pattern: Some(String::new()),
            disable_auth_tools: Some(true),
            default_select: Some("InventoryID, Description".to_string()),
            ..ConnectionArgs::default()
        };
        let cfg = args.resolve().expect("resolve");

        assert_eq!(cfg.base_url.as_deref(), Some("https://flag.example.com/entity"));
        assert_eq!(cfg.mode, ServerMode::Auth);
        assert_eq!(cfg.discovery.max_tools, Some(3));
        assert_eq!(cfg.discovery.include_tags, vec!["StockItem", "Customer"]);
        assert!(cfg.discovery.exclude_pattern.is_none());
        assert!(!cfg.auth_tools);
        assert_eq!(cfg.runtime.shape.sample_size, 9);
        assert_eq!(cfg.runtime.defaults.select, vec!["InventoryID", "Description"]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = ConnectionArgs {
            config: Some(PathBuf::from("/definitely/not/here.yaml")),
            ..ConnectionArgs::default()
        };
        let err = args.resolve().expect_err("missing");
        assert!(err.to_string().contains("read config"));
    }
}
