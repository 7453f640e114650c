//! ERP tool source runtime.
//!
//! [`ErpToolSource`] exposes every discovered ERP operation as an MCP tool, next to the
//! `login`/`logout` session tools and the `ping`/`echo` diagnostics. All tools share one
//! [`SessionState`], so cookies from `login` are carried by every later call.

use crate::auth::{self, AuthEndpoints, LoginOutcome, LogoutOutcome};
use crate::config::{ApiServerConfig, ServerMode};
use crate::discovery::{
    discover_operations, document_base_url, document_title, load_document, resolve_spec_path,
};
use crate::error::{OpenApiToolsError, Result};
use crate::pagination::PageSource;
use async_trait::async_trait;
use myob_http_tools::args::{CanonicalArgs, normalize_arguments, scalar_to_string, unwrap_call_input};
use myob_http_tools::request::OperationDescriptor;
use myob_http_tools::response_shaping::shape_response;
use myob_http_tools::runtime::{ExecutionResult, HttpExecutor};
use myob_http_tools::semantics::{annotations_for_method, local_annotations};
use myob_http_tools::session::SessionState;
use parking_lot::RwLock;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool, ToolAnnotations};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const LOGIN_TOOL: &str = "login";
pub const LOGIN_RAW_TOOL: &str = "login_raw";
pub const LOGOUT_TOOL: &str = "logout";
pub const PING_TOOL: &str = "ping";
pub const ECHO_TOOL: &str = "echo";

/// Built-in tool names. Discovered operations never reuse them.
pub const BUILTIN_TOOLS: [&str; 5] =
    [LOGIN_TOOL, LOGIN_RAW_TOOL, LOGOUT_TOOL, PING_TOOL, ECHO_TOOL];

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool source exposing ERP operations and the session tools.
#[derive(Clone)]
pub struct ErpToolSource {
    /// Source name (used for logs and error context).
    name: String,
    config: ApiServerConfig,
    /// Discovered operations, in document order.
    operations: Arc<RwLock<Vec<OperationDescriptor>>>,
    /// Base URL for API calls, set by `start`.
    base_url: Arc<RwLock<Option<String>>>,
    /// `info.title` of the loaded document.
    title: Arc<RwLock<Option<String>>>,
    endpoints: Arc<RwLock<Option<AuthEndpoints>>>,
    executor: HttpExecutor,
    startup_timeout: Duration,
}

impl ErpToolSource {
    /// Create a tool source with an empty session.
    ///
    /// No document is read here; call [`Self::start`] (or use [`Self::build`]) before listing or
    /// calling tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(name: impl Into<String>, config: ApiServerConfig) -> Result<Self> {
        let session = Arc::new(SessionState::new(&config.runtime)?);
        let executor = HttpExecutor::new(session, config.runtime.clone());
        Ok(Self {
            name: name.into(),
            config,
            operations: Arc::new(RwLock::new(Vec::new())),
            base_url: Arc::new(RwLock::new(None)),
            title: Arc::new(RwLock::new(None)),
            endpoints: Arc::new(RwLock::new(None)),
            executor,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        })
    }

    /// Create and start a tool source in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built or [`Self::start`] fails.
    pub async fn build(name: impl Into<String>, config: ApiServerConfig) -> Result<Self> {
        let src = Self::new(name, config)?;
        src.start().await?;
        Ok(src)
    }

    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Load the document (unless in auth mode), discover operations and resolve endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be found, read or parsed, if no usable base URL
    /// is available, or if discovery fails.
    pub async fn start(&self) -> Result<()> {
        let (base_url, title, operations) = match self.config.mode {
            ServerMode::Full => self.load_operations().await?,
            ServerMode::Auth => {
                let base_url = self
                    .config
                    .base_url
                    .clone()
                    .or_else(|| self.config.login_url.clone())
                    .ok_or_else(|| {
                        OpenApiToolsError::Startup(format!(
                            "'{}' runs in auth mode but has neither a base URL nor a login URL",
                            self.name
                        ))
                    })?;
                (base_url, None, Vec::new())
            }
        };

        let base_url = validate_base_url(&base_url)?;
        let endpoints = AuthEndpoints::resolve(
            &base_url,
            self.config.login_url.as_deref(),
            self.config.logout_url.as_deref(),
        )?;

        tracing::info!(
            source = %self.name,
            base_url = %base_url,
            login_url = %endpoints.login,
            mode = ?self.config.mode,
            "Discovered {} operation tools",
            operations.len()
        );

        *self.base_url.write() = Some(base_url);
        *self.title.write() = title;
        *self.endpoints.write() = Some(endpoints);
        *self.operations.write() = operations;
        Ok(())
    }

    async fn load_operations(&self) -> Result<(String, Option<String>, Vec<OperationDescriptor>)> {
        let path = resolve_spec_path(self.config.spec.as_deref())?;
        let loading = tokio::task::spawn_blocking(move || load_document(&path));
        let doc = match tokio::time::timeout(self.startup_timeout, loading).await {
            Ok(Ok(loaded)) => loaded?,
            Ok(Err(join)) => {
                return Err(OpenApiToolsError::Startup(format!(
                    "Spec loading task for '{}' failed: {join}",
                    self.name
                )));
            }
            Err(_) => {
                return Err(OpenApiToolsError::Startup(format!(
                    "Startup timeout after {}s for '{}'",
                    self.startup_timeout.as_secs(),
                    self.name
                )));
            }
        };

        let base_url = self
            .config
            .base_url
            .clone()
            .or_else(|| document_base_url(&doc))
            .ok_or_else(|| {
                OpenApiToolsError::OpenApi(
                    "No base URL configured and none found in spec".to_string(),
                )
            })?;

        let reserved: HashSet<String> = if self.config.auth_tools {
            BUILTIN_TOOLS.iter().map(|s| (*s).to_string()).collect()
        } else {
            HashSet::new()
        };
        let operations = discover_operations(&doc, &self.config.discovery, &reserved)?;
        Ok((base_url, document_title(&doc), operations))
    }

    /// List the MCP `Tool`s exposed by this source.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        if self.config.auth_tools {
            tools.extend(builtin_tools());
        }
        let schema = Arc::new(operation_input_schema());
        tools.extend(self.operations.read().iter().map(|op| {
            let mut tool = Tool::new(
                op.id.clone(),
                op.summary.clone().unwrap_or_default(),
                Arc::clone(&schema),
            );
            tool.annotations = Some(annotations_for_method(op.method));
            tool
        }));
        tools
    }

    /// Execute a tool call.
    ///
    /// HTTP failures come back as results with `isError: true`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the tool name is unknown
    /// - a required path parameter is missing (nothing is sent)
    /// - the source has not been started
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if self.config.auth_tools {
            match name {
                LOGIN_TOOL => return Ok(self.login(&arguments).await?.into_call_tool_result()),
                LOGIN_RAW_TOOL => {
                    return Ok(self.login_raw(&arguments).await?.into_call_tool_result());
                }
                LOGOUT_TOOL => return Ok(self.logout().await?.into_call_tool_result()),
                PING_TOOL => return Ok(self.ping()),
                ECHO_TOOL => return Ok(echo(&arguments)),
                _ => {}
            }
        }

        let args = normalize_arguments(&arguments);
        let result = PageSource::execute(self, name, &args).await?;
        Ok(shape_response(&result, &self.config.runtime.shape).into_call_tool_result())
    }

    /// Log in with explicit arguments, falling back to configured credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has not been started.
    pub async fn login(&self, arguments: &Value) -> Result<LoginOutcome> {
        let endpoints = self.endpoints()?;
        Ok(auth::login(
            self.session(),
            &endpoints,
            arguments,
            &self.config.credentials,
            self.config.login_preflight,
        )
        .await)
    }

    /// Log in from the arguments only, without configured credentials or preflight.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has not been started.
    pub async fn login_raw(&self, arguments: &Value) -> Result<LoginOutcome> {
        let endpoints = self.endpoints()?;
        Ok(auth::login_raw(self.session(), &endpoints, arguments).await)
    }

    /// # Errors
    ///
    /// Returns an error if the source has not been started.
    pub async fn logout(&self) -> Result<LogoutOutcome> {
        let endpoints = self.endpoints()?;
        Ok(auth::logout(self.session(), &endpoints).await)
    }

    /// Log in from configured credentials when they are complete. Failures are logged only.
    pub async fn auto_login(&self) -> bool {
        match self.endpoints() {
            Ok(endpoints) => {
                auth::auto_login(self.session(), &endpoints, &self.config.credentials).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "auto-login skipped");
                false
            }
        }
    }

    fn ping(&self) -> CallToolResult {
        let base_url = self.base_url();
        let structured = json!({
            "ok": true,
            "baseUrl": base_url,
            "title": self.spec_title(),
            "operations": self.operations.read().len(),
            "session": self.session().login_header().is_some() || !self.session().jar().is_empty(),
        });
        CallToolResult {
            content: vec![Content::text(format!(
                "pong {}",
                base_url.as_deref().unwrap_or("(not started)")
            ))],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        }
    }

    fn endpoints(&self) -> Result<AuthEndpoints> {
        self.endpoints.read().clone().ok_or_else(|| {
            OpenApiToolsError::Startup(format!("Tool source '{}' has not been started", self.name))
        })
    }

    fn operation(&self, name: &str) -> Option<OperationDescriptor> {
        self.operations.read().iter().find(|op| op.id == name).cloned()
    }

    /// Discovered operations, in document order.
    #[must_use]
    pub fn operations(&self) -> Vec<OperationDescriptor> {
        self.operations.read().clone()
    }

    /// The base URL resolved during `start`.
    ///
    /// Returns `None` if the source has not been started yet.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.base_url.read().clone()
    }

    /// The `info.title` of the loaded document.
    #[must_use]
    pub fn spec_title(&self) -> Option<String> {
        self.title.read().clone()
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        self.executor.session()
    }

    #[must_use]
    pub fn config(&self) -> &ApiServerConfig {
        &self.config
    }
}

#[async_trait]
impl PageSource for ErpToolSource {
    async fn execute(&self, tool: &str, args: &CanonicalArgs) -> Result<ExecutionResult> {
        let op = self
            .operation(tool)
            .ok_or_else(|| OpenApiToolsError::Runtime(format!("Tool not found: {tool}")))?;
        let base_url = self.base_url().ok_or_else(|| {
            OpenApiToolsError::Startup(format!("Tool source '{}' has not been started", self.name))
        })?;
        Ok(self.executor.call(&op, args, &base_url).await?)
    }
}

fn validate_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(trimmed.to_string()),
        Ok(_) | Err(_) => Err(OpenApiToolsError::OpenApi(format!(
            "Invalid baseUrl '{raw}': must be an absolute http(s) URL (set baseUrl explicitly)"
        ))),
    }
}

fn echo(arguments: &Value) -> CallToolResult {
    let input = unwrap_call_input(arguments);
    let text = ["text", "message"]
        .iter()
        .find_map(|k| input.get(*k).filter(|v| !v.is_null()))
        .map_or_else(|| scalar_to_string(&input), scalar_to_string);
    CallToolResult {
        content: vec![Content::text(text.clone())],
        structured_content: Some(json!({ "text": text })),
        is_error: Some(false),
        meta: None,
    }
}

fn builtin_tools() -> Vec<Tool> {
    let session = annotations_for_method(myob_http_tools::request::HttpMethod::Post);
    let defs: [(&str, &str, Value, ToolAnnotations); 5] = [
        (
            LOGIN_TOOL,
            "Login to MYOB (cookie session). Required before calling other tools.",
            login_input_schema(),
            session.clone(),
        ),
        (
            LOGIN_RAW_TOOL,
            "Login using a raw JSON string or object. Fields: name,password,company,branch.",
            login_input_schema(),
            session.clone(),
        ),
        (
            LOGOUT_TOOL,
            "Logout current MYOB session and clear cookies.",
            json!({"type": "object", "properties": {}}),
            session,
        ),
        (
            PING_TOOL,
            "Report the ERP base URL and session state.",
            json!({"type": "object", "properties": {}}),
            local_annotations(),
        ),
        (
            ECHO_TOOL,
            "Return the given text.",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
            }),
            local_annotations(),
        ),
    ];
    defs.into_iter()
        .map(|(name, description, schema, annotations)| {
            let schema = schema.as_object().cloned().unwrap_or_else(JsonObject::new);
            let mut tool = Tool::new(name, description, Arc::new(schema));
            tool.annotations = Some(annotations);
            tool
        })
        .collect()
}

fn login_input_schema() -> Value {
    let string = json!({"type": "string"});
    json!({
        "type": "object",
        "properties": {
            "name": string,
            "username": string,
            "user": string,
            "email": string,
            "password": string,
            "company": string,
            "branch": string,
        },
    })
}

/// The input schema every operation tool advertises. Callers may use either the `$`-prefixed
/// OData options or their bare aliases.
fn operation_input_schema() -> JsonObject {
    let free_object = json!({"type": "object", "additionalProperties": true});
    let scalar = json!({"type": ["string", "number", "boolean"]});
    let mut properties = serde_json::Map::new();
    for key in ["pathParams", "query", "params", "queryParams", "headers"] {
        properties.insert(key.to_string(), free_object.clone());
    }
    properties.insert("body".to_string(), json!({}));
    for key in ["$select", "$filter", "$expand", "$custom", "$skip", "$top"] {
        properties.insert(key.to_string(), scalar.clone());
        properties.insert(key.trim_start_matches('$').to_string(), scalar.clone());
    }
    properties.insert(
        "rawQuery".to_string(),
        json!({"type": "string", "description": "Literal query string; replaces query options"}),
    );
    properties.insert("queryString".to_string(), json!({"type": "string"}));

    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("additionalProperties".to_string(), json!(true));
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SPEC: &str = r#"{
      "openapi": "3.0.1",
      "info": {"title": "MYOB Acumatica", "version": "23.200.001"},
      "servers": [{"url": "http://127.0.0.1:9/entity/Default/23.200.001"}],
      "paths": {
        "/StockItem": {
          "get": {"operationId": "StockItem_GetList", "summary": "List stock items", "tags": ["StockItem"]}
        },
        "/StockItem/{id}": {
          "delete": {"operationId": "StockItem_DeleteById", "tags": ["StockItem"]}
        },
        "/Echo": {
          "post": {"operationId": "echo"}
        }
      }
    }"#;

    fn spec_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(SPEC.as_bytes()).expect("write spec");
        f
    }

    fn config_for(path: &std::path::Path) -> ApiServerConfig {
        ApiServerConfig {
            spec: Some(path.display().to_string()),
            ..ApiServerConfig::default()
        }
    }

    #[tokio::test]
    async fn lists_builtin_tools_then_operations() {
        let f = spec_file();
        let src = ErpToolSource::build("erp", config_for(f.path()))
            .await
            .expect("build");

        let names: Vec<String> = src.list_tools().iter().map(|t| t.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "login",
                "login_raw",
                "logout",
                "ping",
                "echo",
                "StockItem_GetList",
                "StockItem_DeleteById",
                "echo_1"
            ]
        );
        assert_eq!(src.spec_title().as_deref(), Some("MYOB Acumatica"));
        assert_eq!(
            src.base_url().as_deref(),
            Some("http://127.0.0.1:9/entity/Default/23.200.001")
        );

        let tools = src.list_tools();
        let get = tools.iter().find(|t| t.name == "StockItem_GetList").expect("tool");
        let ann = get.annotations.as_ref().expect("annotations");
        assert_eq!(ann.read_only_hint, Some(true));
        assert!(get.input_schema.get("properties").is_some_and(|p| p.get("rawQuery").is_some()));
    }

    #[tokio::test]
    async fn auth_tools_can_be_disabled() {
        let f = spec_file();
        let cfg = ApiServerConfig {
            auth_tools: false,
            ..config_for(f.path())
        };
        let src = ErpToolSource::build("erp", cfg).await.expect("build");
        let names: Vec<String> = src.list_tools().iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["StockItem_GetList", "StockItem_DeleteById", "echo"]);
    }

    #[tokio::test]
    async fn auth_mode_skips_the_document() {
        let cfg = ApiServerConfig {
            spec: Some("/definitely/not/here.json".to_string()),
            base_url: Some("https://erp.example.com/entity/Default/23.200.001".to_string()),
            mode: ServerMode::Auth,
            ..ApiServerConfig::default()
        };
        let src = ErpToolSource::build("erp", cfg).await.expect("build");
        assert_eq!(src.list_tools().len(), 4);
        assert!(src.operations().is_empty());

        let pong = src.call_tool("ping", json!({})).await.expect("ping");
        let v = serde_json::to_value(pong).expect("serializes");
        assert_eq!(
            v["structuredContent"]["baseUrl"],
            json!("https://erp.example.com/entity/Default/23.200.001")
        );
        assert_eq!(v["structuredContent"]["session"], json!(false));
    }

    #[tokio::test]
    async fn unknown_tool_and_missing_path_param_are_errors() {
        let f = spec_file();
        let src = ErpToolSource::build("erp", config_for(f.path()))
            .await
            .expect("build");

        let err = src.call_tool("Nope", json!({})).await.expect_err("unknown");
        assert!(err.to_string().contains("Tool not found: Nope"));

        let err = src
            .call_tool("StockItem_DeleteById", json!({"pathParams": {}}))
            .await
            .expect_err("missing id");
        assert_eq!(err.to_string(), "Missing path param: id");
    }

    #[tokio::test]
    async fn transport_failure_is_a_structured_result() {
        let f = spec_file();
        let src = ErpToolSource::build("erp", config_for(f.path()))
            .await
            .expect("build");
        let res = src
            .call_tool("StockItem_GetList", json!({"top": 5}))
            .await
            .expect("result");
        assert_eq!(res.is_error, Some(true));
        let v = serde_json::to_value(res).expect("serializes");
        assert_eq!(v["structuredContent"]["error"], json!(true));
        assert_eq!(v["structuredContent"]["status"], json!(500));
    }

    #[tokio::test]
    async fn echo_returns_text() {
        let cfg = ApiServerConfig {
            base_url: Some("http://127.0.0.1:9/".to_string()),
            mode: ServerMode::Auth,
            ..ApiServerConfig::default()
        };
        let src = ErpToolSource::build("erp", cfg).await.expect("build");
        let res = src
            .call_tool("echo", json!({"arguments": {"text": "hello"}}))
            .await
            .expect("echo");
        let v = serde_json::to_value(res).expect("serializes");
        assert_eq!(v["content"][0]["text"], json!("hello"));
    }

    #[tokio::test]
    async fn start_errors_are_reported() {
        let cfg = ApiServerConfig {
            mode: ServerMode::Auth,
            ..ApiServerConfig::default()
        };
        let err = ErpToolSource::build("erp", cfg).await.err().expect("no base url");
        assert!(matches!(err, OpenApiToolsError::Startup(_)));

        let cfg = ApiServerConfig {
            base_url: Some("/relative/only".to_string()),
            mode: ServerMode::Auth,
            ..ApiServerConfig::default()
        };
        let err = ErpToolSource::build("erp", cfg).await.err().expect("relative");
        assert!(err.to_string().contains("absolute http(s) URL"));

        let cfg = ApiServerConfig {
            spec: Some("/definitely/not/here.json".to_string()),
            ..ApiServerConfig::default()
        };
        let err = ErpToolSource::build("erp", cfg).await.err().expect("missing file");
        assert!(matches!(err, OpenApiToolsError::OpenApiSpecReadFile { .. }));
    }

    #[tokio::test]
    async fn calls_before_start_fail() {
        let src = ErpToolSource::new("erp", ApiServerConfig::default()).expect("new");
        assert!(src.login(&json!({})).await.is_err());
        assert!(!src.auto_login().await);
        assert!(src.base_url().is_none());
    }
}
