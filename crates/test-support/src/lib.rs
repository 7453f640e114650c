//! In-process mock of a MYOB/Acumatica instance for integration tests.
//!
//! The mock speaks just enough of the contract-based REST API to exercise the tool engine:
//! cookie login/logout, a paged `StockItem` list, single-record reads and deletes, and an OData
//! `{ "value": [...] }` wrapped `Customer` list. Every API request must carry the session cookie
//! set by login.

use anyhow::Context as _;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const API_PATH: &str = "/entity/Default/23.200.001";
pub const SESSION_COOKIE: &str = ".ASPXAUTH";
pub const SESSION_TOKEN: &str = "mock-session-token";

#[derive(Debug, Clone)]
pub struct MockErpOptions {
    /// Size of the `StockItem` list.
    pub stock_items: usize,
    /// List requests with `$skip` at or beyond this fail with 500.
    pub fail_at_skip: Option<usize>,
    pub username: String,
    pub password: String,
    pub logout_status: StatusCode,
}

impl Default for MockErpOptions {
    fn default() -> Self {
        Self {
            stock_items: 130,
            fail_at_skip: None,
            username: "admin".to_string(),
            password: "secret".to_string(),
            logout_status: StatusCode::NO_CONTENT,
        }
    }
}

/// One request as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub cookie: Option<String>,
}

#[derive(Debug)]
struct MockState {
    options: MockErpOptions,
    requests: Mutex<Vec<RecordedRequest>>,
    login_posts: AtomicUsize,
    logout_posts: AtomicUsize,
}

/// A running mock server. Shuts down when dropped.
pub struct MockErp {
    origin: String,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockErp {
    /// Start a mock with default options on an ephemeral localhost port.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(MockErpOptions::default()).await
    }

    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn spawn_with(options: MockErpOptions) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            options,
            requests: Mutex::new(Vec::new()),
            login_posts: AtomicUsize::new(0),
            logout_posts: AtomicUsize::new(0),
        });

        let api = Router::new()
            .route("/StockItem", get(list_stock_items).put(put_stock_item))
            .route("/StockItem/{id}", get(get_stock_item).delete(delete_stock_item))
            .route("/Customer", get(list_customers));
        let app = Router::new()
            .route("/", get(home))
            .route("/entity/auth/login", post(login))
            .route("/entity/auth/logout", post(logout))
            .nest(API_PATH, api)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock ERP listener")?;
        let addr = listener.local_addr().context("mock ERP local address")?;
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(Self {
            origin: format!("http://{addr}"),
            state,
            shutdown: Some(tx),
        })
    }

    /// `http://127.0.0.1:port`
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Base URL of the entity API.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}{API_PATH}", self.origin)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Requests whose path ends with `suffix`.
    #[must_use]
    pub fn requests_to(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(suffix))
            .collect()
    }

    #[must_use]
    pub fn login_posts(&self) -> usize {
        self.state.login_posts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logout_posts(&self) -> usize {
        self.state.logout_posts.load(Ordering::SeqCst)
    }

    /// An `OpenAPI` document describing the mock, with `servers[0]` pointing at it.
    #[must_use]
    pub fn openapi_document(&self) -> String {
        openapi_document(&self.api_base())
    }
}

impl Drop for MockErp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// `OpenAPI` document for the mock's entity endpoints.
#[must_use]
pub fn openapi_document(api_base: &str) -> String {
    json!({
        "openapi": "3.0.1",
        "info": {"title": "Mock MYOB Acumatica", "version": "23.200.001"},
        "servers": [{"url": api_base}],
        "paths": {
            "/StockItem": {
                "get": {"operationId": "StockItem_GetList", "summary": "Retrieves stock items", "tags": ["StockItem"]},
                "put": {"operationId": "StockItem_PutEntity", "summary": "Creates or updates a stock item", "tags": ["StockItem"]}
            },
            "/StockItem/{id}": {
                "get": {"operationId": "StockItem_GetById", "tags": ["StockItem"]},
                "delete": {"operationId": "StockItem_DeleteById", "tags": ["StockItem"]}
            },
            "/Customer": {
                "get": {"operationId": "Customer_GetList", "tags": ["Customer"]}
            },
            "/Salesperson": {
                "get": {"operationId": "Salesperson_GetList", "tags": ["Salesperson"]}
            }
        }
    })
    .to_string()
}

fn record(state: &MockState, method: &Method, uri: &Uri, headers: &HeaderMap) {
    state.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("{SESSION_COOKIE}={SESSION_TOKEN}");
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .any(|pair| pair.trim() == expected)
}

fn not_logged_in() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "You are not logged in."})),
    )
        .into_response()
}

fn stock_item(i: usize) -> Value {
    json!({
        "id": format!("00000000-0000-0000-0000-{i:012}"),
        "InventoryID": {"value": format!("ITEM-{i:04}")},
        "Description": {"value": format!("Stock item {i}")},
        "ItemStatus": {"value": "Active"},
    })
}

async fn home(State(state): State<Arc<MockState>>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &method, &uri, &headers);
    (
        [(header::SET_COOKIE, "Locale=Culture=en-US; Path=/")],
        "MYOB Acumatica",
    )
        .into_response()
}

async fn login(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, &method, &uri, &headers);
    state.login_posts.fetch_add(1, Ordering::SeqCst);

    let field = |k: &str| body.get(k).and_then(Value::as_str).unwrap_or_default();
    if field("name") != state.options.username || field("password") != state.options.password {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Invalid credentials. Please try again."})),
        )
            .into_response();
    }
    if field("company").is_empty() || field("branch").is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Company and branch are required."})),
        )
            .into_response();
    }

    let mut out = HeaderMap::new();
    for cookie in [
        format!("{SESSION_COOKIE}={SESSION_TOKEN}; path=/; HttpOnly"),
        format!("UserBranch={}; path=/", field("branch")),
        "ASP.NET_SessionId=mock-asp-session; path=/; HttpOnly".to_string(),
    ] {
        if let Ok(v) = cookie.parse() {
            out.append(header::SET_COOKIE, v);
        }
    }
    (StatusCode::NO_CONTENT, out).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &method, &uri, &headers);
    state.logout_posts.fetch_add(1, Ordering::SeqCst);
    state.options.logout_status.into_response()
}

async fn list_stock_items(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &method, &uri, &headers);
    if !authorized(&headers) {
        return not_logged_in();
    }
    let top = params
        .get("$top")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(state.options.stock_items);
    let skip = params
        .get("$skip")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if state.options.fail_at_skip.is_some_and(|at| skip >= at) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "An error has occurred.", "exceptionMessage": "Deadlock"})),
        )
            .into_response();
    }
    let items: Vec<Value> = (skip..state.options.stock_items)
        .take(top)
        .map(stock_item)
        .collect();
    Json(Value::Array(items)).into_response()
}

async fn get_stock_item(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &method, &uri, &headers);
    if !authorized(&headers) {
        return not_logged_in();
    }
    let found = (0..state.options.stock_items)
        .map(stock_item)
        .find(|item| item["id"] == json!(id) || item["InventoryID"]["value"] == json!(id));
    match found {
        Some(item) => Json(item).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": format!("No entity satisfies the condition: {id}")})),
        )
            .into_response(),
    }
}

async fn delete_stock_item(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &method, &uri, &headers);
    if !authorized(&headers) {
        return not_logged_in();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn put_stock_item(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, &method, &uri, &headers);
    if !authorized(&headers) {
        return not_logged_in();
    }
    let mut saved = stock_item(9999);
    if let (Some(saved), Some(fields)) = (saved.as_object_mut(), body.as_object()) {
        for (k, v) in fields {
            saved.insert(k.clone(), v.clone());
        }
    }
    Json(saved).into_response()
}

async fn list_customers(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &method, &uri, &headers);
    if !authorized(&headers) {
        return not_logged_in();
    }
    Json(json!({
        "value": [
            {"CustomerID": {"value": "C000001"}, "CustomerName": {"value": "Alpha Traders"}},
            {"CustomerID": {"value": "C000002"}, "CustomerName": {"value": "Beta Supplies"}},
            {"CustomerID": {"value": "C000003"}, "CustomerName": {"value": "Gamma Retail"}}
        ]
    }))
    .into_response()
}
