//! Page-by-page accumulation over list operations.
//!
//! [`paginate`] drives one operation with OData `$top`/`$skip`, projecting each row and keeping a
//! running count plus a small sample. Pages are fetched sequentially.

use crate::error::Result;
use async_trait::async_trait;
use myob_http_tools::args::{CanonicalArgs, normalize_arguments, scalar_to_string};
use myob_http_tools::runtime::ExecutionResult;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub const DEFAULT_PAGE_TOP: u64 = 50;
pub const DEFAULT_MAX_PAGES: u32 = 2;
pub const DEFAULT_PAGE_SAMPLE_SIZE: usize = 5;

/// Anything that can execute a named operation with canonical arguments.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the operation is unknown or its request cannot be built. HTTP
    /// failures are reported inside the [`ExecutionResult`].
    async fn execute(&self, tool: &str, args: &CanonicalArgs) -> Result<ExecutionResult>;
}

/// Per-row projection.
pub type Projection = dyn Fn(&Value) -> Value + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    pub top: u64,
    pub max_pages: u32,
    pub sample_size: usize,
    /// Sent as a comma-joined `$select` on every page when non-empty.
    pub select: Vec<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            top: DEFAULT_PAGE_TOP,
            max_pages: DEFAULT_MAX_PAGES,
            sample_size: DEFAULT_PAGE_SAMPLE_SIZE,
            select: Vec::new(),
        }
    }
}

impl PageOptions {
    fn normalized(&self) -> (u64, u32, usize, Option<String>) {
        let select = self
            .select
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        (
            self.top.max(1),
            self.max_pages.max(1),
            self.sample_size.max(1),
            (!select.is_empty()).then_some(select),
        )
    }
}

/// The page that stopped a run early.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    /// Zero-based page index.
    pub page: u32,
    pub status: u16,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageAccumulator {
    pub count: usize,
    pub sample: Vec<Value>,
    /// Pages that returned successfully.
    pub pages: u32,
    /// `false` when a page failed; the counts then cover only the pages before it.
    pub complete: bool,
    /// A batch shorter than `top` was seen.
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PageFailure>,
}

/// Run `tool` page by page.
///
/// # Errors
///
/// Returns an error only when a page request cannot be built (unknown tool, missing path
/// parameter). HTTP failures end the run with `complete: false`.
pub async fn paginate<S>(
    source: &S,
    tool: &str,
    base_args: &Value,
    options: &PageOptions,
    project: Option<&Projection>,
) -> Result<PageAccumulator>
where
    S: PageSource + ?Sized,
{
    let (top, max_pages, sample_size, select) = options.normalized();
    let base = normalize_arguments(base_args);

    let mut acc = PageAccumulator {
        count: 0,
        sample: Vec::new(),
        pages: 0,
        complete: true,
        exhausted: false,
        failure: None,
    };

    for page in 0..max_pages {
        let skip = u64::from(page) * top;
        let args = page_args(&base, top, skip, select.as_deref());
        let result = source.execute(tool, &args).await?;

        if result.error {
            warn!(tool, page, status = result.status, "page failed; stopping");
            acc.complete = false;
            acc.failure = Some(PageFailure {
                page,
                status: result.status,
                data: result.data,
            });
            break;
        }

        let rows = rows_of(&result.data);
        let batch = rows.len();
        acc.count += batch;
        acc.pages += 1;
        for row in rows.iter().take(sample_size.saturating_sub(acc.sample.len())) {
            acc.sample.push(match project {
                Some(f) => f(row),
                None => flatten_values(row),
            });
        }
        debug!(tool, page, batch, total = acc.count, "page fetched");

        if (batch as u64) < top {
            acc.exhausted = true;
            break;
        }
    }

    Ok(acc)
}

/// Fetch one record and project it. `None` when the operation returned nothing.
///
/// # Errors
///
/// Returns an error only when the request cannot be built.
pub async fn fetch_single<S>(
    source: &S,
    tool: &str,
    args: &Value,
    project: Option<&Projection>,
) -> Result<Option<Value>>
where
    S: PageSource + ?Sized,
{
    let result = source.execute(tool, &normalize_arguments(args)).await?;
    if result.error {
        warn!(tool, status = result.status, "single fetch failed");
        return Ok(None);
    }
    let record = match &result.data {
        Value::Null => return Ok(None),
        Value::Array(_) => rows_of(&result.data).first().cloned(),
        Value::Object(obj) if obj.get("value").is_some_and(Value::is_array) => {
            rows_of(&result.data).first().cloned()
        }
        other => Some(other.clone()),
    };
    let Some(record) = record else {
        return Ok(None);
    };
    Ok(Some(match project {
        Some(f) => f(&record),
        None => flatten_values(&record),
    }))
}

fn page_args(base: &CanonicalArgs, top: u64, skip: u64, select: Option<&str>) -> CanonicalArgs {
    let mut args = base.clone();
    let mut paging: Vec<(&str, Value)> = Vec::with_capacity(3);
    if let Some(select) = select {
        paging.push(("$select", json!(select)));
    }
    paging.push(("$top", json!(top)));
    paging.push(("$skip", json!(skip)));

    match args.raw_query.take() {
        Some(raw) => args.raw_query = Some(with_raw_paging(&raw, &paging)),
        None => {
            for (key, value) in paging {
                args.query.insert(key.to_string(), value);
            }
        }
    }
    args
}

/// Replace any paging keys already present in a literal query string, then append ours.
fn with_raw_paging(raw: &str, paging: &[(&str, Value)]) -> String {
    let raw = raw.trim().trim_start_matches('?');
    let replaced = |pair: &str| {
        let key = pair.split('=').next().unwrap_or_default();
        let key = key.replace("%24", "$");
        paging.iter().any(|(k, _)| key.eq_ignore_ascii_case(k))
    };
    raw.split('&')
        .filter(|pair| !pair.is_empty() && !replaced(pair))
        .map(str::to_string)
        .chain(
            paging
                .iter()
                .map(|(k, v)| format!("{k}={}", scalar_to_string(v))),
        )
        .collect::<Vec<_>>()
        .join("&")
}

/// Rows of a list response: a bare array or an OData `{ "value": [...] }` wrapper.
#[must_use]
pub fn rows_of(data: &Value) -> &[Value] {
    match data {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("value")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    }
}

/// Default projection: `{"Field": {"value": x}}` becomes `{"Field": x}`.
#[must_use]
pub fn flatten_values(row: &Value) -> Value {
    let Some(obj) = row.as_object() else {
        return row.clone();
    };
    let flat: Map<String, Value> = obj
        .iter()
        .map(|(k, v)| {
            let v = match v.as_object().and_then(|inner| inner.get("value")) {
                Some(inner) => inner.clone(),
                None => v.clone(),
            };
            (k.clone(), v)
        })
        .collect();
    Value::Object(flat)
}
