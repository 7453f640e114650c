//! Request building: operation descriptor + canonical arguments + base URL → concrete request.

use crate::args::{CanonicalArgs, scalar_to_string};
use crate::config::RequestDefaults;
use crate::error::{HttpToolsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods in the order operations are discovered under an `OpenAPI` path item.
    pub const ALL: [Self; 5] = [Self::Get, Self::Post, Self::Put, Self::Patch, Self::Delete];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Lowercase key used under an `OpenAPI` path item (`get`, `post`, ...).
    #[must_use]
    pub fn openapi_key(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One callable operation, derived once from the `OpenAPI` document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    /// Sanitized, unique tool name.
    pub id: String,
    pub method: HttpMethod,
    /// Path with `{param}` placeholders, relative to the API base URL.
    pub path_template: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A fully resolved request, ready for the execution engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: HttpMethod,
    /// Final URL, query included.
    pub url: Url,
    pub query: Map<String, Value>,
    pub raw_query: Option<String>,
    /// `false` when a raw query string replaced the structured query.
    pub use_params: bool,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Resolve an operation call into a concrete request.
///
/// # Errors
///
/// Returns [`HttpToolsError::MissingPathParameter`] if a placeholder has no value, or
/// [`HttpToolsError::InvalidUrl`] if the base URL cannot be parsed.
pub fn build_request(
    op: &OperationDescriptor,
    args: &CanonicalArgs,
    base_url: &str,
    defaults: &RequestDefaults,
) -> Result<BuiltRequest> {
    let rel = fill_path(&op.path_template, &args.path_params)?;
    let mut url = join_base_url(base_url, &rel)?;

    let mut query = args.query.clone();
    if defaults.apply && op.method == HttpMethod::Get {
        apply_request_defaults(&mut query, defaults);
    }

    let raw_query = args
        .raw_query
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let use_params = raw_query.is_none();

    let query_string = match &raw_query {
        Some(raw) => raw.trim_start_matches('?').to_string(),
        None => encode_structured_query(&query),
    };
    append_query(&mut url, &query_string);

    Ok(BuiltRequest {
        method: op.method,
        url,
        query,
        raw_query,
        use_params,
        headers: args.headers.clone(),
        body: args.body.clone(),
    })
}

/// Substitute `{name}` placeholders with percent-encoded values from `params`.
///
/// # Errors
///
/// Returns [`HttpToolsError::MissingPathParameter`] naming the first placeholder without a
/// non-null value.
pub fn fill_path(template: &str, params: &Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        let value = params
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| HttpToolsError::MissingPathParameter(name.to_string()))?;
        out.push_str(&rest[..start]);
        out.push_str(&encode_uri_component(&scalar_to_string(value)));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve `rel` against `base_url`, treating the base as a directory.
///
/// # Errors
///
/// Returns [`HttpToolsError::InvalidUrl`] if the result is not a valid absolute URL.
pub fn join_base_url(base_url: &str, rel: &str) -> Result<Url> {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    let base = Url::parse(&base)
        .map_err(|e| HttpToolsError::InvalidUrl(format!("base url '{base_url}': {e}")))?;
    // `./` keeps a leading segment containing ':' from being read as a scheme.
    let rel = format!("./{}", rel.trim_start_matches('/'));
    base.join(&rel)
        .map_err(|e| HttpToolsError::InvalidUrl(format!("path '{rel}': {e}")))
}

fn apply_request_defaults(query: &mut Map<String, Value>, defaults: &RequestDefaults) {
    if !query.contains_key("$top") {
        query.insert("$top".to_string(), Value::from(defaults.top));
    }
    if !query.contains_key("$select") && !defaults.select.is_empty() {
        query.insert(
            "$select".to_string(),
            Value::String(defaults.select.join(",")),
        );
    }
}

/// `key=value` pairs joined by `&`. Keys are kept verbatim so `$top` stays `$top`; values are
/// percent-encoded and `null` values are skipped.
#[must_use]
pub fn encode_structured_query(query: &Map<String, Value>) -> String {
    query
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{k}={}", encode_uri_component(&scalar_to_string(v))))
        .collect::<Vec<_>>()
        .join("&")
}

fn append_query(url: &mut Url, query_string: &str) {
    if query_string.is_empty() {
        return;
    }
    let combined = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query_string}"),
        _ => query_string.to_string(),
    };
    url.set_query(Some(&combined));
}

/// Percent-encode everything outside `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
#[must_use]
pub fn encode_uri_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_component_safe(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_component_safe(b: u8) -> bool {
    matches!(
        b,
        b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::normalize_arguments;
    use serde_json::json;

    fn op(method: HttpMethod, path: &str) -> OperationDescriptor {
        OperationDescriptor {
            id: "op".to_string(),
            method,
            path_template: path.to_string(),
            summary: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn missing_path_param_fails_without_url() {
        let args = normalize_arguments(&json!({"pathParams": {}}));
        let err = build_request(
            &op(HttpMethod::Get, "/Orders/{id}"),
            &args,
            "http://erp.local/entity/Default/23.200.001",
            &RequestDefaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HttpToolsError::MissingPathParameter(ref n) if n == "id"));
    }

    #[test]
    fn null_path_param_counts_as_missing() {
        let args = normalize_arguments(&json!({"pathParams": {"id": null}}));
        let err = fill_path("/Orders/{id}", &args.path_params).unwrap_err();
        assert_eq!(err.to_string(), "Missing path param: id");
    }

    #[test]
    fn path_values_are_percent_encoded() {
        let params = json!({"type": "SO", "nbr": "00/12 A"});
        let path = fill_path(
            "/SalesOrder/{type}/{nbr}",
            params.as_object().expect("object"),
        )
        .expect("filled");
        assert_eq!(path, "/SalesOrder/SO/00%2F12%20A");
    }

    #[test]
    fn base_url_is_treated_as_directory() {
        let args = normalize_arguments(&json!({}));
        let built = build_request(
            &op(HttpMethod::Get, "/StockItem"),
            &args,
            "https://erp.example.com/entity/Default/23.200.001",
            &RequestDefaults::default(),
        )
        .expect("built");
        assert_eq!(
            built.url.as_str(),
            "https://erp.example.com/entity/Default/23.200.001/StockItem"
        );
        assert!(built.use_params);
    }

    #[test]
    fn structured_query_keeps_dollar_keys_and_encodes_values() {
        let args = normalize_arguments(&json!({
            "filter": "Status eq 'Open'",
            "top": 10,
            "query": {"skipMe": null}
        }));
        let built = build_request(
            &op(HttpMethod::Get, "/SalesOrder"),
            &args,
            "http://erp.local/api/",
            &RequestDefaults::default(),
        )
        .expect("built");
        let q = built.url.query().expect("query");
        assert!(q.contains("$filter=Status%20eq%20"), "{q}");
        assert!(q.contains("$top=10"), "{q}");
        assert!(!q.contains("skipMe"), "{q}");
    }

    #[test]
    fn raw_query_wins_over_structured_query() {
        let args = normalize_arguments(&json!({
            "rawQuery": "?$top=5&$expand=Details",
            "top": 99,
            "select": "OrderNbr"
        }));
        let built = build_request(
            &op(HttpMethod::Get, "/SalesOrder"),
            &args,
            "http://erp.local/api",
            &RequestDefaults::default(),
        )
        .expect("built");
        assert_eq!(built.url.query(), Some("$top=5&$expand=Details"));
        assert!(!built.use_params);
        assert_eq!(built.raw_query.as_deref(), Some("?$top=5&$expand=Details"));
    }

    #[test]
    fn defaults_apply_only_to_get_when_enabled() {
        let defaults = RequestDefaults {
            apply: true,
            top: 25,
            select: vec!["InventoryID".to_string(), "Description".to_string()],
        };
        let args = normalize_arguments(&json!({}));

        let get = build_request(
            &op(HttpMethod::Get, "/StockItem"),
            &args,
            "http://erp.local",
            &defaults,
        )
        .expect("built");
        assert_eq!(get.query.get("$top"), Some(&json!(25)));
        assert_eq!(
            get.query.get("$select"),
            Some(&json!("InventoryID,Description"))
        );

        let put = build_request(
            &op(HttpMethod::Put, "/StockItem"),
            &args,
            "http://erp.local",
            &defaults,
        )
        .expect("built");
        assert!(put.query.is_empty());

        let explicit = normalize_arguments(&json!({"top": 3}));
        let get = build_request(
            &op(HttpMethod::Get, "/StockItem"),
            &explicit,
            "http://erp.local",
            &defaults,
        )
        .expect("built");
        assert_eq!(get.query.get("$top"), Some(&json!(3)));
    }

    #[test]
    fn encode_uri_component_matches_reserved_set() {
        assert_eq!(encode_uri_component("a b&c=d/é"), "a%20b%26c%3Dd%2F%C3%A9");
        assert_eq!(encode_uri_component("it's(ok)!*~"), "it's(ok)!*~");
    }
}
