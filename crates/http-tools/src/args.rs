//! Argument normalization.
//!
//! Callers reach the same operation with very different argument shapes: a plain object, a JSON
//! string, or a host envelope (`{arguments: ...}`, `{input: ...}`, `{content: [...]}`), with
//! OData options spelled `$top`, `top`, or tucked into `query` / `params` / `queryParams`.
//! [`normalize_arguments`] folds all of those into one [`CanonicalArgs`].
//!
//! Normalization never fails. Input that cannot be interpreted degrades to empty arguments.
//! It is also idempotent: serializing a [`CanonicalArgs`] and normalizing the result yields an
//! equal value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// OData system query options recognized at the top level of the arguments.
pub const ODATA_KEYS: [&str; 6] = ["$select", "$filter", "$expand", "$custom", "$skip", "$top"];

/// Bare spellings accepted for each OData option.
pub const ODATA_ALIASES: [(&str, &str); 6] = [
    ("select", "$select"),
    ("filter", "$filter"),
    ("expand", "$expand"),
    ("custom", "$custom"),
    ("skip", "$skip"),
    ("top", "$top"),
];

/// Headers added to every request unless the caller already set them (case-insensitive).
pub const DEFAULT_HEADERS: [(&str, &str); 3] = [
    ("Accept", "*/*"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Connection", "keep-alive"),
];

/// Normalized arguments for a single operation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalArgs {
    #[serde(default)]
    pub path_params: Map<String, Value>,

    /// Structured query. OData options always use their `$`-prefixed key.
    #[serde(default)]
    pub query: Map<String, Value>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Value,

    /// Literal query string. When present it replaces `query` on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_query: Option<String>,
}

impl CanonicalArgs {
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    /// Canonical JSON form (`{pathParams, query, headers, body, rawQuery}`).
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Normalize arbitrary caller input into [`CanonicalArgs`].
#[must_use]
pub fn normalize_arguments(input: &Value) -> CanonicalArgs {
    let unwrapped = unwrap_call_input(input);
    let empty = Map::new();
    let args = unwrapped.as_object().unwrap_or(&empty);

    let mut query = merge_query_maps(args);
    promote_top_level_options(args, &mut query);
    rename_query_aliases(&mut query);

    CanonicalArgs {
        path_params: args
            .get("pathParams")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        query,
        headers: collect_headers(args),
        body: args.get("body").cloned().unwrap_or(Value::Null),
        raw_query: raw_query_of(args),
    }
}

/// Decode a JSON-string input and strip one envelope level (`arguments`, `input`, or a
/// `content` part). Tools that take free-form arguments use this without the rest of
/// normalization.
#[must_use]
pub fn unwrap_call_input(input: &Value) -> Value {
    unwrap_envelope(decode_json_string(input.clone()))
}

fn decode_json_string(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

type Unwrapper = fn(&Map<String, Value>) -> Option<Value>;

/// Ordered envelope unwrappers. The first that matches wins; only one level is removed.
const UNWRAPPERS: [Unwrapper; 4] = [
    unwrap_arguments,
    unwrap_input,
    unwrap_content_json,
    unwrap_content_text,
];

fn unwrap_envelope(value: Value) -> Value {
    let Some(obj) = value.as_object() else {
        return value;
    };
    let unwrapped = UNWRAPPERS.iter().find_map(|f| f(obj));
    unwrapped.unwrap_or(value)
}

fn object_field(obj: &Map<String, Value>, key: &str) -> Option<Value> {
    match decode_json_string(obj.get(key)?.clone()) {
        v @ Value::Object(_) => Some(v),
        _ => None,
    }
}

fn unwrap_arguments(obj: &Map<String, Value>) -> Option<Value> {
    object_field(obj, "arguments")
}

fn unwrap_input(obj: &Map<String, Value>) -> Option<Value> {
    object_field(obj, "input")
}

fn content_parts(obj: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    obj.get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn unwrap_content_json(obj: &Map<String, Value>) -> Option<Value> {
    content_parts(obj)
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("json"))
        .find_map(|part| part.get("json").filter(|j| !j.is_null()).cloned())
}

fn unwrap_content_text(obj: &Map<String, Value>) -> Option<Value> {
    content_parts(obj)
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
}

/// `query`, then `params`, then `queryParams`. The first writer of a key wins.
fn merge_query_maps(args: &Map<String, Value>) -> Map<String, Value> {
    let mut query = Map::new();
    for source in ["query", "params", "queryParams"] {
        let Some(map) = args.get(source).and_then(Value::as_object) else {
            continue;
        };
        for (k, v) in map {
            if !query.contains_key(k) {
                query.insert(k.clone(), v.clone());
            }
        }
    }
    query
}

fn promote_top_level_options(args: &Map<String, Value>, query: &mut Map<String, Value>) {
    for key in ODATA_KEYS {
        if let Some(v) = args.get(key)
            && !query.contains_key(key)
        {
            query.insert(key.to_string(), v.clone());
        }
    }
    for (alias, key) in ODATA_ALIASES {
        if let Some(v) = args.get(alias)
            && !query.contains_key(key)
        {
            query.insert(key.to_string(), v.clone());
        }
    }
}

fn rename_query_aliases(query: &mut Map<String, Value>) {
    for (alias, key) in ODATA_ALIASES {
        let Some(v) = query.remove(alias) else {
            continue;
        };
        // An explicit `$` key beats the bare duplicate.
        if !query.contains_key(key) {
            query.insert(key.to_string(), v);
        }
    }
}

fn collect_headers(args: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = args
        .get("headers")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect()
        })
        .unwrap_or_default();

    for (name, value) in DEFAULT_HEADERS {
        if !headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    headers
}

fn raw_query_of(args: &Map<String, Value>) -> Option<String> {
    ["rawQuery", "queryString"]
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Render a scalar the way it appears in a URL or header. Arrays are comma-joined, objects
/// become compact JSON and `null` becomes an empty string.
#[must_use]
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}
