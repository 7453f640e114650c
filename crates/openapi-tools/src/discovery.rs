//! `OpenAPI` document loading and operation discovery.
//!
//! The document is read loosely: only `paths`, per-method `operationId` / `summary` /
//! `description` / `tags`, `servers[0].url` and `info.title` are used, so vendor documents that
//! a strict `OpenAPI` model would reject still load.

use crate::config::{DiscoveryConfig, SPEC_FALLBACK_CANDIDATES};
use crate::error::{OpenApiToolsError, Result};
use myob_http_tools::request::{HttpMethod, OperationDescriptor};
use regex::{Regex, RegexBuilder};
use serde_yaml::Value as YamlValue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Upper bound on a tool name, de-duplication suffix included.
pub const MAX_TOOL_NAME_LEN: usize = 120;

/// Pick the document path: the configured one, else the first existing fallback candidate.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecNotFound`] when nothing is configured and no candidate
/// exists.
pub fn resolve_spec_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    SPEC_FALLBACK_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| OpenApiToolsError::SpecNotFound {
            candidates: SPEC_FALLBACK_CANDIDATES
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
        })
}

/// Read and parse a JSON or YAML document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_document(path: &Path) -> Result<YamlValue> {
    let location = path.display().to_string();
    tracing::info!("Loading OpenAPI spec from {location}");
    let content =
        std::fs::read_to_string(path).map_err(|e| OpenApiToolsError::OpenApiSpecReadFile {
            path: location.clone(),
            source: e,
        })?;

    // JSON is a valid subset of YAML, so serde_yaml alone is enough.
    serde_yaml::from_str(&content)
        .map_err(|e| OpenApiToolsError::OpenApiSpecParse { location, source: e })
}

#[must_use]
pub fn document_base_url(doc: &YamlValue) -> Option<String> {
    doc.get("servers")?
        .get(0)?
        .get("url")?
        .as_str()
        .map(str::to_string)
}

#[must_use]
pub fn document_title(doc: &YamlValue) -> Option<String> {
    doc.get("info")?.get("title")?.as_str().map(str::to_string)
}

/// Turn every eligible operation into a descriptor.
///
/// Names in `reserved` are never handed out, so operations cannot shadow built-in tools.
///
/// # Errors
///
/// Returns an error if the document has no `paths` object or the exclude pattern is not a valid
/// regex.
pub fn discover_operations(
    doc: &YamlValue,
    cfg: &DiscoveryConfig,
    reserved: &HashSet<String>,
) -> Result<Vec<OperationDescriptor>> {
    let paths = doc
        .get("paths")
        .and_then(YamlValue::as_mapping)
        .ok_or_else(|| OpenApiToolsError::OpenApi("document has no 'paths' object".to_string()))?;

    let exclude = compile_exclude_pattern(cfg.exclude_pattern.as_deref())?;
    let mut names: HashSet<String> = reserved.clone();
    let mut out = Vec::new();

    for (path, item) in paths {
        let Some(path) = path.as_str() else {
            continue;
        };
        for method in HttpMethod::ALL {
            let Some(op) = item.get(method.openapi_key()) else {
                continue;
            };
            if cfg.max_tools.is_some_and(|max| out.len() >= max) {
                tracing::debug!(max_tools = ?cfg.max_tools, "tool cap reached");
                return Ok(out);
            }

            let fallback_id = format!("{method} {path}");
            let raw_id = yaml_str(op, "operationId").unwrap_or(&fallback_id);
            let summary = yaml_str(op, "summary")
                .or_else(|| yaml_str(op, "description"))
                .unwrap_or(&fallback_id)
                .to_string();
            let tags = yaml_tags(op);

            let haystack = format!("{raw_id} {path} {summary}");
            if exclude.as_ref().is_some_and(|re| re.is_match(&haystack)) {
                continue;
            }
            if !tags_allowed(&tags, cfg) {
                continue;
            }

            let id = unique_name(&mut names, &sanitize_tool_name(raw_id));
            out.push(OperationDescriptor {
                id,
                method,
                path_template: path.to_string(),
                summary: Some(summary),
                tags,
            });
        }
    }

    Ok(out)
}

fn compile_exclude_pattern(pattern: Option<&str>) -> Result<Option<Regex>> {
    let Some(pattern) = pattern.filter(|p| !p.trim().is_empty()) else {
        return Ok(None);
    };
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| OpenApiToolsError::Config(format!("Invalid exclude pattern '{pattern}': {e}")))
}

fn yaml_str<'a>(op: &'a YamlValue, key: &str) -> Option<&'a str> {
    op.get(key)
        .and_then(YamlValue::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn yaml_tags(op: &YamlValue) -> Vec<String> {
    op.get("tags")
        .and_then(YamlValue::as_sequence)
        .map(|tags| {
            tags.iter()
                .filter_map(YamlValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn tags_allowed(tags: &[String], cfg: &DiscoveryConfig) -> bool {
    let has_any = |wanted: &[String]| wanted.iter().any(|w| tags.iter().any(|t| t == w.trim()));
    if !cfg.include_tags.is_empty() && !has_any(&cfg.include_tags) {
        return false;
    }
    !has_any(&cfg.exclude_tags)
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`, collapse runs of `_`, trim leading and
/// trailing `_`, and cap at [`MAX_TOOL_NAME_LEN`].
#[must_use]
pub fn sanitize_tool_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('_');
    let name: String = trimmed.chars().take(MAX_TOOL_NAME_LEN).collect();
    if name.is_empty() {
        "operation".to_string()
    } else {
        name
    }
}

/// First free name among `base`, `base_1`, `base_2`, ... The base is shortened so a suffixed
/// name still fits in [`MAX_TOOL_NAME_LEN`].
fn unique_name(taken: &mut HashSet<String>, base: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    (1usize..)
        .map(|n| {
            let suffix = format!("_{n}");
            let keep = MAX_TOOL_NAME_LEN.saturating_sub(suffix.len());
            let stem: String = base.chars().take(keep).collect();
            format!("{stem}{suffix}")
        })
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> YamlValue {
        serde_yaml::from_str(yaml).expect("yaml")
    }

    const SAMPLE: &str = r#"
openapi: 3.0.1
info:
  title: MYOB Advanced
servers:
  - url: https://erp.example.com/entity/Default/23.200.001
paths:
  /StockItem:
    get:
      operationId: StockItem_GetList
      summary: Get a list of stock items
      tags: [StockItem]
    put:
      operationId: StockItem_PutEntity
      tags: [StockItem]
  /StockItem/{id}:
    get:
      operationId: StockItem_GetById
      tags: [StockItem]
    delete:
      tags: [StockItem]
  /Customer:
    get:
      operationId: Customer_GetList
      tags: [Customer]
  /Salesperson:
    get:
      operationId: Salesperson_GetList
      tags: [Salesperson]
  /AdHocSchema:
    get:
      operationId: X_GetSchema
      summary: AdHocSchema of something
"#;

    fn ids(ops: &[OperationDescriptor]) -> Vec<&str> {
        ops.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn discovers_in_document_order_and_excludes_by_pattern() {
        let ops = discover_operations(&doc(SAMPLE), &DiscoveryConfig::default(), &HashSet::new())
            .expect("discovered");
        assert_eq!(
            ids(&ops),
            vec![
                "StockItem_GetList",
                "StockItem_PutEntity",
                "StockItem_GetById",
                "DELETE_StockItem_id",
                "Customer_GetList",
            ]
        );
        assert_eq!(ops[0].summary.as_deref(), Some("Get a list of stock items"));
        assert_eq!(ops[3].summary.as_deref(), Some("DELETE /StockItem/{id}"));
        assert_eq!(ops[3].method, HttpMethod::Delete);
    }

    #[test]
    fn tag_filters_and_cap() {
        let cfg = DiscoveryConfig {
            include_tags: vec!["StockItem".to_string()],
            max_tools: Some(2),
            ..DiscoveryConfig::default()
        };
        let ops = discover_operations(&doc(SAMPLE), &cfg, &HashSet::new()).expect("discovered");
        assert_eq!(ids(&ops), vec!["StockItem_GetList", "StockItem_PutEntity"]);

        let cfg = DiscoveryConfig {
            exclude_tags: vec!["StockItem".to_string()],
            exclude_pattern: None,
            ..DiscoveryConfig::default()
        };
        let ops = discover_operations(&doc(SAMPLE), &cfg, &HashSet::new()).expect("discovered");
        assert_eq!(
            ids(&ops),
            vec!["Customer_GetList", "Salesperson_GetList", "X_GetSchema"]
        );
    }

    #[test]
    fn reserved_and_duplicate_names_get_suffixes() {
        let d = doc(
            r"
paths:
  /a:
    get: {operationId: login}
    post: {operationId: 'Same Op'}
  /b:
    post: {operationId: 'Same@Op'}
",
        );
        let reserved: HashSet<String> = ["login".to_string()].into_iter().collect();
        let ops = discover_operations(&d, &DiscoveryConfig::default(), &reserved)
            .expect("discovered");
        assert_eq!(ids(&ops), vec!["login_1", "Same_Op", "Same_Op_1"]);
    }

    #[test]
    fn suffixed_names_stay_within_the_length_cap() {
        let long = "A".repeat(MAX_TOOL_NAME_LEN + 30);
        let d = doc(&format!(
            "paths:\n  /a:\n    get: {{operationId: {long}}}\n    post: {{operationId: {long}}}\n"
        ));
        let ops = discover_operations(&d, &DiscoveryConfig::default(), &HashSet::new())
            .expect("discovered");
        assert_eq!(ops[0].id.len(), MAX_TOOL_NAME_LEN);
        assert_eq!(ops[1].id.len(), MAX_TOOL_NAME_LEN);
        assert!(ops[1].id.ends_with("A_1"));
        assert_ne!(ops[0].id, ops[1].id);
    }

    #[test]
    fn missing_paths_is_an_error() {
        let err = discover_operations(&doc("openapi: 3.0.1"), &DiscoveryConfig::default(), &HashSet::new())
            .unwrap_err();
        assert!(err.to_string().contains("paths"));
    }

    #[test]
    fn invalid_exclude_pattern_is_a_config_error() {
        let cfg = DiscoveryConfig {
            exclude_pattern: Some("(".to_string()),
            ..DiscoveryConfig::default()
        };
        let err = discover_operations(&doc(SAMPLE), &cfg, &HashSet::new()).unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Config(_)));
    }

    #[test]
    fn sanitize_tool_name_rules() {
        assert_eq!(sanitize_tool_name("GET /Stock Item/{id}"), "GET_Stock_Item_id");
        assert_eq!(sanitize_tool_name("__a--b__"), "a--b");
        assert_eq!(sanitize_tool_name("///"), "operation");
        assert_eq!(sanitize_tool_name(&"x".repeat(200)).len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn document_metadata() {
        let d = doc(SAMPLE);
        assert_eq!(
            document_base_url(&d).as_deref(),
            Some("https://erp.example.com/entity/Default/23.200.001")
        );
        assert_eq!(document_title(&d).as_deref(), Some("MYOB Advanced"));
    }

    #[test]
    fn configured_spec_path_wins() {
        let p = resolve_spec_path(Some(" /tmp/spec.json ")).expect("path");
        assert_eq!(p, PathBuf::from("/tmp/spec.json"));
    }
}
