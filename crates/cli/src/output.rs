use anyhow::Context as _;
use owo_colors::OwoColorize as _;
use rmcp::model::{CallToolResult, Tool};
use serde::Serialize;
use std::io::IsTerminal as _;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output as json")?;
    println!("{text}");
    Ok(())
}

pub fn print_tools(tools: &[Tool], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&tools);
    }
    let color = std::io::stdout().is_terminal();
    for tool in tools {
        let read_only = tool
            .annotations
            .as_ref()
            .and_then(|a| a.read_only_hint)
            .unwrap_or(false);
        let marker = if read_only { "read" } else { "write" };
        let description = tool.description.as_deref().unwrap_or_default();
        if color {
            println!("{}  {}  {}", tool.name.bold(), marker.dimmed(), description);
        } else {
            println!("{}  {marker}  {description}", tool.name);
        }
    }
    Ok(())
}

pub fn print_call_result(result: &CallToolResult, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(result);
    }
    let failed = result.is_error == Some(true);
    let color = std::io::stdout().is_terminal();
    for text in content_texts(result)? {
        if failed && color {
            println!("{}", text.red());
        } else {
            println!("{text}");
        }
    }
    Ok(())
}

fn content_texts(result: &CallToolResult) -> anyhow::Result<Vec<String>> {
    let value = serde_json::to_value(&result.content).context("serialize tool content")?;
    Ok(value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
        .map(str::to_string)
        .collect())
}
