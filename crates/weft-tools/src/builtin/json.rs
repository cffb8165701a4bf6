use futures::future::BoxFuture;
use serde::Deserialize;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::ToolResult;

/// Extract a value from a JSON document by dotted path (`a.b.0.c`).
pub struct JsonQueryTool;

#[derive(Deserialize)]
struct JsonQueryInput {
    json: serde_json::Value,
    path: String,
}

impl Tool for JsonQueryTool {
    fn name(&self) -> &str {
        "json_query"
    }
    fn description(&self) -> &str {
        "Extract a value from a JSON document using a dotted path, e.g. \"items.0.name\"."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "json": { "description": "The JSON document to query" },
                "path": { "type": "string", "description": "Dotted path into the document" }
            },
            "required": ["json", "path"]
        })
    }
    fn invoke(&self, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: JsonQueryInput = serde_json::from_value(arguments)
                .map_err(|e| WeftError::ToolInvocation {
                    tool: "json_query".into(),
                    message: e.to_string(),
                })?;

            let mut current = &p.json;
            for segment in p.path.split('.') {
                current = match current {
                    serde_json::Value::Object(map) => match map.get(segment) {
                        Some(v) => v,
                        None => {
                            return Ok(ToolResult::error(format!(
                                "Path segment '{}' not found",
                                segment
                            )))
                        }
                    },
                    serde_json::Value::Array(items) => match segment
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get(i))
                    {
                        Some(v) => v,
                        None => {
                            return Ok(ToolResult::error(format!(
                                "Invalid array index '{}'",
                                segment
                            )))
                        }
                    },
                    _ => {
                        return Ok(ToolResult::error(format!(
                            "Cannot descend into scalar at '{}'",
                            segment
                        )))
                    }
                };
            }

            let rendered = match current {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(ToolResult::success(rendered))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_nested_path() {
        let tool = JsonQueryTool;
        let result = tool
            .invoke(serde_json::json!({
                "json": {"items": [{"name": "first"}, {"name": "second"}]},
                "path": "items.1.name"
            }))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "second");
    }

    #[tokio::test]
    async fn test_missing_path_is_error_result() {
        let tool = JsonQueryTool;
        let result = tool
            .invoke(serde_json::json!({"json": {"a": 1}, "path": "b.c"}))
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
