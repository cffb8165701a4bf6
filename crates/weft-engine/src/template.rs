use weft_core::error::{Result, WeftError};

/// Resolve a dotted path (`input.text`, `nodes.chat.answer`) against a JSON
/// scope. Array segments may be numeric indices.
pub fn resolve_path<'a>(
    scope: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = scope;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                items.get(segment.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Render a scalar JSON value for interpolation; structured values render
/// as compact JSON.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a `{{ path }}` template against the scope.
///
/// Unresolvable paths are an error, never a silent empty substitution.
pub fn render(template: &str, scope: &serde_json::Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            WeftError::Template(format!("unclosed '{{{{' in template: {}", template))
        })?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err(WeftError::Template("empty template expression".into()));
        }
        let value = resolve_path(scope, path).ok_or_else(|| {
            WeftError::Template(format!("unresolvable path '{}'", path))
        })?;
        out.push_str(&render_value(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render every string leaf of a JSON value as a template.
pub fn render_json(value: &serde_json::Value, scope: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => Ok(serde_json::Value::String(render(s, scope)?)),
        serde_json::Value::Array(items) => {
            let rendered: Result<Vec<_>> =
                items.iter().map(|v| render_json(v, scope)).collect();
            Ok(serde_json::Value::Array(rendered?))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_json(v, scope)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
