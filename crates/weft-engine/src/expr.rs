use crate::template::{render_value, resolve_path};

/// Evaluate a condition expression against the template scope.
///
/// Supported forms, checked in this order:
/// - `path exists` — the dotted path resolves to any value
/// - `path contains "substr"` — substring match on the rendered value
/// - `path != "value"` — not equal
/// - `path == "value"` — exact match on the rendered value
///
/// Returns `false` for unparseable expressions or unresolvable paths.
pub fn evaluate(expr: &str, scope: &serde_json::Value) -> bool {
    let expr = expr.trim();

    if let Some(path) = expr.strip_suffix(" exists") {
        let path = path.trim();
        if !path.is_empty() {
            return resolve_path(scope, path).is_some();
        }
    }

    if let Some((path, substr)) = parse_operator(expr, "contains") {
        return resolve_path(scope, path)
            .map(render_value)
            .is_some_and(|s| s.contains(substr));
    }

    if let Some((path, value)) = parse_operator(expr, "!=") {
        return resolve_path(scope, path)
            .map(render_value)
            .is_some_and(|s| s != value);
    }

    if let Some((path, value)) = parse_operator(expr, "==") {
        return resolve_path(scope, path)
            .map(render_value)
            .is_some_and(|s| s == value);
    }

    false
}

/// Parse `path OP "value"` expressions, returning (path, value). The
/// operator must stand alone between whitespace, so a path segment or a
/// quoted value spelling an operator name stays literal text.
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let needle = format!(" {} ", op);
    let idx = expr.find(&needle)?;
    if expr.find('"').is_some_and(|quote| quote < idx) {
        return None;
    }
    let path = expr[..idx].trim();
    if path.is_empty() {
        return None;
    }
    let value = expr[idx + needle.len()..].trim().trim_matches('"');
    Some((path, value))
}
