//! `${path}` substitution in JSON payloads.
//!
//! Named queries and transaction steps reference caller parameters
//! (`${params.user_id}`) and earlier step outputs (`${create_user.id}`). A
//! string consisting of exactly one placeholder is replaced by the referenced
//! value with its JSON type intact; placeholders embedded in longer strings
//! are spliced in as text.

use serde_json::{Map, Value};

/// Values placeholders resolve against, keyed by first path segment.
pub type TemplateScope = Map<String, Value>;

/// A placeholder that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPlaceholder(pub String);

impl std::fmt::Display for UnresolvedPlaceholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolved placeholder '${{{}}}'", self.0)
    }
}

/// Resolve a dotted path against `scope`.
#[must_use]
pub fn lookup<'a>(scope: &'a TemplateScope, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = scope.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Substitute every placeholder in `value`.
///
/// # Errors
///
/// Returns the first placeholder whose path does not resolve.
pub fn render(value: &Value, scope: &TemplateScope) -> Result<Value, UnresolvedPlaceholder> {
    match value {
        Value::String(s) => render_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|v| render(v, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| render(v, scope).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Substitute placeholders in a bare string, always producing text.
///
/// # Errors
///
/// Returns the first placeholder whose path does not resolve.
pub fn render_text(s: &str, scope: &TemplateScope) -> Result<String, UnresolvedPlaceholder> {
    match render_str(s, scope)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn render_str(s: &str, scope: &TemplateScope) -> Result<Value, UnresolvedPlaceholder> {
    if let Some(path) = whole_placeholder(s) {
        return lookup(scope, path)
            .cloned()
            .ok_or_else(|| UnresolvedPlaceholder(path.to_owned()));
    }
    if !s.contains("${") {
        return Ok(Value::String(s.to_owned()));
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start.saturating_add(2)..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = after[..end].trim();
        let resolved =
            lookup(scope, path).ok_or_else(|| UnresolvedPlaceholder(path.to_owned()))?;
        match resolved {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end.saturating_add(1)..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.contains('}') && !inner.contains("${")).then(|| inner.trim())
}
