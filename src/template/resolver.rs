//! Placeholder resolution
//!
//! Walks a template document and replaces every recognised `$token`:
//! a string that consists of exactly one token becomes the token's typed
//! value, while tokens embedded in longer strings are interpolated as text.
//! Unrecognised `$words` and lone `$` characters are left alone, so trigger
//! characters such as `"$"` survive resolution untouched. Context values
//! that themselves contain a recognised token are rejected.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::trace;

use super::InitializeTemplate;
use super::context::{Placeholder, ResolveContext};
use crate::lsp::error::SessionError;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder pattern is valid")
});

/// Initialize parameters with every placeholder substituted
///
/// Only produced by [`resolve`], so a value of this type never carries an
/// unresolved placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters(Value);

impl ResolvedParameters {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The client capabilities declared by the template
    pub fn capabilities(&self) -> &Value {
        self.0.get("capabilities").unwrap_or(&Value::Null)
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Resolve a template against a context
///
/// The template itself is not modified.
pub fn resolve(
    template: &InitializeTemplate,
    context: &ResolveContext,
) -> Result<ResolvedParameters, SessionError> {
    let resolved = resolve_value(template.document(), context, &mut String::new())?;
    trace!("Resolved initialize template '{}'", template.name());
    Ok(ResolvedParameters(resolved))
}

/// Recognised placeholders occurring anywhere in a document
pub fn placeholders_in(document: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    collect_placeholders(document, &mut found);
    found.sort();
    found.dedup();
    found
}

fn collect_placeholders(value: &Value, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(text) => found.extend(
            TOKEN
                .captures_iter(text)
                .filter_map(|captures| Placeholder::from_name(&captures[1])),
        ),
        Value::Array(items) => items.iter().for_each(|item| collect_placeholders(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_placeholders(item, found)),
        _ => {}
    }
}

fn resolve_value(
    value: &Value,
    context: &ResolveContext,
    path: &mut String,
) -> Result<Value, SessionError> {
    match value {
        Value::String(text) => resolve_string(text, context, path),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{index}]"));
                resolved.push(resolve_value(item, context, path)?);
                path.truncate(len);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                resolved.insert(key.clone(), resolve_value(item, context, path)?);
                path.truncate(len);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    text: &str,
    context: &ResolveContext,
    path: &str,
) -> Result<Value, SessionError> {
    let lookup = |name: &str| -> Result<Option<Placeholder>, SessionError> {
        let Some(placeholder) = Placeholder::from_name(name) else {
            return Ok(None);
        };
        let Some(text) = context.text(placeholder) else {
            return Err(SessionError::UnresolvedPlaceholder {
                token: format!("${name}"),
                path: display_path(path),
            });
        };
        // A substituted value must not read as a placeholder itself
        if let Some(inner) = recognised_token(&text) {
            return Err(SessionError::InvalidTemplate(format!(
                "value for ${name} at {} contains placeholder token ${}",
                display_path(path),
                inner.name()
            )));
        }
        Ok(Some(placeholder))
    };

    // Whole-string token: substitute the typed value
    if let Some(captures) = TOKEN.captures(text)
        && captures[0].len() == text.len()
    {
        return match lookup(&captures[1])? {
            Some(placeholder) => Ok(context.value(placeholder).unwrap_or(Value::Null)),
            None => Ok(Value::String(text.to_string())),
        };
    }

    // Embedded tokens: check all of them before rewriting anything
    let mut any = false;
    for captures in TOKEN.captures_iter(text) {
        any |= lookup(&captures[1])?.is_some();
    }
    if !any {
        return Ok(Value::String(text.to_string()));
    }

    let interpolated = TOKEN.replace_all(text, |captures: &Captures| {
        Placeholder::from_name(&captures[1])
            .and_then(|placeholder| context.text(placeholder))
            .unwrap_or_else(|| captures[0].to_string())
    });
    Ok(Value::String(interpolated.into_owned()))
}

fn recognised_token(text: &str) -> Option<Placeholder> {
    TOKEN
        .captures_iter(text)
        .find_map(|captures| Placeholder::from_name(&captures[1]))
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}
