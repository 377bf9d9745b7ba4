//! Initialize-parameter templates
//!
//! A template is a backend-specific `InitializeParams` document containing
//! placeholder tokens. Templates are loaded once per backend kind and
//! resolved once per session.

pub mod context;
pub mod resolver;

pub use context::{Placeholder, ResolveContext, path_from_uri, path_to_uri, uri_from_path};
pub use resolver::{ResolvedParameters, placeholders_in, resolve};

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::lsp::error::SessionError;

/// Documentation-only key removed when a template is loaded
const DESCRIPTION_KEY: &str = "_description";

/// Immutable initialize-parameter template for one backend kind
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeTemplate {
    name: String,
    document: Value,
}

impl InitializeTemplate {
    /// Validate a template document
    ///
    /// The document must be an object with a `capabilities` object. A
    /// command catalog under `capabilities.workspace.executeCommand.commands`,
    /// if present, must be a list of unique, non-empty command names.
    pub fn parse(name: impl Into<String>, document: Value) -> Result<Self, SessionError> {
        let name = name.into();
        let Value::Object(mut map) = document else {
            return Err(SessionError::InvalidTemplate(format!(
                "template '{name}' is not a JSON object"
            )));
        };

        if map.remove(DESCRIPTION_KEY).is_some() {
            debug!("Stripped {} from template '{}'", DESCRIPTION_KEY, name);
        }

        if !map.get("capabilities").is_some_and(Value::is_object) {
            return Err(SessionError::InvalidTemplate(format!(
                "template '{name}' has no capabilities object"
            )));
        }

        let template = Self {
            name,
            document: Value::Object(map),
        };
        template.validate_commands()?;
        Ok(template)
    }

    /// Parse a template from JSON text
    pub fn from_json(name: impl Into<String>, text: &str) -> Result<Self, SessionError> {
        let name = name.into();
        let document = serde_json::from_str(text).map_err(|e| {
            SessionError::InvalidTemplate(format!("template '{name}' is not valid JSON: {e}"))
        })?;
        Self::parse(name, document)
    }

    /// Load a template file; the file stem becomes the template name
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::InvalidTemplate(format!("cannot read {}: {e}", path.display()))
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_json(name, &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Declared client capabilities
    pub fn capabilities(&self) -> &Value {
        &self.document["capabilities"]
    }

    /// Backend commands the template declares the client may execute
    pub fn commands(&self) -> Vec<&str> {
        self.command_catalog()
            .and_then(Value::as_array)
            .map(|commands| commands.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Recognised placeholders used by this template
    pub fn placeholders(&self) -> Vec<Placeholder> {
        placeholders_in(&self.document)
    }

    fn command_catalog(&self) -> Option<&Value> {
        self.capabilities()
            .get("workspace")?
            .get("executeCommand")?
            .get("commands")
    }

    fn validate_commands(&self) -> Result<(), SessionError> {
        let Some(catalog) = self.command_catalog() else {
            return Ok(());
        };
        let Some(commands) = catalog.as_array() else {
            return Err(SessionError::InvalidTemplate(format!(
                "template '{}': command catalog is not a list",
                self.name
            )));
        };

        let mut seen = HashSet::new();
        for command in commands {
            match command.as_str() {
                Some(name) if !name.trim().is_empty() => {
                    if !seen.insert(name) {
                        return Err(SessionError::InvalidTemplate(format!(
                            "template '{}': duplicate command '{name}'",
                            self.name
                        )));
                    }
                }
                _ => {
                    return Err(SessionError::InvalidTemplate(format!(
                        "template '{}': invalid command entry {command}",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::error::ErrorKind;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_description_is_stripped() {
        let template = InitializeTemplate::parse(
            "php",
            json!({"_description": "docs only", "capabilities": {}}),
        )
        .unwrap();
        assert!(template.document().get("_description").is_none());
        assert_eq!(template.name(), "php");
    }

    #[test]
    fn test_rejects_bad_documents() {
        for document in [json!([]), json!({"processId": 1}), json!({"capabilities": []})] {
            let err = InitializeTemplate::parse("bad", document).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
        assert!(InitializeTemplate::from_json("bad", "{").is_err());
    }

    #[test]
    fn test_command_catalog_validation() {
        let ok = InitializeTemplate::parse(
            "cmds",
            json!({"capabilities": {"workspace": {"executeCommand": {"commands": ["a", "b"]}}}}),
        )
        .unwrap();
        assert_eq!(ok.commands(), vec!["a", "b"]);

        for commands in [json!("a"), json!(["a", "a"]), json!(["a", ""]), json!([1])] {
            let document =
                json!({"capabilities": {"workspace": {"executeCommand": {"commands": commands}}}});
            assert!(InitializeTemplate::parse("cmds", document).is_err());
        }
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::Builder::new()
            .prefix("backend")
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"{{"_description": "x", "rootUri": "$rootUri", "capabilities": {{}}}}"#
        )
        .unwrap();

        let template = InitializeTemplate::from_path(file.path()).unwrap();
        assert!(template.name().starts_with("backend"));
        assert_eq!(template.placeholders(), vec![Placeholder::RootUri]);
    }

    #[test]
    fn test_from_missing_path() {
        let err = InitializeTemplate::from_path("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
