//! Backend profiles
//!
//! A [`BackendProfile`] is plain data describing one kind of backend: how to
//! launch it, which initialize template to send, which capabilities it must
//! advertise, and which settings to hand out when it asks for
//! `workspace/configuration`. Every backend runs through the same generic
//! [`Session`](crate::lsp::Session); profiles never add behaviour.

use serde_json::{Map, Value};
use std::path::{Component, Path};
use tracing::debug;

use crate::backend::error::{BackendError, ConfigError};
use crate::lsp::jsonrpc_utils::error_codes;
use crate::lsp::protocol::JsonRpcErrorObject;
use crate::template::InitializeTemplate;

const PHPACTOR_TEMPLATE: &str = include_str!("../../templates/phpactor/initialize_params.json");
const GOPLS_TEMPLATE: &str = include_str!("../../templates/gopls/initialize_params.json");

/// Names accepted by [`BackendProfile::builtin`]
pub const BUILTIN_BACKENDS: &[&str] = &["phpactor", "gopls"];

/// Server capabilities every built-in backend must advertise
const DEFAULT_REQUIRED_CAPABILITIES: [&str; 3] =
    ["textDocumentSync", "completionProvider", "definitionProvider"];

/// Directories phpactor projects keep generated or third-party code in
const PHPACTOR_IGNORED_DIRS: [&str; 13] = [
    "packages",
    "node_modules",
    "cache",
    "build",
    "dist",
    "dev",
    "generated",
    "lib",
    "m2-hotfixes",
    "phpserver",
    "pub",
    "server",
    "var",
];

const GOPLS_IGNORED_DIRS: [&str; 4] = ["vendor", "node_modules", "dist", "build"];

/// Launch and negotiation data for one backend kind
#[derive(Debug, Clone)]
pub struct BackendProfile {
    name: String,
    language_id: String,
    command: String,
    args: Vec<String>,
    template: InitializeTemplate,
    required_capabilities: Vec<String>,
    settings: Map<String, Value>,
    ignored_dirs: Vec<String>,
}

impl BackendProfile {
    /// Look up a built-in profile by name
    pub fn builtin(name: &str) -> Result<Self, BackendError> {
        match name {
            "phpactor" => Self::phpactor(),
            "gopls" => Self::gopls(),
            other => Err(BackendError::UnknownBackend {
                name: other.to_string(),
                known: BUILTIN_BACKENDS.join(", "),
            }),
        }
    }

    /// phpactor speaking LSP on stdio
    pub fn phpactor() -> Result<Self, BackendError> {
        let template = InitializeTemplate::from_json("phpactor", PHPACTOR_TEMPLATE)?;
        Ok(Self::new("phpactor", "php", "phpactor", template)
            .with_args(["language-server"])
            .with_required_capabilities(DEFAULT_REQUIRED_CAPABILITIES)
            .with_ignored_dirs(PHPACTOR_IGNORED_DIRS))
    }

    /// gopls speaking LSP on stdio
    pub fn gopls() -> Result<Self, BackendError> {
        let template = InitializeTemplate::from_json("gopls", GOPLS_TEMPLATE)?;
        Ok(Self::new("gopls", "go", "gopls", template)
            .with_required_capabilities(DEFAULT_REQUIRED_CAPABILITIES)
            .with_setting("gopls", serde_json::json!({"usePlaceholders": false}))
            .with_ignored_dirs(GOPLS_IGNORED_DIRS))
    }

    /// A user-defined backend with a template loaded from disk
    pub fn custom(
        name: impl Into<String>,
        language_id: impl Into<String>,
        command: impl Into<String>,
        template_path: impl AsRef<Path>,
    ) -> Result<Self, BackendError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ConfigError::invalid_path(command, "Backend command cannot be empty").into());
        }
        if command.contains('\0') {
            return Err(
                ConfigError::invalid_path(command, "Backend command contains null character")
                    .into(),
            );
        }

        let template = InitializeTemplate::from_path(template_path)?;
        Ok(Self::new(name, language_id, command, template))
    }

    fn new(
        name: impl Into<String>,
        language_id: impl Into<String>,
        command: impl Into<String>,
        template: InitializeTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            language_id: language_id.into(),
            command: command.into(),
            args: Vec::new(),
            template,
            required_capabilities: Vec::new(),
            settings: Map::new(),
            ignored_dirs: Vec::new(),
        }
    }

    /// Replace the launch arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the launch command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Replace the initialize template
    pub fn with_template(mut self, template: InitializeTemplate) -> Self {
        self.template = template;
        self
    }

    /// Add server capability keys the backend must advertise
    pub fn with_required_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Add directory names whose contents are never reported
    pub fn with_ignored_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignored_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Value returned for a `workspace/configuration` section
    pub fn with_setting(mut self, section: impl Into<String>, value: Value) -> Self {
        self.settings.insert(section.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn template(&self) -> &InitializeTemplate {
        &self.template
    }

    pub fn required_capabilities(&self) -> &[String] {
        &self.required_capabilities
    }

    pub fn ignored_dirs(&self) -> &[String] {
        &self.ignored_dirs
    }

    /// Hidden directories and the profile's ignored names
    pub fn is_ignored_dirname(&self, dirname: &str) -> bool {
        dirname.starts_with('.') || self.ignored_dirs.iter().any(|dir| dir == dirname)
    }

    /// Whether a file, given relative to the workspace root, lives under an ignored directory
    pub fn is_ignored_path(&self, relative_path: &Path) -> bool {
        relative_path
            .parent()
            .is_some_and(|parent| self.is_ignored_dir(parent))
    }

    /// Whether a directory, given relative to the workspace root, is or lies within an ignored one
    pub fn is_ignored_dir(&self, relative_path: &Path) -> bool {
        relative_path.components().any(|component| match component {
            Component::Normal(name) => self.is_ignored_dirname(&name.to_string_lossy()),
            _ => false,
        })
    }

    /// Setting for a configuration section
    ///
    /// Dotted sections (`gopls.ui`) descend into nested objects when no
    /// exact entry exists.
    pub fn setting(&self, section: &str) -> Option<&Value> {
        if let Some(value) = self.settings.get(section) {
            return Some(value);
        }
        let mut parts = section.split('.');
        let mut value = self.settings.get(parts.next()?)?;
        for part in parts {
            value = value.get(part)?;
        }
        Some(value)
    }

    /// Answer a `workspace/configuration` request from this profile's settings
    ///
    /// Unknown sections yield `null`, as the protocol asks of clients.
    pub fn configuration_reply(&self, params: Option<Value>) -> Result<Value, JsonRpcErrorObject> {
        let items = params
            .as_ref()
            .and_then(|params| params.get("items"))
            .and_then(Value::as_array)
            .ok_or_else(|| JsonRpcErrorObject {
                code: error_codes::INVALID_PARAMS,
                message: "workspace/configuration requires an items array".to_string(),
                data: None,
            })?;

        let values = items
            .iter()
            .map(|item| {
                let section = item.get("section").and_then(Value::as_str);
                let value = section.and_then(|section| self.setting(section)).cloned();
                debug!(
                    "Configuration for section {:?}: {}",
                    section,
                    if value.is_some() { "found" } else { "none" }
                );
                value.unwrap_or(Value::Null)
            })
            .collect();
        Ok(Value::Array(values))
    }
}
