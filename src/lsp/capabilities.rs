//! Capability negotiation
//!
//! Capabilities are named with short dotted names ("hover", "rename.prepare")
//! that map onto a path in the backend's `ServerCapabilities` and a path in
//! the client's declared `ClientCapabilities`. A capability is usable only if
//! both sides declare it.

use serde_json::Value;
use std::collections::BTreeMap;

/// One entry of the capability catalog
#[derive(Debug, Clone, Copy)]
pub struct CapabilityEntry {
    /// Short name used by `supports` / `descriptor`
    pub name: &'static str,
    /// Path into the backend's `ServerCapabilities`
    pub server_path: &'static [&'static str],
    /// Path into the client's `ClientCapabilities`
    pub client_path: &'static [&'static str],
}

const fn entry(
    name: &'static str,
    server_path: &'static [&'static str],
    client_path: &'static [&'static str],
) -> CapabilityEntry {
    CapabilityEntry {
        name,
        server_path,
        client_path,
    }
}

/// Every capability the registry knows how to negotiate
pub const CAPABILITY_CATALOG: &[CapabilityEntry] = &[
    entry(
        "textDocumentSync",
        &["textDocumentSync"],
        &["textDocument", "synchronization"],
    ),
    entry("hover", &["hoverProvider"], &["textDocument", "hover"]),
    entry(
        "completion",
        &["completionProvider"],
        &["textDocument", "completion"],
    ),
    entry(
        "completion.resolve",
        &["completionProvider", "resolveProvider"],
        &["textDocument", "completion", "completionItem", "resolveSupport"],
    ),
    entry(
        "signatureHelp",
        &["signatureHelpProvider"],
        &["textDocument", "signatureHelp"],
    ),
    entry(
        "definition",
        &["definitionProvider"],
        &["textDocument", "definition"],
    ),
    entry(
        "declaration",
        &["declarationProvider"],
        &["textDocument", "declaration"],
    ),
    entry(
        "implementation",
        &["implementationProvider"],
        &["textDocument", "implementation"],
    ),
    entry(
        "typeDefinition",
        &["typeDefinitionProvider"],
        &["textDocument", "typeDefinition"],
    ),
    entry(
        "references",
        &["referencesProvider"],
        &["textDocument", "references"],
    ),
    entry(
        "documentHighlight",
        &["documentHighlightProvider"],
        &["textDocument", "documentHighlight"],
    ),
    entry(
        "documentSymbol",
        &["documentSymbolProvider"],
        &["textDocument", "documentSymbol"],
    ),
    entry(
        "workspaceSymbol",
        &["workspaceSymbolProvider"],
        &["workspace", "symbol"],
    ),
    entry("rename", &["renameProvider"], &["textDocument", "rename"]),
    entry(
        "rename.prepare",
        &["renameProvider", "prepareProvider"],
        &["textDocument", "rename", "prepareSupport"],
    ),
    entry(
        "foldingRange",
        &["foldingRangeProvider"],
        &["textDocument", "foldingRange"],
    ),
    entry(
        "selectionRange",
        &["selectionRangeProvider"],
        &["textDocument", "selectionRange"],
    ),
    entry(
        "codeAction",
        &["codeActionProvider"],
        &["textDocument", "codeAction"],
    ),
    entry("codeLens", &["codeLensProvider"], &["textDocument", "codeLens"]),
    entry(
        "codeLens.resolve",
        &["codeLensProvider", "resolveProvider"],
        &["textDocument", "codeLens", "resolveSupport"],
    ),
    entry(
        "typeHierarchy",
        &["typeHierarchyProvider"],
        &["textDocument", "typeHierarchy"],
    ),
    entry(
        "callHierarchy",
        &["callHierarchyProvider"],
        &["textDocument", "callHierarchy"],
    ),
    entry(
        "formatting",
        &["documentFormattingProvider"],
        &["textDocument", "formatting"],
    ),
    entry(
        "executeCommand",
        &["executeCommandProvider"],
        &["workspace", "executeCommand"],
    ),
    entry(
        "diagnostic",
        &["diagnosticProvider"],
        &["textDocument", "diagnostic"],
    ),
];

/// Request methods that require a negotiated capability
const METHOD_CAPABILITIES: &[(&str, &str)] = &[
    ("textDocument/hover", "hover"),
    ("textDocument/completion", "completion"),
    ("completionItem/resolve", "completion.resolve"),
    ("textDocument/signatureHelp", "signatureHelp"),
    ("textDocument/definition", "definition"),
    ("textDocument/declaration", "declaration"),
    ("textDocument/implementation", "implementation"),
    ("textDocument/typeDefinition", "typeDefinition"),
    ("textDocument/references", "references"),
    ("textDocument/documentHighlight", "documentHighlight"),
    ("textDocument/documentSymbol", "documentSymbol"),
    ("workspace/symbol", "workspaceSymbol"),
    ("textDocument/rename", "rename"),
    ("textDocument/prepareRename", "rename.prepare"),
    ("textDocument/foldingRange", "foldingRange"),
    ("textDocument/selectionRange", "selectionRange"),
    ("textDocument/codeAction", "codeAction"),
    ("textDocument/codeLens", "codeLens"),
    ("codeLens/resolve", "codeLens.resolve"),
    ("textDocument/prepareTypeHierarchy", "typeHierarchy"),
    ("typeHierarchy/supertypes", "typeHierarchy"),
    ("typeHierarchy/subtypes", "typeHierarchy"),
    ("textDocument/prepareCallHierarchy", "callHierarchy"),
    ("callHierarchy/incomingCalls", "callHierarchy"),
    ("callHierarchy/outgoingCalls", "callHierarchy"),
    ("textDocument/formatting", "formatting"),
    ("workspace/executeCommand", "executeCommand"),
    ("textDocument/diagnostic", "diagnostic"),
];

/// Capability a request method depends on, if any
pub fn capability_for_method(method: &str) -> Option<&'static str> {
    METHOD_CAPABILITIES
        .iter()
        .find(|(m, _)| *m == method)
        .map(|(_, capability)| *capability)
}

fn catalog_entry(name: &str) -> Option<&'static CapabilityEntry> {
    CAPABILITY_CATALOG.iter().find(|entry| entry.name == name)
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, key| value.get(key))
}

/// Server-side declarations: `true`, an options object, or a non-zero sync kind
fn server_declares(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(enabled) => *enabled,
        Value::Number(n) => n.as_u64() != Some(0),
        _ => true,
    }
}

/// Client-side declarations: anything present other than `false`/`null`
fn client_declares(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Capabilities declared by one side, keyed by catalog name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilitySet {
    entries: BTreeMap<&'static str, Value>,
}

impl CapabilitySet {
    /// Collect the catalog capabilities present in a `ClientCapabilities` document
    pub fn from_client(capabilities: &Value) -> Self {
        Self::collect(capabilities, |entry| entry.client_path, client_declares)
    }

    /// Collect the catalog capabilities present in a `ServerCapabilities` document
    pub fn from_server(capabilities: &Value) -> Self {
        Self::collect(capabilities, |entry| entry.server_path, server_declares)
    }

    fn collect(
        capabilities: &Value,
        path: impl Fn(&CapabilityEntry) -> &'static [&'static str],
        declares: impl Fn(&Value) -> bool,
    ) -> Self {
        let entries = CAPABILITY_CATALOG
            .iter()
            .filter_map(|entry| {
                lookup(capabilities, path(entry))
                    .filter(|value| declares(value))
                    .map(|value| (entry.name, value.clone()))
            })
            .collect();
        Self { entries }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Negotiated capabilities of one session
///
/// Built once when the handshake completes and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    client: CapabilitySet,
    server: CapabilitySet,
    server_capabilities: Value,
}

impl CapabilityRegistry {
    /// Merge the client's declared capabilities with the backend's response
    pub fn negotiate(client_capabilities: &Value, server_capabilities: &Value) -> Self {
        Self {
            client: CapabilitySet::from_client(client_capabilities),
            server: CapabilitySet::from_server(server_capabilities),
            server_capabilities: server_capabilities.clone(),
        }
    }

    /// Whether an operation may be used in this session
    ///
    /// Catalog names require both sides; any other name is looked up as a
    /// dotted path in the raw server capabilities (e.g. `"experimental.foo"`).
    pub fn supports(&self, name: &str) -> bool {
        if catalog_entry(name).is_some() {
            return self.client.contains(name) && self.server.contains(name);
        }
        self.raw_lookup(name).is_some_and(server_declares)
    }

    /// The backend's structured descriptor for a supported capability
    pub fn descriptor(&self, name: &str) -> Option<&Value> {
        if catalog_entry(name).is_some() {
            return self
                .supports(name)
                .then(|| self.server.get(name))
                .flatten();
        }
        self.raw_lookup(name).filter(|value| server_declares(value))
    }

    /// Whether the backend declares a capability, regardless of the client
    pub fn server_declares(&self, name: &str) -> bool {
        self.server.contains(name)
    }

    /// Names of every negotiated capability
    pub fn negotiated(&self) -> Vec<&'static str> {
        self.server
            .names()
            .filter(|name| self.client.contains(name))
            .collect()
    }

    /// Commands the backend accepts through `workspace/executeCommand`
    pub fn commands(&self) -> Vec<&str> {
        self.descriptor("executeCommand")
            .and_then(|descriptor| descriptor.get("commands"))
            .and_then(Value::as_array)
            .map(|commands| commands.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn client(&self) -> &CapabilitySet {
        &self.client
    }

    pub fn server(&self) -> &CapabilitySet {
        &self.server
    }

    /// The backend's `capabilities` object as received
    pub fn server_capabilities(&self) -> &Value {
        &self.server_capabilities
    }

    fn raw_lookup(&self, name: &str) -> Option<&Value> {
        let path: Vec<&str> = name.split('.').collect();
        lookup(&self.server_capabilities, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_caps() -> Value {
        json!({
            "textDocument": {
                "synchronization": {"didSave": true},
                "hover": {"contentFormat": ["markdown", "plaintext"]},
                "completion": {"completionItem": {"resolveSupport": {"properties": ["documentation"]}}},
                "rename": {"prepareSupport": true},
                "definition": {"linkSupport": true},
                "codeLens": {}
            },
            "workspace": {
                "symbol": {},
                "executeCommand": {}
            }
        })
    }

    #[test]
    fn test_both_sides_rule() {
        let server = json!({
            "hoverProvider": true,
            "completionProvider": {"triggerCharacters": ["$", ">"], "resolveProvider": false},
            "renameProvider": {"prepareProvider": true},
            "referencesProvider": true,
            "definitionProvider": false,
        });
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        assert!(registry.supports("hover"));
        assert!(registry.supports("completion"));
        assert!(!registry.supports("completion.resolve"));
        assert!(registry.supports("rename"));
        assert!(registry.supports("rename.prepare"));
        // Backend offers it but the client never asked for it
        assert!(registry.server_declares("references"));
        assert!(!registry.supports("references"));
        assert!(!registry.supports("definition"));
    }

    #[test]
    fn test_missing_rename_provider() {
        let server = json!({"hoverProvider": true});
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        assert!(!registry.supports("rename"));
        assert!(!registry.supports("rename.prepare"));
        assert_eq!(registry.descriptor("rename"), None);
    }

    #[test]
    fn test_rename_true_has_no_prepare() {
        let server = json!({"renameProvider": true});
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        assert!(registry.supports("rename"));
        assert!(!registry.supports("rename.prepare"));
    }

    #[test]
    fn test_descriptor_returns_backend_options() {
        let server = json!({
            "completionProvider": {"triggerCharacters": ["$", ">", ":"]}
        });
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        let descriptor = registry.descriptor("completion").unwrap();
        assert_eq!(descriptor["triggerCharacters"], json!(["$", ">", ":"]));
    }

    #[test]
    fn test_text_document_sync_kind_none() {
        let registry =
            CapabilityRegistry::negotiate(&client_caps(), &json!({"textDocumentSync": 0}));
        assert!(!registry.supports("textDocumentSync"));

        let registry =
            CapabilityRegistry::negotiate(&client_caps(), &json!({"textDocumentSync": 2}));
        assert!(registry.supports("textDocumentSync"));
        assert_eq!(registry.descriptor("textDocumentSync"), Some(&json!(2)));
    }

    #[test]
    fn test_execute_command_catalog() {
        let server = json!({
            "executeCommandProvider": {"commands": ["import_class", "transform"]}
        });
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        assert!(registry.supports("executeCommand"));
        assert_eq!(registry.commands(), vec!["import_class", "transform"]);
    }

    #[test]
    fn test_raw_lookup_for_unknown_names() {
        let server = json!({"experimental": {"inlayHints": true, "off": false}});
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);

        assert!(registry.supports("experimental.inlayHints"));
        assert!(!registry.supports("experimental.off"));
        assert!(!registry.supports("experimental.missing"));
    }

    #[test]
    fn test_method_table() {
        assert_eq!(capability_for_method("textDocument/rename"), Some("rename"));
        assert_eq!(
            capability_for_method("textDocument/prepareRename"),
            Some("rename.prepare")
        );
        assert_eq!(capability_for_method("shutdown"), None);

        for (_, capability) in METHOD_CAPABILITIES {
            assert!(catalog_entry(capability).is_some(), "{capability} not in catalog");
        }
    }

    #[test]
    fn test_negotiated_names() {
        let server = json!({"hoverProvider": true, "referencesProvider": true});
        let registry = CapabilityRegistry::negotiate(&client_caps(), &server);
        assert_eq!(registry.negotiated(), vec!["hover"]);
    }
}
