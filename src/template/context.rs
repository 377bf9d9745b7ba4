//! Runtime values substituted into initialize templates

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use tracing::warn;

use crate::lsp::error::SessionError;

/// Placeholders recognised in initialize templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    /// `$rootPath`: workspace root as a filesystem path
    RootPath,
    /// `$rootUri`: workspace root as a `file://` URI
    RootUri,
    /// `$uri`: URI of the single workspace folder
    FolderUri,
    /// `$name`: name of the single workspace folder
    FolderName,
    /// `$processId`: the client's process id, substituted as a number
    ProcessId,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::RootPath,
        Placeholder::RootUri,
        Placeholder::FolderUri,
        Placeholder::FolderName,
        Placeholder::ProcessId,
    ];

    /// Token name without the leading `$`
    pub fn name(self) -> &'static str {
        match self {
            Placeholder::RootPath => "rootPath",
            Placeholder::RootUri => "rootUri",
            Placeholder::FolderUri => "uri",
            Placeholder::FolderName => "name",
            Placeholder::ProcessId => "processId",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Values available to the resolver
///
/// The process id is captured once when the context is built rather than
/// looked up during resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveContext {
    root_path: Option<String>,
    root_uri: Option<String>,
    folder_uri: Option<String>,
    folder_name: Option<String>,
    process_id: Option<u32>,
}

impl ResolveContext {
    /// A context with every value supplied explicitly
    pub fn new(
        root_path: impl Into<String>,
        root_uri: impl Into<String>,
        folder_uri: impl Into<String>,
        folder_name: impl Into<String>,
        process_id: u32,
    ) -> Self {
        Self {
            root_path: Some(root_path.into()),
            root_uri: Some(root_uri.into()),
            folder_uri: Some(folder_uri.into()),
            folder_name: Some(folder_name.into()),
            process_id: Some(process_id),
        }
    }

    /// Derive every value from a workspace root and the current process
    ///
    /// The workspace root doubles as the single workspace folder.
    pub fn for_workspace(root: impl AsRef<Path>) -> Self {
        let root = absolute(root.as_ref());
        let uri = path_to_uri(&root);
        if uri.is_none() {
            warn!("Workspace root {} has no file URI form", root.display());
        }
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());

        Self {
            root_path: Some(root.to_string_lossy().into_owned()),
            root_uri: uri.clone(),
            folder_uri: uri,
            folder_name: Some(name),
            process_id: Some(std::process::id()),
        }
    }

    /// An empty context; every placeholder is unresolved
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    pub fn with_root_uri(mut self, root_uri: impl Into<String>) -> Self {
        self.root_uri = Some(root_uri.into());
        self
    }

    pub fn with_folder(mut self, uri: impl Into<String>, name: impl Into<String>) -> Self {
        self.folder_uri = Some(uri.into());
        self.folder_name = Some(name.into());
        self
    }

    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = Some(process_id);
        self
    }

    pub fn without(mut self, placeholder: Placeholder) -> Self {
        match placeholder {
            Placeholder::RootPath => self.root_path = None,
            Placeholder::RootUri => self.root_uri = None,
            Placeholder::FolderUri => self.folder_uri = None,
            Placeholder::FolderName => self.folder_name = None,
            Placeholder::ProcessId => self.process_id = None,
        }
        self
    }

    /// Typed value for a placeholder, if supplied
    pub fn value(&self, placeholder: Placeholder) -> Option<Value> {
        match placeholder {
            Placeholder::RootPath => self.root_path.clone().map(Value::String),
            Placeholder::RootUri => self.root_uri.clone().map(Value::String),
            Placeholder::FolderUri => self.folder_uri.clone().map(Value::String),
            Placeholder::FolderName => self.folder_name.clone().map(Value::String),
            Placeholder::ProcessId => self.process_id.map(Value::from),
        }
    }

    /// Textual form used when a placeholder is embedded in a longer string
    pub fn text(&self, placeholder: Placeholder) -> Option<String> {
        match placeholder {
            Placeholder::ProcessId => self.process_id.map(|pid| pid.to_string()),
            other => self.value(other).and_then(|v| v.as_str().map(str::to_string)),
        }
    }

    pub fn root_path(&self) -> Option<&str> {
        self.root_path.as_deref()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Convert a filesystem path into a percent-encoded `file://` URI string
///
/// Relative paths are made absolute against the current directory. `None`
/// when the path cannot be expressed as a file URI.
pub fn path_to_uri(path: &Path) -> Option<String> {
    Url::from_file_path(absolute(path)).ok().map(String::from)
}

/// Convert a filesystem path into an [`lsp_types::Uri`]
pub fn uri_from_path(path: &Path) -> Result<lsp_types::Uri, SessionError> {
    let uri = path_to_uri(path).ok_or_else(|| SessionError::InvalidUri(path.display().to_string()))?;
    lsp_types::Uri::from_str(&uri).map_err(|e| SessionError::InvalidUri(format!("{uri}: {e}")))
}

/// Convert a `file://` URI back into a filesystem path
///
/// `None` for other schemes and for URIs with a non-local host.
pub fn path_from_uri(uri: &lsp_types::Uri) -> Option<PathBuf> {
    Url::parse(uri.as_str()).ok()?.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_names_round_trip() {
        for placeholder in Placeholder::ALL {
            assert_eq!(Placeholder::from_name(placeholder.name()), Some(placeholder));
        }
        assert_eq!(Placeholder::from_name("rootUriX"), None);
    }

    #[test]
    fn test_for_workspace() {
        let context = ResolveContext::for_workspace("/srv/projects/acme");
        assert_eq!(context.root_path(), Some("/srv/projects/acme"));
        assert_eq!(
            context.value(Placeholder::RootUri),
            Some(Value::from("file:///srv/projects/acme"))
        );
        assert_eq!(
            context.value(Placeholder::FolderName),
            Some(Value::from("acme"))
        );
        assert_eq!(
            context.value(Placeholder::ProcessId),
            Some(Value::from(std::process::id()))
        );
    }

    #[test]
    fn test_without_removes_value() {
        let context = ResolveContext::new("/proj", "file:///proj", "file:///proj", "proj", 4242)
            .without(Placeholder::FolderName);
        assert_eq!(context.value(Placeholder::FolderName), None);
        assert_eq!(context.text(Placeholder::ProcessId), Some("4242".to_string()));
    }

    #[test]
    fn test_uri_helpers() {
        let uri = uri_from_path(Path::new("/tmp/my project/a.php")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/my%20project/a.php");
        assert_eq!(path_from_uri(&uri), Some(PathBuf::from("/tmp/my project/a.php")));

        let remote = lsp_types::Uri::from_str("https://example.com/a.php").unwrap();
        assert_eq!(path_from_uri(&remote), None);
    }

    #[test]
    fn test_non_ascii_paths_are_percent_encoded() {
        let uri = uri_from_path(Path::new("/tmp/café/a#1.php")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/caf%C3%A9/a%231.php");
        assert_eq!(path_from_uri(&uri), Some(PathBuf::from("/tmp/café/a#1.php")));

        let encoded = lsp_types::Uri::from_str("file:///tmp/caf%C3%A9/a.php").unwrap();
        assert_eq!(path_from_uri(&encoded), Some(PathBuf::from("/tmp/café/a.php")));

        let context = ResolveContext::for_workspace("/srv/déjà vu");
        assert_eq!(
            context.value(Placeholder::RootUri),
            Some(Value::from("file:///srv/d%C3%A9j%C3%A0%20vu"))
        );
        assert_eq!(context.value(Placeholder::FolderName), Some(Value::from("déjà vu")));
    }
}
