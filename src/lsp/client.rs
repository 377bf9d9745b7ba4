//! High-level LSP client
//!
//! Typed operations over a ready [`Session`] using the lsp-types crate,
//! plus open-document tracking for the text synchronization notifications.

use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, Notification,
    PublishDiagnostics,
};
use lsp_types::request::{
    CodeActionRequest, CodeLensRequest, CodeLensResolve, Completion, DocumentSymbolRequest,
    ExecuteCommand, FoldingRangeRequest, GotoDeclaration, GotoDeclarationResponse,
    GotoDefinition, GotoImplementation, GotoImplementationResponse, GotoTypeDefinition,
    GotoTypeDefinitionResponse, HoverRequest, PrepareRenameRequest, References, Rename, Request,
    ResolveCompletionItem, SelectionRangeRequest, SignatureHelpRequest, TypeHierarchyPrepare,
    TypeHierarchySubtypes, TypeHierarchySupertypes, WorkspaceSymbolRequest,
};
use lsp_types::{
    CodeActionContext, CodeActionOrCommand, CodeActionParams, CodeLens,
    CodeLensParams, CompletionItem, CompletionParams, CompletionResponse, Diagnostic,
    DocumentSymbolParams, DocumentSymbolResponse, ExecuteCommandParams, FoldingRange,
    FoldingRangeParams, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams,
    Location, Position, PrepareRenameResponse, PublishDiagnosticsParams, Range, ReferenceContext,
    ReferenceParams, RenameParams, SelectionRange, SelectionRangeParams, SignatureHelp,
    SignatureHelpParams, TextDocumentIdentifier, TextDocumentPositionParams, TypeHierarchyItem,
    TypeHierarchyPrepareParams, TypeHierarchySubtypesParams, TypeHierarchySupertypesParams, Uri,
    WorkDoneProgressParams, WorkspaceEdit, WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::lsp::documents::{Checkpoint, DocumentStore};
use crate::lsp::error::SessionError;
use crate::lsp::session::Session;
use crate::template::uri_from_path;

/// Typed LSP client over one session
pub struct LspClient {
    session: Session,
    documents: Mutex<DocumentStore>,
}

fn position_params(uri: &Uri, position: Position) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position,
    }
}

fn goto_params(uri: &Uri, position: Position) -> GotoDefinitionParams {
    GotoDefinitionParams {
        text_document_position_params: position_params(uri, position),
        work_done_progress_params: Default::default(),
        partial_result_params: Default::default(),
    }
}

/// Keep the local store in step with the backend when a notification is lost
fn undo_on_error(
    documents: &mut DocumentStore,
    checkpoint: Checkpoint,
    sent: Result<(), SessionError>,
) -> Result<(), SessionError> {
    if sent.is_err() {
        documents.rollback(checkpoint);
    }
    sent
}

impl LspClient {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            documents: Mutex::new(DocumentStore::new()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Orderly shutdown of the underlying session
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.session.shutdown().await
    }

    // ------------------------------------------------------------------
    // Document synchronization
    // ------------------------------------------------------------------

    /// Open a document, sending `didOpen` only for the first reference
    pub fn open_document(
        &self,
        uri: Uri,
        language_id: &str,
        text: String,
    ) -> Result<(), SessionError> {
        self.session.ensure_ready()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = documents.checkpoint(&uri);
        if let Some(params) = documents.open(uri, language_id, text) {
            let sent = self.session.notification::<DidOpenTextDocument>(params);
            undo_on_error(&mut documents, checkpoint, sent)?;
        }
        Ok(())
    }

    /// Read a file from disk and open it
    pub fn open_file(&self, path: &Path, language_id: &str) -> Result<Uri, SessionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::UnknownDocument(format!("cannot read {}: {e}", path.display()))
        })?;
        let uri = uri_from_path(path)?;
        self.open_document(uri.clone(), language_id, text)?;
        Ok(uri)
    }

    /// Release a document, sending `didClose` when the last reference goes
    pub fn close_document(&self, uri: &Uri) -> Result<(), SessionError> {
        self.session.ensure_ready()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = documents.checkpoint(uri);
        if let Some(params) = documents.close(uri)? {
            let sent = self.session.notification::<DidCloseTextDocument>(params);
            undo_on_error(&mut documents, checkpoint, sent)?;
        }
        Ok(())
    }

    /// Insert text; returns the position just after the inserted text
    pub fn insert_text(
        &self,
        uri: &Uri,
        position: Position,
        text: &str,
    ) -> Result<Position, SessionError> {
        self.session.ensure_ready()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = documents.checkpoint(uri);
        let (params, end) = documents.insert(uri, position, text)?;
        let sent = self.session.notification::<DidChangeTextDocument>(params);
        undo_on_error(&mut documents, checkpoint, sent)?;
        Ok(end)
    }

    /// Delete a range; returns the removed text
    pub fn delete_range(&self, uri: &Uri, range: Range) -> Result<String, SessionError> {
        self.session.ensure_ready()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = documents.checkpoint(uri);
        let (params, removed) = documents.delete(uri, range)?;
        let sent = self.session.notification::<DidChangeTextDocument>(params);
        undo_on_error(&mut documents, checkpoint, sent)?;
        Ok(removed)
    }

    /// Replace the full text of an open document
    pub fn replace_text(&self, uri: &Uri, text: String) -> Result<(), SessionError> {
        self.session.ensure_ready()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let checkpoint = documents.checkpoint(uri);
        let params = documents.replace(uri, text)?;
        let sent = self.session.notification::<DidChangeTextDocument>(params);
        undo_on_error(&mut documents, checkpoint, sent)
    }

    /// Current local text of an open document
    pub fn document_text(&self, uri: &Uri) -> Option<String> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .text(uri)
            .map(str::to_string)
    }

    /// Observe `textDocument/publishDiagnostics`
    pub fn on_diagnostics<F>(&self, handler: F)
    where
        F: Fn(PublishDiagnosticsParams) + Send + Sync + 'static,
    {
        self.session
            .on_notification(PublishDiagnostics::METHOD, move |notification| {
                let Some(params) = notification.params.clone() else {
                    return;
                };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => handler(params),
                    Err(e) => warn!("Malformed publishDiagnostics: {}", e),
                }
            });
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub async fn definition(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<GotoDefinitionResponse>, SessionError> {
        self.session
            .request::<GotoDefinition>(goto_params(uri, position))
            .await
    }

    pub async fn declaration(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<GotoDeclarationResponse>, SessionError> {
        self.session
            .request::<GotoDeclaration>(goto_params(uri, position))
            .await
    }

    pub async fn implementation(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<GotoImplementationResponse>, SessionError> {
        self.session
            .request::<GotoImplementation>(goto_params(uri, position))
            .await
    }

    pub async fn type_definition(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<GotoTypeDefinitionResponse>, SessionError> {
        self.session
            .request::<GotoTypeDefinition>(goto_params(uri, position))
            .await
    }

    pub async fn references(
        &self,
        uri: &Uri,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, SessionError> {
        let params = ReferenceParams {
            text_document_position: position_params(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: ReferenceContext {
                include_declaration,
            },
        };
        Ok(self
            .session
            .request::<References>(params)
            .await?
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Information
    // ------------------------------------------------------------------

    pub async fn hover(&self, uri: &Uri, position: Position) -> Result<Option<Hover>, SessionError> {
        let params = HoverParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: Default::default(),
        };
        self.session.request::<HoverRequest>(params).await
    }

    pub async fn completion(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<CompletionResponse>, SessionError> {
        let params = CompletionParams {
            text_document_position: position_params(uri, position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: None,
        };
        self.session.request::<Completion>(params).await
    }

    pub async fn resolve_completion(
        &self,
        item: CompletionItem,
    ) -> Result<CompletionItem, SessionError> {
        self.session.request::<ResolveCompletionItem>(item).await
    }

    pub async fn signature_help(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<SignatureHelp>, SessionError> {
        let params = SignatureHelpParams {
            context: None,
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: Default::default(),
        };
        self.session.request::<SignatureHelpRequest>(params).await
    }

    pub async fn document_symbols(
        &self,
        uri: &Uri,
    ) -> Result<Option<DocumentSymbolResponse>, SessionError> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.session.request::<DocumentSymbolRequest>(params).await
    }

    pub async fn workspace_symbols(
        &self,
        query: &str,
    ) -> Result<Option<WorkspaceSymbolResponse>, SessionError> {
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.session.request::<WorkspaceSymbolRequest>(params).await
    }

    pub async fn folding_ranges(&self, uri: &Uri) -> Result<Vec<FoldingRange>, SessionError> {
        let params = FoldingRangeParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<FoldingRangeRequest>(params)
            .await?
            .unwrap_or_default())
    }

    pub async fn selection_ranges(
        &self,
        uri: &Uri,
        positions: Vec<Position>,
    ) -> Result<Vec<SelectionRange>, SessionError> {
        let params = SelectionRangeParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            positions,
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<SelectionRangeRequest>(params)
            .await?
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Refactoring
    // ------------------------------------------------------------------

    pub async fn prepare_rename(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Option<PrepareRenameResponse>, SessionError> {
        self.session
            .request::<PrepareRenameRequest>(position_params(uri, position))
            .await
    }

    pub async fn rename(
        &self,
        uri: &Uri,
        position: Position,
        new_name: &str,
    ) -> Result<Option<WorkspaceEdit>, SessionError> {
        let params = RenameParams {
            text_document_position: position_params(uri, position),
            new_name: new_name.to_string(),
            work_done_progress_params: Default::default(),
        };
        self.session.request::<Rename>(params).await
    }

    pub async fn code_actions(
        &self,
        uri: &Uri,
        range: Range,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<Vec<CodeActionOrCommand>, SessionError> {
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            range,
            context: CodeActionContext {
                diagnostics,
                only: None,
                trigger_kind: None,
            },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<CodeActionRequest>(params)
            .await?
            .unwrap_or_default())
    }

    pub async fn code_lens(&self, uri: &Uri) -> Result<Vec<CodeLens>, SessionError> {
        let params = CodeLensParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<CodeLensRequest>(params)
            .await?
            .unwrap_or_default())
    }

    pub async fn resolve_code_lens(&self, lens: CodeLens) -> Result<CodeLens, SessionError> {
        self.session.request::<CodeLensResolve>(lens).await
    }

    pub async fn prepare_type_hierarchy(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Vec<TypeHierarchyItem>, SessionError> {
        let params = TypeHierarchyPrepareParams {
            text_document_position_params: position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        Ok(self
            .session
            .request::<TypeHierarchyPrepare>(params)
            .await?
            .unwrap_or_default())
    }

    pub async fn supertypes(
        &self,
        item: TypeHierarchyItem,
    ) -> Result<Vec<TypeHierarchyItem>, SessionError> {
        let params = TypeHierarchySupertypesParams {
            item,
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<TypeHierarchySupertypes>(params)
            .await?
            .unwrap_or_default())
    }

    pub async fn subtypes(
        &self,
        item: TypeHierarchyItem,
    ) -> Result<Vec<TypeHierarchyItem>, SessionError> {
        let params = TypeHierarchySubtypesParams {
            item,
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        Ok(self
            .session
            .request::<TypeHierarchySubtypes>(params)
            .await?
            .unwrap_or_default())
    }

    /// Run a backend command
    ///
    /// Only commands the backend advertised in `executeCommandProvider` are
    /// sent; anything else fails without touching the wire.
    pub async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, SessionError> {
        let registry = self.session.capabilities()?;
        if !registry.commands().contains(&command) {
            debug!("Refusing unadvertised command {}", command);
            return Err(SessionError::UnsupportedOperation {
                method: ExecuteCommand::METHOD.to_string(),
                capability: format!("executeCommand:{command}"),
            });
        }

        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: Default::default(),
        };
        self.session.request::<ExecuteCommand>(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SessionConfig;
    use crate::io::transport::{MockBackend, MockTransport};
    use crate::lsp::error::ErrorKind;
    use crate::template::{InitializeTemplate, ResolveContext, resolve};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[cfg(feature = "test-logging")]
    crate::setup_test_logging!();

    fn uri() -> Uri {
        Uri::from_str("file:///proj/src/Foo.php").unwrap()
    }

    async fn ready_client(server_capabilities: Value) -> (LspClient, MockBackend) {
        let template = InitializeTemplate::parse(
            "php",
            json!({
                "processId": "$processId",
                "rootUri": "$rootUri",
                "capabilities": {
                    "textDocument": {
                        "synchronization": {"didSave": true},
                        "definition": {"linkSupport": true},
                        "references": {},
                        "hover": {},
                        "rename": {"prepareSupport": true}
                    },
                    "workspace": {"executeCommand": {"commands": ["import_class"]}}
                }
            }),
        )
        .unwrap();
        let params = resolve(&template, &ResolveContext::for_workspace("/proj")).unwrap();

        let (transport, mut backend) = MockTransport::pair();
        let config = SessionConfig::builder()
            .request_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let session = Session::new(transport, config);

        let handshake = session.initialize(params);
        let script = async {
            let initialize = backend.next_message().await.unwrap();
            backend.push_message(&json!({
                "jsonrpc": "2.0",
                "id": initialize["id"],
                "result": {"capabilities": server_capabilities}
            }));
            backend.next_message().await.unwrap();
        };
        let (result, ()) = tokio::join!(handshake, script);
        result.unwrap();
        (LspClient::new(session), backend)
    }

    fn reply(backend: &mut MockBackend, request: &Value, result: Value) {
        backend.push_message(&json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
    }

    #[tokio::test]
    async fn test_document_lifecycle_notifications() {
        let (client, mut backend) = ready_client(json!({"textDocumentSync": 2})).await;

        client
            .open_document(uri(), "php", "<?php\n".to_string())
            .unwrap();
        client
            .open_document(uri(), "php", "<?php\n".to_string())
            .unwrap();
        let end = client
            .insert_text(&uri(), Position::new(1, 0), "echo 1;")
            .unwrap();
        assert_eq!(end, Position::new(1, 7));
        client.close_document(&uri()).unwrap();
        client.close_document(&uri()).unwrap();

        let open = backend.next_message().await.unwrap();
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["version"], json!(0));

        let change = backend.next_message().await.unwrap();
        assert_eq!(change["method"], "textDocument/didChange");
        assert_eq!(change["params"]["textDocument"]["version"], json!(1));
        assert_eq!(change["params"]["contentChanges"][0]["text"], "echo 1;");

        let close = backend.next_message().await.unwrap();
        assert_eq!(close["method"], "textDocument/didClose");
        assert!(client.document_text(&uri()).is_none());

        let err = client.close_document(&uri()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn test_definition_request() {
        let (client, mut backend) = ready_client(json!({"definitionProvider": true})).await;

        let uri = uri();
        let definition = client.definition(&uri, Position::new(2, 4));
        let script = async {
            let request = backend.next_message().await.unwrap();
            assert_eq!(request["method"], "textDocument/definition");
            assert_eq!(request["params"]["textDocument"]["uri"], "file:///proj/src/Foo.php");
            reply(
                &mut backend,
                &request,
                json!([{
                    "uri": "file:///proj/src/Bar.php",
                    "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 3}}
                }]),
            );
        };
        let (definition, ()) = tokio::join!(definition, script);

        match definition.unwrap() {
            Some(GotoDefinitionResponse::Array(locations)) => {
                assert_eq!(locations.len(), 1);
                assert_eq!(locations[0].range.start, Position::new(1, 0));
            }
            other => panic!("unexpected definition response {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_references_null_result_is_empty() {
        let (client, mut backend) = ready_client(json!({"referencesProvider": true})).await;

        let uri = uri();
        let references = client.references(&uri, Position::new(0, 0), true);
        let script = async {
            let request = backend.next_message().await.unwrap();
            assert_eq!(request["params"]["context"]["includeDeclaration"], json!(true));
            reply(&mut backend, &request, Value::Null);
        };
        let (references, ()) = tokio::join!(references, script);
        assert!(references.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_without_provider_is_refused() {
        let (client, backend) = ready_client(json!({"hoverProvider": true})).await;
        let before = backend.bytes_sent();

        let err = client
            .rename(&uri(), Position::new(0, 0), "renamed")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        let err = client
            .prepare_rename(&uri(), Position::new(0, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(backend.bytes_sent(), before);
    }

    #[tokio::test]
    async fn test_execute_command_gating() {
        let (client, mut backend) = ready_client(json!({
            "executeCommandProvider": {"commands": ["import_class"]}
        }))
        .await;
        let before = backend.bytes_sent();

        let err = client.execute_command("drop_database", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(backend.bytes_sent(), before);

        let run = client.execute_command("import_class", vec![json!("Foo")]);
        let script = async {
            let request = backend.next_message().await.unwrap();
            assert_eq!(request["params"]["command"], "import_class");
            assert_eq!(request["params"]["arguments"], json!(["Foo"]));
            reply(&mut backend, &request, json!({"applied": true}));
        };
        let (result, ()) = tokio::join!(run, script);
        assert_eq!(result.unwrap(), Some(json!({"applied": true})));
    }

    #[tokio::test]
    async fn test_diagnostics_observer() {
        let (client, mut backend) = ready_client(json!({"hoverProvider": true})).await;
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        client.on_diagnostics(move |params| sink.lock().unwrap().push(params));

        backend.push_message(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": "file:///proj/src/Foo.php",
                "diagnostics": [{
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 5}},
                    "severity": 1,
                    "message": "syntax error"
                }]
            }
        }));

        // Flush the connection with a round trip
        let uri = uri();
        let hover = client.hover(&uri, Position::new(0, 0));
        let script = async {
            let request = backend.next_message().await.unwrap();
            reply(&mut backend, &request, Value::Null);
        };
        let (hover, ()) = tokio::join!(hover, script);
        assert!(hover.unwrap().is_none());

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].diagnostics[0].message, "syntax error");
    }

    #[test]
    fn test_lost_notification_leaves_store_unchanged() {
        let mut documents = DocumentStore::new();
        documents.open(uri(), "php", "<?php\n".to_string());

        let checkpoint = documents.checkpoint(&uri());
        documents.replace(&uri(), "<?php echo 1;\n".to_string()).unwrap();
        let err = undo_on_error(&mut documents, checkpoint, Err(SessionError::SessionDead))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionDead);
        assert_eq!(documents.text(&uri()), Some("<?php\n"));
        assert_eq!(documents.version(&uri()), Some(0));

        let checkpoint = documents.checkpoint(&uri());
        documents.replace(&uri(), "<?php echo 2;\n".to_string()).unwrap();
        undo_on_error(&mut documents, checkpoint, Ok(())).unwrap();
        assert_eq!(documents.version(&uri()), Some(1));
    }

    #[tokio::test]
    async fn test_open_file_from_disk() {
        let (client, mut backend) = ready_client(json!({"textDocumentSync": 1})).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Baz.php");
        std::fs::write(&path, "<?php class Baz {}\n").unwrap();

        let uri = client.open_file(&path, "php").unwrap();
        assert!(uri.as_str().ends_with("/Baz.php"));

        let open = backend.next_message().await.unwrap();
        assert_eq!(open["params"]["textDocument"]["text"], "<?php class Baz {}\n");
        assert_eq!(open["params"]["textDocument"]["languageId"], "php");
    }
}
