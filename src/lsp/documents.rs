//! Open-document bookkeeping
//!
//! Tracks the text and version of every document the client has opened on
//! the backend. Opens are reference counted: only the first open produces a
//! `didOpen` and only the last close produces a `didClose`. Edits are
//! applied to the local buffer and turned into incremental `didChange`
//! notifications. Positions use UTF-16 code units, as LSP requires.

use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, Position,
    Range, TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Uri,
    VersionedTextDocumentIdentifier,
};
use std::collections::HashMap;
use tracing::trace;

use crate::lsp::error::SessionError;

#[derive(Debug, Clone)]
struct OpenDocument {
    language_id: String,
    version: i32,
    text: String,
    open_count: usize,
}

/// Saved state of one document, restored by [`DocumentStore::rollback`]
#[derive(Debug)]
pub struct Checkpoint {
    uri: Uri,
    document: Option<OpenDocument>,
}

/// Documents currently open on the backend
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<Uri, OpenDocument>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a document; returns the `didOpen` payload on the first open only
    pub fn open(
        &mut self,
        uri: Uri,
        language_id: &str,
        text: String,
    ) -> Option<DidOpenTextDocumentParams> {
        if let Some(document) = self.documents.get_mut(&uri) {
            document.open_count += 1;
            trace!("{} already open ({} references)", uri.as_str(), document.open_count);
            return None;
        }

        let document = OpenDocument {
            language_id: language_id.to_string(),
            version: 0,
            text,
            open_count: 1,
        };
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: document.language_id.clone(),
                version: document.version,
                text: document.text.clone(),
            },
        };
        self.documents.insert(uri, document);
        Some(params)
    }

    /// Release one reference; returns the `didClose` payload when the last one goes
    pub fn close(&mut self, uri: &Uri) -> Result<Option<DidCloseTextDocumentParams>, SessionError> {
        let document = self.get_mut(uri)?;
        document.open_count -= 1;
        if document.open_count > 0 {
            return Ok(None);
        }

        self.documents.remove(uri);
        Ok(Some(DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        }))
    }

    /// Insert text at a position
    ///
    /// Returns the `didChange` payload and the position just after the
    /// inserted text.
    pub fn insert(
        &mut self,
        uri: &Uri,
        position: Position,
        text: &str,
    ) -> Result<(DidChangeTextDocumentParams, Position), SessionError> {
        let document = self.get_mut(uri)?;
        let offset = byte_offset(&document.text, position, uri)?;
        document.text.insert_str(offset, text);
        document.version += 1;

        let end = advance(position, text);
        let change = TextDocumentContentChangeEvent {
            range: Some(Range::new(position, position)),
            range_length: None,
            text: text.to_string(),
        };
        Ok((changed(uri, document.version, change), end))
    }

    /// Delete a range; returns the `didChange` payload and the removed text
    pub fn delete(
        &mut self,
        uri: &Uri,
        range: Range,
    ) -> Result<(DidChangeTextDocumentParams, String), SessionError> {
        let document = self.get_mut(uri)?;
        let start = byte_offset(&document.text, range.start, uri)?;
        let end = byte_offset(&document.text, range.end, uri)?;
        if end < start {
            return Err(SessionError::UnknownDocument(format!(
                "{}: range end precedes start",
                uri.as_str()
            )));
        }
        let removed: String = document.text.drain(start..end).collect();
        document.version += 1;

        let change = TextDocumentContentChangeEvent {
            range: Some(range),
            range_length: None,
            text: String::new(),
        };
        Ok((changed(uri, document.version, change), removed))
    }

    /// Replace the whole document content
    pub fn replace(
        &mut self,
        uri: &Uri,
        text: String,
    ) -> Result<DidChangeTextDocumentParams, SessionError> {
        let document = self.get_mut(uri)?;
        document.text = text;
        document.version += 1;

        let change = TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: document.text.clone(),
        };
        Ok(changed(uri, document.version, change))
    }

    /// Remember the current state of `uri` before changing it
    pub fn checkpoint(&self, uri: &Uri) -> Checkpoint {
        Checkpoint {
            uri: uri.clone(),
            document: self.documents.get(uri).cloned(),
        }
    }

    /// Put a document back the way it was at `checkpoint`
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        trace!("Rolling back {}", checkpoint.uri.as_str());
        match checkpoint.document {
            Some(document) => {
                self.documents.insert(checkpoint.uri, document);
            }
            None => {
                self.documents.remove(&checkpoint.uri);
            }
        }
    }

    pub fn text(&self, uri: &Uri) -> Option<&str> {
        self.documents.get(uri).map(|document| document.text.as_str())
    }

    pub fn version(&self, uri: &Uri) -> Option<i32> {
        self.documents.get(uri).map(|document| document.version)
    }

    pub fn language_id(&self, uri: &Uri) -> Option<&str> {
        self.documents
            .get(uri)
            .map(|document| document.language_id.as_str())
    }

    pub fn is_open(&self, uri: &Uri) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn get_mut(&mut self, uri: &Uri) -> Result<&mut OpenDocument, SessionError> {
        self.documents
            .get_mut(uri)
            .ok_or_else(|| SessionError::UnknownDocument(uri.as_str().to_string()))
    }
}

fn changed(uri: &Uri, version: i32, change: TextDocumentContentChangeEvent) -> DidChangeTextDocumentParams {
    DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier {
            uri: uri.clone(),
            version,
        },
        content_changes: vec![change],
    }
}

/// Byte offset of an LSP position (UTF-16 columns)
fn byte_offset(text: &str, position: Position, uri: &Uri) -> Result<usize, SessionError> {
    let out_of_range = || {
        SessionError::UnknownDocument(format!(
            "{}: position {}:{} is outside the document",
            uri.as_str(),
            position.line,
            position.character
        ))
    };

    let mut line_start = 0;
    for _ in 0..position.line {
        let newline = text[line_start..].find('\n').ok_or_else(out_of_range)?;
        line_start += newline + 1;
    }

    let line = &text[line_start..];
    let line = &line[..line.find('\n').unwrap_or(line.len())];

    let mut units = 0u32;
    for (index, ch) in line.char_indices() {
        if units >= position.character {
            return if units == position.character {
                Ok(line_start + index)
            } else {
                // Inside a surrogate pair
                Err(out_of_range())
            };
        }
        units += ch.len_utf16() as u32;
    }
    if units == position.character {
        Ok(line_start + line.len())
    } else {
        Err(out_of_range())
    }
}

/// Position just after `text` when inserted at `start`
fn advance(start: Position, text: &str) -> Position {
    match text.rfind('\n') {
        Some(last_newline) => Position::new(
            start.line + text.matches('\n').count() as u32,
            text[last_newline + 1..].encode_utf16().count() as u32,
        ),
        None => Position::new(
            start.line,
            start.character + text.encode_utf16().count() as u32,
        ),
    }
}
