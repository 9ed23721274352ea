//! Path addressing for documents and collections.
//!
//! Paths are slash-joined segment lists, alternating collection and document
//! ids starting at a root collection: `chats/{chatId}`,
//! `chats/{chatId}/messages/{messageId}`, `userChats/{userId}/chats/{chatId}`.
//! A document path always has an even number of segments, a collection path
//! an odd number.

use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Parse a slash-joined path. Must have an even, non-zero number of
    /// non-empty segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(format!(
                "document path needs an even segment count: {raw}"
            )));
        }
        Ok(Self { segments })
    }

    /// The document id (final segment).
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// A sub-collection of this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        CollectionPath { segments }
    }

    /// The collection this document lives in.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Path of a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    /// A top-level collection.
    pub fn root(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Parse a slash-joined path. Must have an odd number of non-empty
    /// segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(format!(
                "collection path needs an odd segment count: {raw}"
            )));
        }
        Ok(Self { segments })
    }

    /// The document with the given id inside this collection.
    pub fn doc(&self, id: &str) -> DocPath {
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        DocPath { segments }
    }

    /// A fresh store-assigned document id.
    pub fn new_doc_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

fn split_segments(raw: &str) -> Result<Vec<String>> {
    if raw.is_empty() {
        return Err(StoreError::InvalidPath("empty path".to_string()));
    }
    let segments: Vec<String> = raw.split('/').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(StoreError::InvalidPath(format!("empty segment in {raw}")));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_path_round_trip() {
        let path = DocPath::parse("chats/abc/messages/m1").unwrap();
        assert_eq!(path.id(), "m1");
        assert_eq!(path.to_string(), "chats/abc/messages/m1");
        assert_eq!(path.parent().to_string(), "chats/abc/messages");
    }

    #[test]
    fn test_collection_doc_builder() {
        let chats = CollectionPath::root("chats");
        let doc = chats.doc("abc");
        assert_eq!(doc.to_string(), "chats/abc");
        assert_eq!(doc.collection("messages").to_string(), "chats/abc/messages");
    }

    #[test]
    fn test_rejects_odd_document_path() {
        assert!(DocPath::parse("chats").is_err());
        assert!(CollectionPath::parse("chats/abc").is_err());
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(DocPath::parse("chats//messages/m1").is_err());
        assert!(DocPath::parse("").is_err());
    }

    #[test]
    fn test_new_doc_ids_are_unique() {
        assert_ne!(
            CollectionPath::new_doc_id(),
            CollectionPath::new_doc_id()
        );
    }
}
