//! The document registry: path <-> doc_id bookkeeping.
//!
//! The registry is a plain value owned by whoever drives reconciliation.
//! Both maps are kept in lockstep by every mutating method, and the
//! doc_id counter only moves forward.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::MAX_DOC_ID,
    error::{Error, Result},
    walker::DiscoveredFile,
};

/// Filesystem metadata tracked for every registered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub filename: String,
    /// Registry key: the document's path as discovered under the root.
    pub path: String,
    /// Lowercase extension without the leading dot.
    pub extension: String,
    /// Modification time in nanoseconds since the Unix epoch.
    pub last_modified: u64,
    pub size: u64,
}

impl DocumentMetadata {
    pub fn from_discovered(file: &DiscoveredFile) -> Self {
        let filename = file
            .absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            path: file.key(),
            extension: file.extension.clone(),
            last_modified: file.mtime,
            size: file.size,
        }
    }
}

/// Serialized form of the registry: `(next_doc_id, id -> metadata, path -> id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub next_doc_id: u64,
    pub documents: BTreeMap<u64, DocumentMetadata>,
    pub paths: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRegistry {
    next_doc_id: u64,
    by_id: BTreeMap<u64, DocumentMetadata>,
    by_path: BTreeMap<String, u64>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// The id the next call to [`allocate`](Self::allocate) will hand out.
    pub fn next_doc_id(&self) -> u64 {
        self.next_doc_id
    }

    pub fn get(&self, doc_id: u64) -> Option<&DocumentMetadata> {
        self.by_id.get(&doc_id)
    }

    pub fn lookup_by_path(&self, path: &str) -> Option<(u64, &DocumentMetadata)> {
        let doc_id = *self.by_path.get(path)?;
        self.by_id.get(&doc_id).map(|meta| (doc_id, meta))
    }

    pub fn contains(&self, doc_id: u64) -> bool {
        self.by_id.contains_key(&doc_id)
    }

    /// Iterate over registered documents in doc_id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &DocumentMetadata)> {
        self.by_id.iter().map(|(id, meta)| (*id, meta))
    }

    /// Register a new path and return its freshly assigned doc_id.
    ///
    /// Ids are never reused, even after the document is removed.
    pub fn allocate(&mut self, metadata: DocumentMetadata) -> Result<u64> {
        if self.by_path.contains_key(&metadata.path) {
            return Err(Error::AlreadyRegistered(metadata.path));
        }
        let doc_id = self.next_doc_id;
        if doc_id > MAX_DOC_ID {
            return Err(Error::IdSpaceExhausted);
        }
        self.next_doc_id += 1;
        self.by_path.insert(metadata.path.clone(), doc_id);
        self.by_id.insert(doc_id, metadata);
        Ok(doc_id)
    }

    /// Replace a document's metadata in place. The path must not change.
    pub fn update(
        &mut self,
        doc_id: u64,
        metadata: DocumentMetadata,
    ) -> Result<()> {
        let current = self.by_id.get_mut(&doc_id).ok_or_else(|| {
            Error::NotFound {
                kind: "document",
                name: doc_id.to_string(),
            }
        })?;
        if current.path != metadata.path {
            return Err(Error::Config(format!(
                "document {doc_id} cannot move from {} to {}",
                current.path, metadata.path
            )));
        }
        *current = metadata;
        Ok(())
    }

    /// Remove a document from both maps, returning its last metadata.
    pub fn remove(&mut self, doc_id: u64) -> Option<DocumentMetadata> {
        let meta = self.by_id.remove(&doc_id)?;
        self.by_path.remove(&meta.path);
        Some(meta)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            next_doc_id: self.next_doc_id,
            documents: self.by_id.clone(),
            paths: self.by_path.clone(),
        }
    }

    /// Rebuild a registry from a snapshot, rejecting snapshots whose maps
    /// disagree with each other or with the counter.
    pub fn restore(snapshot: RegistrySnapshot) -> Result<Self> {
        let RegistrySnapshot {
            next_doc_id,
            documents,
            paths,
        } = snapshot;

        if documents.len() != paths.len() {
            return Err(Error::Corrupt(format!(
                "registry has {} documents but {} paths",
                documents.len(),
                paths.len()
            )));
        }
        for (path, doc_id) in &paths {
            match documents.get(doc_id) {
                Some(meta) if meta.path == *path => {}
                _ => {
                    return Err(Error::Corrupt(format!(
                        "registry path {path} points at unknown document {doc_id}"
                    )));
                }
            }
        }
        if let Some(&max_id) = documents.keys().next_back()
            && max_id >= next_doc_id
        {
            return Err(Error::Corrupt(format!(
                "registry counter {next_doc_id} is not past document {max_id}"
            )));
        }

        Ok(Self {
            next_doc_id,
            by_id: documents,
            by_path: paths,
        })
    }
}
