//! One reconciliation pass: bring the index and registry in line with disk.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    doc_id::{self, Modality},
    embedding::{Embedder, embed_content},
    error::{Error, Result},
    extract::ContentExtractor,
    incremental::plan_sync,
    registry::{DocumentMetadata, DocumentRegistry},
    vector_index::VectorIndex,
    walker::{DiscoveredFile, FileFilter, discover_files},
};

/// Shared flag for interrupting a pass between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A document that was skipped because of a per-document error.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub repaired: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Index ranges dropped because no registered document owned them.
    pub orphans_removed: usize,
    /// Vectors dropped from updated, repaired and deleted documents.
    pub vectors_removed: usize,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether the pass changed the index or the registry.
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.repaired + self.deleted + self.orphans_removed
            > 0
    }
}

/// Vectors and ids ready to be inserted for one document.
struct Prepared {
    vectors: Vec<Vec<f32>>,
    text_count: usize,
    image_count: usize,
}

impl Prepared {
    fn ids(&self, doc: u64) -> Result<Vec<u64>> {
        let text = (0..self.text_count).map(|i| doc_id::pack(doc, Modality::Text, i));
        let images =
            (0..self.image_count).map(|i| doc_id::pack(doc, Modality::Image, i));
        text.chain(images).collect()
    }
}

/// Drives reconciliation passes over borrowed extractor and embedder.
pub struct Synchronizer<'a> {
    extractor: &'a dyn ContentExtractor,
    embedder: &'a dyn Embedder,
    cancel: Option<CancelFlag>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        extractor: &'a dyn ContentExtractor,
        embedder: &'a dyn Embedder,
    ) -> Self {
        Self {
            extractor,
            embedder,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Walk `root` and apply every New, Modified, Repair and Deleted
    /// transition to `index` and `registry`.
    ///
    /// Nothing is persisted here. Per-document failures are recorded in the
    /// report and leave that document as it was; any other error aborts the
    /// pass with the pair partially updated, so callers must discard it.
    pub fn reconcile(
        &self,
        root: &Path,
        filter: &FileFilter,
        index: &mut VectorIndex,
        registry: &mut DocumentRegistry,
    ) -> Result<SyncReport> {
        if let Some(dimension) = index.dimension()
            && dimension != self.embedder.dimension()
        {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: self.embedder.dimension(),
            });
        }

        let discovered = discover_files(root, filter)?;
        let plan = plan_sync(registry, index, &discovered);
        debug!(
            discovered = discovered.len(),
            new = plan.new_files.len(),
            modified = plan.modified.len(),
            repair = plan.repair.len(),
            deleted = plan.deleted_ids.len(),
            "planned reconciliation"
        );

        let mut report = SyncReport {
            unchanged: plan.unchanged,
            ..Default::default()
        };

        for doc in &plan.orphan_ids {
            let removed = index.remove_range(*doc);
            debug!(doc_id = doc, removed, "dropped orphaned vectors");
            report.orphans_removed += 1;
        }

        for file in &plan.new_files {
            self.check_cancelled()?;
            let outcome = self.index_new(file, index, registry);
            if self.isolate(file, outcome, &mut report)?.is_some() {
                report.added += 1;
            }
        }

        for (doc, file) in &plan.modified {
            self.check_cancelled()?;
            let outcome = self.reindex(*doc, file, index, registry);
            if let Some(removed) = self.isolate(file, outcome, &mut report)? {
                report.updated += 1;
                report.vectors_removed += removed;
            }
        }

        for (doc, file) in &plan.repair {
            self.check_cancelled()?;
            let outcome = self.reindex(*doc, file, index, registry);
            if let Some(removed) = self.isolate(file, outcome, &mut report)? {
                report.repaired += 1;
                report.vectors_removed += removed;
            }
        }

        // Deletions are applied only once the walk has been fully processed.
        for doc in &plan.deleted_ids {
            let removed = index.remove_range(*doc);
            if let Some(meta) = registry.remove(*doc) {
                debug!(doc_id = doc, path = %meta.path, removed, "removed document");
            }
            report.deleted += 1;
            report.vectors_removed += removed;
        }

        info!(
            added = report.added,
            updated = report.updated,
            repaired = report.repaired,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Log and record a document-local failure; propagate anything else.
    fn isolate<T>(
        &self,
        file: &DiscoveredFile,
        outcome: Result<T>,
        report: &mut SyncReport,
    ) -> Result<Option<T>> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_document_local() => {
                warn!(path = %file.absolute_path.display(), error = %e, "skipping document");
                report.failed.push(SyncFailure {
                    path: file.key(),
                    error: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn prepare(&self, file: &DiscoveredFile) -> Result<Prepared> {
        let content = self.extractor.extract(&file.absolute_path)?;
        if content.is_empty() {
            return Err(Error::EmptyExtraction {
                path: file.absolute_path.clone(),
            });
        }
        for (modality, count) in [
            (Modality::Text, content.segments.len()),
            (Modality::Image, content.images.len()),
        ] {
            if count as u64 > modality.capacity() {
                return Err(Error::CapacityExceeded {
                    modality,
                    index: count - 1,
                    capacity: modality.capacity(),
                });
            }
        }

        let embedded = embed_content(self.embedder, &content)?;
        let text_count = embedded.text.len();
        let image_count = embedded.images.len();
        let mut vectors = embedded.text;
        vectors.extend(embedded.images);
        Ok(Prepared {
            vectors,
            text_count,
            image_count,
        })
    }

    fn index_new(
        &self,
        file: &DiscoveredFile,
        index: &mut VectorIndex,
        registry: &mut DocumentRegistry,
    ) -> Result<()> {
        let prepared = self.prepare(file)?;
        let doc = registry.next_doc_id();
        let ids = prepared.ids(doc)?;
        index.insert(prepared.vectors, &ids)?;

        match registry.allocate(DocumentMetadata::from_discovered(file)) {
            Ok(allocated) => {
                debug_assert_eq!(allocated, doc);
                debug!(
                    doc_id = doc,
                    path = %file.absolute_path.display(),
                    text = prepared.text_count,
                    images = prepared.image_count,
                    "indexed new document"
                );
                Ok(())
            }
            Err(e) => {
                index.remove_range(doc);
                Err(e)
            }
        }
    }

    /// Replace a registered document's vectors under its existing id.
    ///
    /// The new content is extracted and embedded before anything is
    /// removed, so a failure leaves the previous vectors in place. Returns
    /// how many old vectors were dropped.
    fn reindex(
        &self,
        doc: u64,
        file: &DiscoveredFile,
        index: &mut VectorIndex,
        registry: &mut DocumentRegistry,
    ) -> Result<usize> {
        let prepared = self.prepare(file)?;
        let ids = prepared.ids(doc)?;
        let removed = index.remove_range(doc);
        index.insert(prepared.vectors, &ids)?;
        registry.update(doc, DocumentMetadata::from_discovered(file))?;
        debug!(
            doc_id = doc,
            path = %file.absolute_path.display(),
            removed,
            inserted = ids.len(),
            "re-indexed document"
        );
        Ok(removed)
    }
}
