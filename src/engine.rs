use std::{
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    catalog::Catalog,
    config_db::Settings,
    data_dir::DataDir,
    embedding::{Embedder, Query, build_embedder, embed_query},
    error::{Error, Result},
    extract::{ContentExtractor, FileExtractor},
    registry::DocumentRegistry,
    search::{ScoredDocument, SearchOptions, retrieve},
    sync::{CancelFlag, SyncReport, Synchronizer},
    vector_index::VectorIndex,
    walker::FileFilter,
};

/// The index and registry, always read and written together.
struct IndexState {
    index: VectorIndex,
    registry: DocumentRegistry,
}

/// A ranked search result with its document's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub doc_id: u64,
    pub score: f32,
    pub filename: String,
    pub path: String,
    pub extension: String,
}

/// A registered document and how many vectors it owns.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub doc_id: u64,
    pub filename: String,
    pub path: String,
    pub extension: String,
    pub size: u64,
    pub last_modified: u64,
    pub vectors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub next_doc_id: u64,
    pub embedder: String,
}

/// Shared handle over a catalog for concurrent searches and exclusive
/// reconciliation passes.
///
/// Searches take a shared lock over the index/registry pair; a sync pass
/// takes the exclusive lock for the whole pass including the final
/// persist, so readers never see the two halves from different points in
/// time.
pub struct Engine {
    catalog: Catalog,
    state: RwLock<IndexState>,
    extractor: Box<dyn ContentExtractor>,
    embedder: Box<dyn Embedder>,
    options: SearchOptions,
    cancel: CancelFlag,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("embedder", &self.embedder.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> Error {
    Error::Config("index lock poisoned by a panicked thread".into())
}

impl Engine {
    /// Open (or create) the catalog at `path` and load it into memory.
    pub fn open(path: &Path, embedder: Box<dyn Embedder>) -> Result<Self> {
        let catalog = Catalog::open(path)?;
        let (index, registry) = catalog.load()?;
        info!(
            documents = registry.len(),
            vectors = index.len(),
            embedder = embedder.name(),
            "opened index"
        );
        Ok(Self {
            catalog,
            state: RwLock::new(IndexState { index, registry }),
            extractor: Box::new(FileExtractor::default()),
            embedder,
            options: SearchOptions::default(),
            cancel: CancelFlag::new(),
        })
    }

    /// Open the index stored in `data_dir` with the embedder `settings` name.
    pub fn from_settings(data_dir: &DataDir, settings: &Settings) -> Result<Self> {
        let embedder = build_embedder(settings.embedder, settings.dimension)?;
        Ok(Self::open(&data_dir.index_db(), embedder)?
            .with_search_options(settings.search_options()))
    }

    pub fn with_search_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle that interrupts the running (or next) sync pass.
    ///
    /// The flag is cleared when that pass returns, whether or not it had a
    /// document boundary to stop at.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state.write().map_err(|_| poisoned())
    }

    /// Run one reconciliation pass over `root` and persist the result.
    ///
    /// If the pass fails or is cancelled, the in-memory state is reset to
    /// the last persisted catalog before the error is returned.
    pub fn sync(&self, root: &Path, filter: &FileFilter) -> Result<SyncReport> {
        let mut guard = self.write()?;
        let IndexState { index, registry } = &mut *guard;

        let synchronizer =
            Synchronizer::new(self.extractor.as_ref(), self.embedder.as_ref())
                .with_cancel(self.cancel.clone());
        let outcome = synchronizer
            .reconcile(root, filter, index, registry)
            .and_then(|report| {
                if report.changed() {
                    self.catalog.persist(index, registry)?;
                }
                Ok(report)
            });

        self.cancel.reset();

        match outcome {
            Ok(report) => Ok(report),
            Err(e) => {
                if matches!(e, Error::Cancelled) {
                    info!("sync cancelled; restoring last persisted index");
                } else {
                    warn!(error = %e, "sync failed; restoring last persisted index");
                }
                let (loaded_index, loaded_registry) = self.catalog.load()?;
                *index = loaded_index;
                *registry = loaded_registry;
                Err(e)
            }
        }
    }

    /// Retrieve up to `k` documents as unordered `(doc_id, score)` pairs.
    pub fn search(&self, query: &Query, k: usize) -> Result<Vec<ScoredDocument>> {
        let vector = embed_query(self.embedder.as_ref(), query)?;
        let state = self.read()?;
        retrieve(&state.index, &vector, query.modality(), k, &self.options)
    }

    /// Like [`search`](Self::search), but ranked by score and joined with
    /// registry metadata.
    pub fn search_documents(&self, query: &Query, k: usize) -> Result<Vec<SearchHit>> {
        let vector = embed_query(self.embedder.as_ref(), query)?;
        let state = self.read()?;
        let mut docs =
            retrieve(&state.index, &vector, query.modality(), k, &self.options)?;
        docs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });

        let hits = docs
            .into_iter()
            .filter_map(|doc| {
                state.registry.get(doc.doc_id).map(|meta| (doc, meta))
            })
            .enumerate()
            .map(|(i, (doc, meta))| SearchHit {
                rank: i + 1,
                doc_id: doc.doc_id,
                score: doc.score,
                filename: meta.filename.clone(),
                path: meta.path.clone(),
                extension: meta.extension.clone(),
            })
            .collect::<Vec<_>>();

        if hits.is_empty() {
            return Err(Error::EmptyResult);
        }
        Ok(hits)
    }

    /// Remove one document by path and persist immediately.
    pub fn forget(&self, path: &str) -> Result<DocumentInfo> {
        let mut guard = self.write()?;
        let IndexState { index, registry } = &mut *guard;

        let canonical = Path::new(path)
            .canonicalize()
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        let doc_id = registry
            .lookup_by_path(path)
            .or_else(|| canonical.as_deref().and_then(|c| registry.lookup_by_path(c)))
            .map(|(id, _)| id)
            .ok_or_else(|| Error::NotFound {
                kind: "document",
                name: path.to_string(),
            })?;

        let vectors = index.remove_range(doc_id);
        let meta = registry.remove(doc_id).ok_or_else(|| Error::NotFound {
            kind: "document",
            name: path.to_string(),
        })?;

        if let Err(e) = self.catalog.persist(index, registry) {
            let (loaded_index, loaded_registry) = self.catalog.load()?;
            *index = loaded_index;
            *registry = loaded_registry;
            return Err(e);
        }
        info!(doc_id, path = %meta.path, vectors, "forgot document");

        Ok(DocumentInfo {
            doc_id,
            filename: meta.filename,
            path: meta.path,
            extension: meta.extension,
            size: meta.size,
            last_modified: meta.last_modified,
            vectors,
        })
    }

    /// Every registered document, in doc_id order.
    pub fn documents(&self) -> Result<Vec<DocumentInfo>> {
        let state = self.read()?;
        Ok(state
            .registry
            .iter()
            .map(|(doc_id, meta)| DocumentInfo {
                doc_id,
                filename: meta.filename.clone(),
                path: meta.path.clone(),
                extension: meta.extension.clone(),
                size: meta.size,
                last_modified: meta.last_modified,
                vectors: state.index.count_range(doc_id),
            })
            .collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let state = self.read()?;
        Ok(IndexStats {
            documents: state.registry.len(),
            vectors: state.index.len(),
            dimension: state.index.dimension(),
            next_doc_id: state.registry.next_doc_id(),
            embedder: self.embedder.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{embedding::HashingEmbedder, extract::ImageData};

    fn engine(dir: &Path) -> Engine {
        Engine::open(
            &dir.join("index.redb"),
            Box::new(HashingEmbedder::new(512).unwrap()),
        )
        .unwrap()
    }

    fn corpus() -> tempfile::TempDir {
        let docs = tempfile::tempdir().unwrap();
        std::fs::write(
            docs.path().join("rust.txt"),
            "Rust has ownership and borrowing. The borrow checker enforces it.",
        )
        .unwrap();
        std::fs::write(
            docs.path().join("bread.txt"),
            "Sourdough bread needs a starter. Bake it hot.",
        )
        .unwrap();
        std::fs::write(docs.path().join("logo.png"), [7u8, 7, 7, 7]).unwrap();
        docs
    }

    #[test]
    fn search_ranks_matching_document_first() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        let engine = engine(data.path());

        let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
        assert_eq!(report.added, 3);

        let hits = engine
            .search_documents(&Query::Text("ownership borrowing".into()), 2)
            .unwrap();
        assert_eq!(hits[0].filename, "rust.txt");
        assert_eq!(hits[0].rank, 1);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn image_query_finds_identical_image() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        let engine = engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();

        let query = Query::Image(ImageData {
            bytes: vec![7, 7, 7, 7],
            source: "query".into(),
        });
        let hits = engine.search_documents(&query, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "logo.png");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_engine_search_is_empty_result() {
        let data = tempfile::tempdir().unwrap();
        let engine = engine(data.path());
        assert!(matches!(
            engine.search(&Query::Text("anything".into()), 3),
            Err(Error::EmptyResult)
        ));
    }

    #[test]
    fn forget_removes_document_and_persists() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        {
            let engine = engine(data.path());
            engine.sync(docs.path(), &FileFilter::default()).unwrap();

            let path = docs.path().join("bread.txt");
            let info = engine.forget(&path.to_string_lossy()).unwrap();
            assert_eq!(info.filename, "bread.txt");
            assert_eq!(info.vectors, 2);
            assert!(matches!(
                engine.forget(&path.to_string_lossy()),
                Err(Error::NotFound { .. })
            ));
        }

        let engine = engine(data.path());
        let names: Vec<String> = engine
            .documents()
            .unwrap()
            .into_iter()
            .map(|d| d.filename)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"bread.txt".to_string()));
    }

    #[test]
    fn cancelled_sync_keeps_last_persisted_state() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        let engine = engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();
        let before = engine.stats().unwrap();

        std::fs::write(docs.path().join("new.txt"), "Fresh words.").unwrap();
        engine.cancel_handle().cancel();
        assert!(matches!(
            engine.sync(docs.path(), &FileFilter::default()),
            Err(Error::Cancelled)
        ));
        let after = engine.stats().unwrap();
        assert_eq!(after.documents, before.documents);
        assert_eq!(after.vectors, before.vectors);

        // The flag is cleared, so the next pass goes through.
        let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
        assert_eq!(report.added, 1);
    }

    #[test]
    fn failed_pass_reports_its_own_error_and_keeps_state() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        engine(data.path())
            .sync(docs.path(), &FileFilter::default())
            .unwrap();

        let narrow = Engine::open(
            &data.path().join("index.redb"),
            Box::new(HashingEmbedder::new(64).unwrap()),
        )
        .unwrap();
        let before = narrow.stats().unwrap();
        assert!(matches!(
            narrow.sync(docs.path(), &FileFilter::default()),
            Err(Error::DimensionMismatch {
                expected: 512,
                actual: 64
            })
        ));
        let after = narrow.stats().unwrap();
        assert_eq!(after.documents, before.documents);
        assert_eq!(after.vectors, before.vectors);
    }

    #[test]
    fn cancel_during_idle_pass_does_not_leak_into_next_pass() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        let engine = engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();

        // Nothing changed, so this pass never reaches a document boundary.
        engine.cancel_handle().cancel();
        let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
        assert!(!report.changed());

        std::fs::write(docs.path().join("late.txt"), "Arrived later.").unwrap();
        let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
        assert_eq!(report.added, 1);
    }

    #[test]
    fn stats_and_documents_report_vector_counts() {
        let data = tempfile::tempdir().unwrap();
        let docs = corpus();
        let engine = engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.vectors, 5);
        assert_eq!(stats.dimension, Some(512));
        assert_eq!(stats.embedder, "hash");

        let total: usize = engine.documents().unwrap().iter().map(|d| d.vectors).sum();
        assert_eq!(total, stats.vectors);
    }
}
