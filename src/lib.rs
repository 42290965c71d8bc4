//! docsift - multi-modal indexing and retrieval for a directory of documents.
//!
//! docsift walks a directory of text, Markdown, PDF, DOCX and image files,
//! embeds every text segment and image into one shared vector space, and
//! answers text or image queries with the best matching documents. Each
//! document owns a contiguous block of vector ids (see [`doc_id`]), so
//! updating or deleting a document is a single range operation.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{Engine, Query};
//! use docsift::embedding::HashingEmbedder;
//! use docsift::walker::FileFilter;
//!
//! let embedder = HashingEmbedder::new(512).unwrap();
//! let engine = Engine::open("index.redb".as_ref(), Box::new(embedder)).unwrap();
//!
//! let report = engine.sync("notes".as_ref(), &FileFilter::default()).unwrap();
//! println!("{} added, {} updated", report.added, report.updated);
//!
//! let query = Query::Text("rust ownership".to_string());
//! for hit in engine.search_documents(&query, 10).unwrap() {
//!     println!("{}. {} (score: {:.3})", hit.rank, hit.path, hit.score);
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod incremental;
pub mod mcp;
#[cfg(feature = "clip")]
pub mod model_manager;
pub mod registry;
pub mod search;
pub mod segment;
pub mod sync;
pub mod vector_index;
pub mod walker;

pub use catalog::Catalog;
pub use config_db::{ConfigDb, Settings};
pub use data_dir::DataDir;
pub use doc_id::Modality;
pub use embedding::{Embedder, Query};
pub use engine::Engine;
pub use error::{Error, Result};
pub use registry::DocumentRegistry;
pub use sync::{SyncReport, Synchronizer};
pub use vector_index::VectorIndex;
