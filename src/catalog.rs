use std::path::Path;

use redb::{
    Database,
    DatabaseError,
    ReadableDatabase,
    StorageError,
    TableDefinition,
};

use crate::{
    error::{Error, Result},
    registry::{DocumentRegistry, RegistrySnapshot},
    vector_index::{INDEX_META, VECTORS, VectorIndex},
};

const CATALOG: TableDefinition<&str, &str> = TableDefinition::new("catalog");

const REGISTRY_KEY: &str = "registry";

/// On-disk home of the vector index and the document registry.
///
/// Both live in one redb file so that a single write transaction covers
/// them: after a crash the file holds either the previous pair or the new
/// one, never a mix.
pub struct Catalog {
    db: Database,
}

impl Catalog {
    /// Open the catalog at `path`, creating an empty one if absent.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docsift::Catalog;
    ///
    /// let catalog = Catalog::open(&tmp.path().join("index.redb")).unwrap();
    /// let (index, registry) = catalog.load().unwrap();
    /// assert!(index.is_empty());
    /// assert!(registry.is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::Storage(StorageError::Corrupted(msg)) => {
                Error::Corrupt(msg)
            }
            other => other.into(),
        })?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(INDEX_META)?;
        txn.open_table(CATALOG)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Read the persisted index and registry.
    ///
    /// A catalog that was never persisted yields an empty pair.
    pub fn load(&self) -> Result<(VectorIndex, DocumentRegistry)> {
        let txn = self.db.begin_read()?;
        let index = VectorIndex::load_from(&txn)?;

        let table = txn.open_table(CATALOG)?;
        let registry = match table.get(REGISTRY_KEY)? {
            Some(raw) => {
                let snapshot: RegistrySnapshot =
                    serde_json::from_str(raw.value()).map_err(|e| {
                        Error::Corrupt(format!("registry snapshot: {e}"))
                    })?;
                DocumentRegistry::restore(snapshot)?
            }
            None => DocumentRegistry::new(),
        };

        for doc in index.doc_ids() {
            if !registry.contains(doc) && doc >= registry.next_doc_id() {
                return Err(Error::Corrupt(format!(
                    "vectors stored for document {doc} which was never allocated"
                )));
            }
        }

        tracing::debug!(
            vectors = index.len(),
            documents = registry.len(),
            "loaded catalog"
        );
        Ok((index, registry))
    }

    /// Write the index and the registry in one transaction.
    ///
    /// The index is written first, then the registry snapshot. On success
    /// the index's change tracking is reset.
    pub fn persist(
        &self,
        index: &mut VectorIndex,
        registry: &DocumentRegistry,
    ) -> Result<()> {
        let json = serde_json::to_string(&registry.snapshot())?;

        let txn = self.db.begin_write()?;
        index.persist_into(&txn)?;
        {
            let mut table = txn.open_table(CATALOG)?;
            table.insert(REGISTRY_KEY, json.as_str())?;
        }
        txn.commit()?;
        index.mark_clean();

        tracing::debug!(
            vectors = index.len(),
            documents = registry.len(),
            "persisted catalog"
        );
        Ok(())
    }
}
