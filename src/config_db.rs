use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    embedding::{DEFAULT_HASH_DIMENSION, EmbedderKind},
    error::{Error, Result},
    extract::{ContentExtractor, FileExtractor},
    search::{DEFAULT_BALANCE_FACTOR, DEFAULT_OVER_FETCH, SearchOptions},
    walker::{DEFAULT_EXTENSIONS, FileFilter},
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const ROOT_KEY: &str = "root";
pub const EXTENSIONS_KEY: &str = "extensions";
pub const EXCLUDE_KEY: &str = "exclude";
pub const OVER_FETCH_KEY: &str = "over_fetch";
pub const BALANCE_FACTOR_KEY: &str = "balance_factor";
pub const EMBEDDER_KEY: &str = "embedder";
pub const DIMENSION_KEY: &str = "dimension";

/// Every key `config set` accepts.
pub const KNOWN_KEYS: &[&str] = &[
    ROOT_KEY,
    EXTENSIONS_KEY,
    EXCLUDE_KEY,
    OVER_FETCH_KEY,
    BALANCE_FACTOR_KEY,
    EMBEDDER_KEY,
    DIMENSION_KEY,
];

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

/// Typed view of the settings table, with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory to index; `None` until `init` has run.
    pub root: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub over_fetch: usize,
    pub balance_factor: f32,
    pub embedder: EmbedderKind,
    /// Output dimension of the hash embedder.
    pub dimension: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
            over_fetch: DEFAULT_OVER_FETCH,
            balance_factor: DEFAULT_BALANCE_FACTOR,
            embedder: EmbedderKind::default(),
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got '{raw}'")))
}

impl Settings {
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in db.list_settings()? {
            settings.apply(&key, &value)?;
        }
        Ok(settings)
    }

    /// Parse and apply one raw key/value pair.
    ///
    /// Used both when loading and to validate `config set` input before
    /// it is stored.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            ROOT_KEY => self.root = Some(PathBuf::from(value)),
            EXTENSIONS_KEY => {
                let list = split_list(value);
                if list.is_empty() {
                    return Err(Error::Config(
                        "extensions must list at least one extension".into(),
                    ));
                }
                let extractor = FileExtractor::default();
                if let Some(bad) = list.iter().find(|ext| {
                    !extractor.supports(&ext.trim_start_matches('.').to_ascii_lowercase())
                }) {
                    return Err(Error::Config(format!(
                        "no extractor handles extension '{bad}'"
                    )));
                }
                self.extensions = list;
            }
            EXCLUDE_KEY => self.exclude = split_list(value),
            OVER_FETCH_KEY => {
                let n: usize = parse_number(key, value)?;
                if n == 0 {
                    return Err(Error::Config("over_fetch must be at least 1".into()));
                }
                self.over_fetch = n;
            }
            BALANCE_FACTOR_KEY => {
                let f: f32 = parse_number(key, value)?;
                if !f.is_finite() || f <= 0.0 {
                    return Err(Error::Config(
                        "balance_factor must be a positive number".into(),
                    ));
                }
                self.balance_factor = f;
            }
            EMBEDDER_KEY => self.embedder = value.parse()?,
            DIMENSION_KEY => {
                let d: usize = parse_number(key, value)?;
                if d == 0 {
                    return Err(Error::Config("dimension must be at least 1".into()));
                }
                self.dimension = d;
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (known: {})",
                    KNOWN_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// The configured root, or an error telling the user to run `init`.
    pub fn require_root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or_else(|| {
            Error::Config("no root directory configured; run `docsift init <dir>`".into())
        })
    }

    pub fn filter(&self) -> Result<FileFilter> {
        FileFilter::new(&self.extensions, &self.exclude)
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            over_fetch: self.over_fetch,
            balance_factor: self.balance_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("embedder").unwrap(), None);

        db.set_setting("embedder", "clip").unwrap();
        assert_eq!(db.get_setting("embedder").unwrap(), Some("clip".to_string()));
        assert_eq!(db.list_settings().unwrap().len(), 1);

        assert!(db.remove_setting("embedder").unwrap());
        assert!(!db.remove_setting("embedder").unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting(ROOT_KEY, "/srv/docs").unwrap();
        }

        let db = ConfigDb::open(&path).unwrap();
        assert_eq!(db.get_setting(ROOT_KEY).unwrap(), Some("/srv/docs".to_string()));
    }

    #[test]
    fn defaults_when_nothing_is_stored() {
        let (_tmp, db) = test_db();
        let settings = Settings::load(&db).unwrap();

        assert_eq!(settings, Settings::default());
        assert!(settings.require_root().is_err());
        assert_eq!(settings.search_options(), SearchOptions::default());
    }

    #[test]
    fn stored_values_are_parsed() {
        let (_tmp, db) = test_db();
        db.set_setting(ROOT_KEY, "/srv/docs").unwrap();
        db.set_setting(EXTENSIONS_KEY, "txt, .MD ,").unwrap();
        db.set_setting(EXCLUDE_KEY, "drafts/**,*.tmp.txt").unwrap();
        db.set_setting(OVER_FETCH_KEY, "20").unwrap();
        db.set_setting(BALANCE_FACTOR_KEY, "2.5").unwrap();
        db.set_setting(DIMENSION_KEY, "64").unwrap();

        let settings = Settings::load(&db).unwrap();
        assert_eq!(settings.require_root().unwrap(), Path::new("/srv/docs"));
        assert_eq!(settings.extensions, vec!["txt", ".MD"]);
        assert_eq!(settings.exclude, vec!["drafts/**", "*.tmp.txt"]);
        assert_eq!(settings.over_fetch, 20);
        assert!((settings.balance_factor - 2.5).abs() < f32::EPSILON);
        assert_eq!(settings.dimension, 64);

        let filter = settings.filter().unwrap();
        assert_eq!(filter.extensions().collect::<Vec<_>>(), vec!["md", "txt"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = Settings::default();
        assert!(settings.apply(OVER_FETCH_KEY, "zero").is_err());
        assert!(settings.apply(OVER_FETCH_KEY, "0").is_err());
        assert!(settings.apply(BALANCE_FACTOR_KEY, "-1").is_err());
        assert!(settings.apply(EMBEDDER_KEY, "bert").is_err());
        assert!(settings.apply(EXTENSIONS_KEY, " , ").is_err());
        assert!(settings.apply(EXTENSIONS_KEY, "txt,csv").is_err());
        assert!(settings.apply("colour", "blue").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn removed_setting_falls_back_to_default() {
        let (_tmp, db) = test_db();
        db.set_setting(OVER_FETCH_KEY, "40").unwrap();
        assert_eq!(Settings::load(&db).unwrap().over_fetch, 40);

        assert!(db.remove_setting(OVER_FETCH_KEY).unwrap());
        assert_eq!(Settings::load(&db).unwrap().over_fetch, DEFAULT_OVER_FETCH);
    }

    #[test]
    fn extensions_must_have_an_extractor() {
        let mut settings = Settings::default();
        let err = settings.apply(EXTENSIONS_KEY, "md,.XLSX").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(".XLSX")));

        settings.apply(EXTENSIONS_KEY, "PDF,.docx,jpeg").unwrap();
        assert_eq!(settings.extensions, vec!["PDF", ".docx", "jpeg"]);
    }

    #[test]
    fn corrupt_stored_value_fails_load() {
        let (_tmp, db) = test_db();
        db.set_setting(DIMENSION_KEY, "wide").unwrap();
        assert!(matches!(Settings::load(&db), Err(Error::Config(_))));
    }
}
