use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the indexed root directory.
    pub relative_path: PathBuf,
    /// The root joined with `relative_path`; symlinks are not resolved.
    pub absolute_path: PathBuf,
    /// Last modification time as nanoseconds since the Unix epoch.
    pub mtime: u64,
    /// Size in bytes.
    pub size: u64,
    /// Lowercase extension without the leading dot.
    pub extension: String,
}

impl DiscoveredFile {
    /// The registry key for this file.
    pub fn key(&self) -> String {
        self.absolute_path.to_string_lossy().into_owned()
    }
}

/// Extensions indexed when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] =
    &["txt", "md", "pdf", "docx", "png", "jpg", "jpeg"];

/// Which files a walk should pick up.
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: BTreeSet<String>,
    exclude: Option<GlobSet>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            exclude: None,
        }
    }
}

impl FileFilter {
    /// Build a filter from an extension whitelist and exclude globs.
    ///
    /// Extensions are matched case-insensitively and may be given with or
    /// without a leading dot. Globs match against root-relative paths.
    pub fn new<E, G>(extensions: E, exclude: G) -> Result<Self>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        G: IntoIterator,
        G::Item: AsRef<str>,
    {
        let extensions: BTreeSet<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let mut builder = GlobSetBuilder::new();
        let mut any = false;
        for pattern in exclude {
            let glob = Glob::new(pattern.as_ref()).map_err(|e| {
                Error::Config(format!("invalid exclude pattern: {e}"))
            })?;
            builder.add(glob);
            any = true;
        }
        let exclude = if any {
            Some(builder.build().map_err(|e| {
                Error::Config(format!("invalid exclude pattern: {e}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            extensions,
            exclude,
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    fn accepts_extension(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.extensions.contains(&ext).then_some(ext)
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|set| set.is_match(relative))
    }
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`), excluded
/// paths, and files whose extension is not whitelisted.
pub fn discover_files(
    root: &Path,
    filter: &FileFilter,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize().map_err(|_| Error::NotFound {
        kind: "directory",
        name: root.display().to_string(),
    })?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, filter, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &FileFilter,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path.as_path());
        if filter.is_excluded(relative) {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, filter, results)?;
        } else if file_type.is_symlink() {
            // Only file symlinks are followed; directory links could cycle.
            let Ok(resolved) = path.canonicalize() else {
                continue; // Skip broken symlinks
            };
            if resolved.is_file()
                && let Some(extension) = filter.accepts_extension(&path)
            {
                results.push(make_discovered(root, &path, &resolved, extension)?);
            }
        } else if file_type.is_file()
            && let Some(extension) = filter.accepts_extension(&path)
        {
            results.push(make_discovered(root, &path, &path, extension)?);
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    target: &Path,
    extension: String,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    let metadata = std::fs::metadata(target)?;
    let mtime = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .min(u128::from(u64::MAX)) as u64;

    Ok(DiscoveredFile {
        absolute_path: root.join(&relative_path),
        relative_path,
        mtime,
        size: metadata.len(),
        extension,
    })
}
