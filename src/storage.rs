//! Animation definitions on disk.
//!
//! Each definition is a `<id>.json` file holding `{ "id", "title", "code" }`.
//! This module only reads them; creating and editing definitions belongs to
//! whatever manages the directory. Every id is validated before it touches
//! the filesystem, so an id can never name a path outside the directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted id, in characters.
pub const MAX_ID_LEN: usize = 100;
/// Longest accepted title, in characters.
pub const MAX_TITLE_LEN: usize = 200;
/// Largest accepted code size, in bytes.
pub const MAX_CODE_LEN: usize = 50_000;

/// A stored animation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationDefinition {
    /// Unique id, also the file stem.
    pub id: String,
    /// Display name.
    pub title: String,
    /// Lua source evaluating to `function(frame, t)`.
    pub code: String,
}

/// Listing entry without the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationSummary {
    /// Unique id.
    pub id: String,
    /// Display name.
    pub title: String,
}

impl AnimationDefinition {
    /// Check all fields against the storage limits.
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        validate_title(&self.title)?;
        validate_code(&self.code)
    }

    /// Listing entry for this definition.
    #[must_use]
    pub fn summary(&self) -> AnimationSummary {
        AnimationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

/// Ids are 1 to 100 characters of `A-Z a-z 0-9 _ -`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Validation("animation id is missing".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!(
            "animation id {id:?} may only contain letters, digits, '-' and '_'"
        )));
    }
    if id.len() > MAX_ID_LEN {
        return Err(Error::Validation(format!(
            "animation id is too long (max {MAX_ID_LEN} characters)"
        )));
    }
    Ok(())
}

/// Titles are non-blank and at most 200 characters.
pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::Validation(format!(
            "title is too long (max {MAX_TITLE_LEN} characters)"
        )));
    }
    Ok(())
}

/// Code is non-empty and at most 50 000 bytes.
pub fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(Error::Validation("code is required".into()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(Error::Validation(format!(
            "code is too long ({} bytes, max {MAX_CODE_LEN})",
            code.len()
        )));
    }
    Ok(())
}

/// Read access to animation definitions.
pub trait AnimationStore: std::fmt::Debug + Send + Sync {
    /// All definitions, id and title only, sorted by title.
    fn list(&self) -> Result<Vec<AnimationSummary>>;

    /// One definition including its code.
    fn get(&self, id: &str) -> Result<AnimationDefinition>;
}

/// Store backed by a directory of `<id>.json` files.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Store reading from `dir`. The directory need not exist yet.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this store reads from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(path: &Path) -> Result<AnimationDefinition> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("cannot read {}: {e}", path.display())))?;
        let definition: AnimationDefinition = serde_json::from_str(&content)
            .map_err(|e| Error::Validation(format!("malformed {}: {e}", path.display())))?;
        definition.validate()?;
        Ok(definition)
    }
}

impl AnimationStore for DirectoryStore {
    fn list(&self) -> Result<Vec<AnimationSummary>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Validation(format!(
                    "cannot list {}: {e}",
                    self.dir.display()
                )))
            }
        };

        let mut summaries: Vec<AnimationSummary> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| match Self::read(&path) {
                Ok(definition) => Some(definition.summary()),
                Err(e) => {
                    log::warn!("[storage] Skipping {}: {e}", path.display());
                    None
                }
            })
            .collect();

        summaries.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(summaries)
    }

    fn get(&self, id: &str) -> Result<AnimationDefinition> {
        validate_id(id)?;
        let path = self.dir.join(format!("{id}.json"));
        if !path.exists() {
            return Err(Error::Validation(format!("animation {id} not found")));
        }
        Self::read(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, id: &str, title: &str, code: &str) {
        let definition = AnimationDefinition {
            id: id.into(),
            title: title.into(),
            code: code.into(),
        };
        std::fs::write(
            dir.join(format!("{id}.json")),
            serde_json::to_string_pretty(&definition).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("rainbow_2-fast").is_ok());
        assert!(validate_id(&"a".repeat(100)).is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id(&"a".repeat(101)).is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("with space").is_err());
        assert!(validate_id("ümlaut").is_err());
    }

    #[test]
    fn test_validate_title_and_code() {
        assert!(validate_title("Rainbow").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"t".repeat(201)).is_err());
        assert!(validate_code("return function() end").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code(&"x".repeat(50_001)).is_err());
    }

    #[test]
    fn test_list_sorted_by_title_without_code() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b", "beta", "return function() end");
        write(dir.path(), "a", "Alpha", "return function() end");
        write(dir.path(), "c", "gamma", "return function() end");
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let store = DirectoryStore::new(dir.path());
        let titles: Vec<String> = store.list().unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("missing"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_get_returns_code() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "wave", "Wave", "return function(f, t) end");
        let store = DirectoryStore::new(dir.path());
        let definition = store.get("wave").expect("Should find animation");
        assert_eq!(definition.code, "return function(f, t) end");
    }

    #[test]
    fn test_get_rejects_bad_and_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        assert!(matches!(store.get("../x"), Err(Error::Validation(_))));
        assert!(matches!(store.get("missing"), Err(Error::Validation(_))));
    }
}
