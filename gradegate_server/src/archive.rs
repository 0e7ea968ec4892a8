use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Read contract over submitted archives: list a student's entry names and
/// decode one entry as text. How archives arrive and get unpacked is someone
/// else's job.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Entry names of the student's submission, in a stable order.
    /// Missing archive means `NotFound`.
    async fn entries(&self, student_id: &str) -> AppResult<Vec<String>>;
    async fn read_entry(&self, student_id: &str, name: &str) -> AppResult<String>;
}

/// Unpacked-submission layout on disk: `{root}/{student_id}/{entry}`.
pub struct DirArchiveStore {
    root: PathBuf,
}

impl DirArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn student_dir(&self, student_id: &str) -> AppResult<PathBuf> {
        // submission ids come from clients, keep them path-safe
        if student_id.is_empty()
            || !student_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::validation(format!(
                "invalid student id '{student_id}'"
            )));
        }
        Ok(self.root.join(student_id))
    }
}

#[async_trait]
impl ArchiveStore for DirArchiveStore {
    async fn entries(&self, student_id: &str) -> AppResult<Vec<String>> {
        let dir = self.student_dir(student_id)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| AppError::not_found(format!("submission for {student_id}")))?;
        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?
        {
            if entry
                .file_type()
                .await
                .map_err(|e| AppError::Persistence(e.to_string()))?
                .is_file()
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_entry(&self, student_id: &str, name: &str) -> AppResult<String> {
        if name.contains('/') || name.contains("..") {
            return Err(AppError::validation(format!("invalid entry name '{name}'")));
        }
        let path = self.student_dir(student_id)?.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| AppError::not_found(format!("entry {name} for {student_id}")))
    }
}

/// In-process archive fixture for tests.
#[derive(Default)]
pub struct MemoryArchiveStore {
    files: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryArchiveStore {
    /// Registers a student with an archive that holds no entries.
    pub async fn create_empty(&self, student_id: &str) {
        self.files
            .write()
            .await
            .entry(student_id.to_string())
            .or_default();
    }

    pub async fn put(&self, student_id: &str, name: &str, content: &str) {
        self.files
            .write()
            .await
            .entry(student_id.to_string())
            .or_default()
            .insert(name.to_string(), content.to_string());
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn entries(&self, student_id: &str) -> AppResult<Vec<String>> {
        self.files
            .read()
            .await
            .get(student_id)
            .map(|entries| entries.keys().cloned().collect())
            .ok_or_else(|| AppError::not_found(format!("submission for {student_id}")))
    }

    async fn read_entry(&self, student_id: &str, name: &str) -> AppResult<String> {
        self.files
            .read()
            .await
            .get(student_id)
            .and_then(|entries| entries.get(name))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("entry {name} for {student_id}")))
    }
}
