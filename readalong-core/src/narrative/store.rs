//! Persistent narrative store interface.
//!
//! The context provider is a session view over one of these stores: it
//! hydrates from the store on session start and writes element updates
//! through. Two implementations ship with the crate: an in-memory store for
//! tests and single-run sessions, and a JSON file store keeping one document
//! per book.

use super::element::{ElementId, NarrativeElement};
use crate::book::BookId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

/// Errors from narrative store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// External long-term store of narrative elements, keyed by book.
#[async_trait]
pub trait NarrativeStore: Send + Sync {
    /// Record a newly discovered element.
    async fn register_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError>;

    /// Replace the stored state of an existing element.
    async fn update_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError>;

    /// Fetch one element.
    async fn get_element(&self, book: &BookId, id: ElementId) -> Result<Option<NarrativeElement>, StoreError>;

    /// All elements known for a book.
    async fn get_active_elements(&self, book: &BookId) -> Result<Vec<NarrativeElement>, StoreError>;

    /// Drop everything stored for a book.
    async fn clear_book(&self, book: &BookId) -> Result<(), StoreError>;
}

// =========================================================================
// In-memory store
// =========================================================================

/// Volatile store, useful for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct InMemoryNarrativeStore {
    books: RwLock<HashMap<BookId, HashMap<ElementId, NarrativeElement>>>,
}

impl InMemoryNarrativeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NarrativeStore for InMemoryNarrativeStore {
    async fn register_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        self.books
            .write()
            .await
            .entry(book.clone())
            .or_default()
            .insert(element.id, element.clone());
        Ok(())
    }

    async fn update_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        self.register_element(book, element).await
    }

    async fn get_element(&self, book: &BookId, id: ElementId) -> Result<Option<NarrativeElement>, StoreError> {
        Ok(self
            .books
            .read()
            .await
            .get(book)
            .and_then(|elements| elements.get(&id).cloned()))
    }

    async fn get_active_elements(&self, book: &BookId) -> Result<Vec<NarrativeElement>, StoreError> {
        Ok(self
            .books
            .read()
            .await
            .get(book)
            .map(|elements| elements.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_book(&self, book: &BookId) -> Result<(), StoreError> {
        self.books.write().await.remove(book);
        Ok(())
    }
}

// =========================================================================
// JSON file store
// =========================================================================

/// Current document version.
const STORE_VERSION: u32 = 1;

/// On-disk document for one book.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBook {
    version: u32,
    elements: Vec<NarrativeElement>,
}

/// Store keeping one JSON document per book inside a directory.
#[derive(Debug)]
pub struct JsonFileNarrativeStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileNarrativeStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, book: &BookId) -> PathBuf {
        let safe: String = book
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read_book(&self, book: &BookId) -> Result<StoredBook, StoreError> {
        let path = self.path_for(book);
        if !fs::try_exists(&path).await? {
            return Ok(StoredBook {
                version: STORE_VERSION,
                elements: Vec::new(),
            });
        }
        let content = fs::read_to_string(&path).await?;
        let stored: StoredBook = serde_json::from_str(&content)?;
        if stored.version != STORE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_VERSION,
                found: stored.version,
            });
        }
        Ok(stored)
    }

    async fn write_book(&self, book: &BookId, stored: &StoredBook) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(stored)?;
        let path = self.path_for(book);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn upsert(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_book(book).await?;
        match stored.elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => *existing = element.clone(),
            None => stored.elements.push(element.clone()),
        }
        self.write_book(book, &stored).await
    }
}

#[async_trait]
impl NarrativeStore for JsonFileNarrativeStore {
    async fn register_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        self.upsert(book, element).await
    }

    async fn update_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        self.upsert(book, element).await
    }

    async fn get_element(&self, book: &BookId, id: ElementId) -> Result<Option<NarrativeElement>, StoreError> {
        let stored = self.read_book(book).await?;
        Ok(stored.elements.into_iter().find(|e| e.id == id))
    }

    async fn get_active_elements(&self, book: &BookId) -> Result<Vec<NarrativeElement>, StoreError> {
        Ok(self.read_book(book).await?.elements)
    }

    async fn clear_book(&self, book: &BookId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(book);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
