//! Session-scoped narrative context provider.

use super::element::{AttributeMap, ElementId, ElementKind, ElementRef, NarrativeElement};
use super::similarity::Signature;
use super::store::{NarrativeStore, StoreError};
use crate::book::BookId;
use crate::model::SentenceRef;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// In-memory index of elements for one book.
#[derive(Debug, Default)]
struct ElementIndex {
    elements: HashMap<ElementId, NarrativeElement>,
    /// (kind, lowercase name) -> ids sharing that name.
    names: HashMap<(ElementKind, String), Vec<ElementId>>,
}

impl ElementIndex {
    fn insert(&mut self, element: NarrativeElement) {
        let key = (element.kind, element.name.trim().to_lowercase());
        let ids = self.names.entry(key).or_default();
        if !ids.contains(&element.id) {
            ids.push(element.id);
        }
        self.elements.insert(element.id, element);
    }

    /// Best registered match for a reference, if any clears the threshold.
    fn find_match(&self, reference: &ElementRef, attributes: &AttributeMap, threshold: f64) -> Option<ElementId> {
        if let Some(id) = reference.id {
            if self.elements.contains_key(&id) {
                return Some(id);
            }
        }

        let key = (reference.kind, reference.name.trim().to_lowercase());
        let candidates = self.names.get(&key)?;
        let wanted = Signature::from_attributes(attributes);

        candidates
            .iter()
            .filter_map(|id| self.elements.get(id))
            .map(|element| (element.signature.similarity(&wanted), element))
            .filter(|(score, _)| *score >= threshold)
            .max_by(|(a_score, a), (b_score, b)| {
                a_score
                    .total_cmp(b_score)
                    .then_with(|| a.last_seen.cmp(&b.last_seen))
            })
            .map(|(_, element)| element.id)
    }
}

/// A store write queued behind an index change.
enum StoreWrite {
    Persist { element: NarrativeElement, created: bool },
    Flush(oneshot::Sender<()>),
}

/// Drain queued writes in submission order until every sender is gone.
async fn run_writer(book: BookId, store: Arc<dyn NarrativeStore>, mut rx: mpsc::UnboundedReceiver<StoreWrite>) {
    while let Some(write) = rx.recv().await {
        match write {
            StoreWrite::Persist { element, created } => {
                let result = if created {
                    store.register_element(&book, &element).await
                } else {
                    store.update_element(&book, &element).await
                };
                if let Err(e) = result {
                    warn!(element = %element.id, error = %e, "narrative store write-behind failed");
                }
            }
            StoreWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Resolves element references to their last-known visual attributes.
///
/// Reads take a shared lock and never touch the store, so generation
/// workers can resolve concurrently with parser-driven updates. Updates
/// land in the index immediately; persistence happens behind them on a
/// background writer, in the order the updates were applied.
pub struct NarrativeContextProvider {
    book: BookId,
    similarity_threshold: f64,
    index: RwLock<ElementIndex>,
    store: Arc<dyn NarrativeStore>,
    /// Started on the first queued write.
    writer: Mutex<Option<mpsc::UnboundedSender<StoreWrite>>>,
}

impl NarrativeContextProvider {
    /// Create an empty provider for a book.
    pub fn new(book: BookId, similarity_threshold: f64, store: Arc<dyn NarrativeStore>) -> Self {
        Self {
            book,
            similarity_threshold,
            index: RwLock::new(ElementIndex::default()),
            store,
            writer: Mutex::new(None),
        }
    }

    /// The book this provider serves.
    pub fn book(&self) -> &BookId {
        &self.book
    }

    /// Load every element the store knows for this book.
    pub async fn hydrate(&self) -> Result<usize, StoreError> {
        let elements = self.store.get_active_elements(&self.book).await?;
        let count = elements.len();
        let mut index = self.index.write();
        for element in elements {
            index.insert(element);
        }
        debug!(book = %self.book, count, "hydrated narrative context");
        Ok(count)
    }

    /// Resolve a list of references.
    ///
    /// Unknown references resolve to a minimal element carrying only the
    /// given name and kind.
    pub fn resolve(&self, references: &[ElementRef]) -> Vec<NarrativeElement> {
        let index = self.index.read();
        references
            .iter()
            .map(|reference| {
                index
                    .find_match(reference, &reference.attributes, self.similarity_threshold)
                    .and_then(|id| index.elements.get(&id).cloned())
                    .unwrap_or_else(|| NarrativeElement::minimal(reference.kind, reference.name.clone()))
            })
            .collect()
    }

    /// Merge an attribute delta into the referenced element.
    ///
    /// A reference whose attributes conflict with every same-named element
    /// (similarity below the threshold) creates a distinct element instead
    /// of merging. Pass an explicit id to change an attribute of a known
    /// element. Returns once the change has reached the store; store
    /// failures are logged and do not undo the in-memory update.
    pub async fn update(
        &self,
        reference: &ElementRef,
        delta: &AttributeMap,
        sentence: Option<&SentenceRef>,
    ) -> ElementId {
        let id = self.update_deferred(reference, delta, sentence);
        self.flush().await;
        id
    }

    /// Merge an attribute delta without waiting for the store.
    ///
    /// The index reflects the change before this returns, so a following
    /// [`resolve`](Self::resolve) sees it. The store write is queued behind
    /// any earlier ones. Must be called from within a tokio runtime.
    pub fn update_deferred(
        &self,
        reference: &ElementRef,
        delta: &AttributeMap,
        sentence: Option<&SentenceRef>,
    ) -> ElementId {
        let (element, created) = self.apply(reference, delta, sentence);
        let id = element.id;
        self.enqueue(StoreWrite::Persist { element, created });
        id
    }

    /// Wait until every write queued so far has reached the store.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        let queued = match self.writer.lock().as_ref() {
            Some(tx) => tx.send(StoreWrite::Flush(done)).is_ok(),
            None => false,
        };
        if queued {
            let _ = wait.await;
        }
    }

    fn apply(
        &self,
        reference: &ElementRef,
        delta: &AttributeMap,
        sentence: Option<&SentenceRef>,
    ) -> (NarrativeElement, bool) {
        let mut index = self.index.write();

        let mut merged = reference.attributes.clone();
        merged.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));

        let matched = index
            .find_match(reference, &merged, self.similarity_threshold)
            .and_then(|id| index.elements.get_mut(&id));

        match matched {
            Some(element) => {
                element.merge(delta);
                if let Some(sentence) = sentence {
                    element.last_seen = Some(sentence.seq);
                }
                (element.clone(), false)
            }
            None => {
                let element = self.fresh_element(reference, merged, sentence);
                index.insert(element.clone());
                (element, true)
            }
        }
    }

    fn enqueue(&self, write: StoreWrite) {
        let mut writer = self.writer.lock();
        let tx = writer.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(self.book.clone(), self.store.clone(), rx));
            tx
        });
        if tx.send(write).is_err() {
            warn!(book = %self.book, "narrative store writer stopped; write dropped");
        }
    }

    fn fresh_element(
        &self,
        reference: &ElementRef,
        attributes: AttributeMap,
        sentence: Option<&SentenceRef>,
    ) -> NarrativeElement {
        let mut element = NarrativeElement::new(reference.kind, reference.name.trim(), attributes);
        if let Some(id) = reference.id {
            element.id = id;
        }
        element.last_seen = sentence.map(|s| s.seq);
        debug!(element = %element.id, name = %element.name, "registered narrative element");
        element
    }

    /// Get an element by id.
    pub fn element(&self, id: ElementId) -> Option<NarrativeElement> {
        self.index.read().elements.get(&id).cloned()
    }

    /// All elements known for this book.
    pub fn active_elements(&self) -> Vec<NarrativeElement> {
        self.index.read().elements.values().cloned().collect()
    }

    /// Number of tracked elements.
    pub fn len(&self) -> usize {
        self.index.read().elements.len()
    }

    /// Whether no element is tracked.
    pub fn is_empty(&self) -> bool {
        self.index.read().elements.is_empty()
    }

    /// Drop all elements for this book, locally and in the store.
    ///
    /// Pending writes land first so none of them resurrects an element
    /// after the clear.
    pub async fn clear_book(&self) -> Result<(), StoreError> {
        self.flush().await;
        *self.index.write() = ElementIndex::default();
        self.store.clear_book(&self.book).await
    }
}
