//! Narrative context for consistent scene generation.
//!
//! Tracks the last-known visual attributes of characters, objects and
//! settings so that every generation prompt describes them the same way.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 NarrativeContextProvider                  │
//! │                                                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ ElementIndex │   │ NameIndex    │   │ Signature     │  │
//! │  │ (id→element) │   │ (kind,name→  │   │ (shared-key   │  │
//! │  │              │   │   ids)       │   │   Jaccard)    │  │
//! │  └──────────────┘   └──────────────┘   └───────────────┘  │
//! │              │ hydrate / write-through                    │
//! └──────────────┼────────────────────────────────────────────┘
//!                ▼
//!          NarrativeStore
//! ```

mod element;
mod provider;
mod similarity;
mod store;

pub use element::{AttributeMap, ElementId, ElementKind, ElementRef, NarrativeElement};
pub use provider::NarrativeContextProvider;
pub use similarity::{attribute_similarity, Signature};
pub use store::{InMemoryNarrativeStore, JsonFileNarrativeStore, NarrativeStore, StoreError};
