//! Remote document database access.
//!
//! Page logic talks to [`DocumentService`]; [`FirestoreClient`] speaks the
//! Firestore REST API and [`MemoryDocumentService`] keeps documents in
//! process (fixtures and tests).

mod firestore;
mod memory;
mod traits;

pub use firestore::FirestoreClient;
pub use memory::MemoryDocumentService;
pub use traits::{Direction, DocumentService, Query};
