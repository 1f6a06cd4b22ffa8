//! Persistence boundary: deck/card/metadata/conversation rows and image blobs.

pub mod blob;
pub mod memory;
pub mod traits;

pub use blob::{BlobStore, FsBlobStore};
pub use memory::MemoryStore;
pub use traits::{DeckStore, Finalization};
