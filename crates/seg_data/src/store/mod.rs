//! Key-ordered record stores.
//!
//! The pipeline reads records through a [`Cursor`] that visits keys in
//! byte-wise order; dataset construction writes them through a
//! [`Transaction`]. Two implementations are provided:
//!
//! ```text
//! store/
//! ├── file.rs    → FileStore: persistent, append-only data file + in-memory key index
//! └── memory.rs  → MemoryStore: BTreeMap-backed, for tests and in-process assembly
//! ```

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a fresh store; fails if the path already exists.
    New,
    /// Open an existing store for reading.
    Read,
}

/// Positioned reader over a store snapshot, ordered by key.
///
/// A cursor is exclusively owned by whoever drives it (the prefetch
/// producer in the training pipeline), so it only has to be `Send`.
pub trait Cursor: Send {
    /// Key at the current position, or `None` when the cursor is exhausted.
    fn key(&self) -> Option<&[u8]>;

    /// Value at the current position, or `None` when the cursor is exhausted.
    fn value(&self) -> Option<&[u8]>;

    /// Moves to the next key. Calling it on an exhausted cursor is a no-op.
    fn next(&mut self) -> Result<()>;

    fn valid(&self) -> bool;

    fn seek_to_first(&mut self) -> Result<()>;

    /// Number of distinct keys visible to this cursor.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffered batch of writes made visible by [`Transaction::commit`].
pub trait Transaction {
    fn put(&mut self, key: &[u8], value: Vec<u8>);

    /// Persists buffered puts. The transaction stays usable afterwards.
    fn commit(&mut self) -> Result<()>;

    /// Number of puts waiting for the next commit.
    fn pending(&self) -> usize;
}

/// A store that hands out cursors and transactions.
pub trait RecordStore: Send + Sync {
    fn cursor(&self) -> Result<Box<dyn Cursor>>;

    fn transaction(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// Zero-padded sequential key used when items are not keyed by name.
pub fn sequential_key(index: usize) -> String {
    format!("{:08}", index)
}
