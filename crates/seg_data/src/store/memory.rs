use super::{sequential_key, Cursor, RecordStore, Transaction};
use crate::error::{PipelineError, Result};
use crate::record::Record;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-process store backed by a `BTreeMap`.
///
/// Clones share the same map, so a test can keep a handle for writing
/// while a pipeline reads from another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store holding `records` under sequential keys.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Record>,
    {
        let store = Self::new();
        {
            let mut txn = store.transaction()?;
            for (i, record) in records.into_iter().enumerate() {
                txn.put(sequential_key(i).as_bytes(), record.encode()?);
            }
            txn.commit()?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> PipelineError {
    PipelineError::store("<memory>", "store lock poisoned")
}

impl RecordStore for MemoryStore {
    fn cursor(&self) -> Result<Box<dyn Cursor>> {
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = self
            .entries
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(MemoryCursor {
            entries: snapshot,
            position: 0,
        }))
    }

    fn transaction(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Transaction for MemoryTransaction<'_> {
    fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.push((key.to_vec(), value));
    }

    fn commit(&mut self) -> Result<()> {
        let mut entries = self.store.entries.write().map_err(|_| poisoned())?;
        for (key, value) in self.pending.drain(..) {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Cursor over a snapshot taken when the cursor was created.
struct MemoryCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl Cursor for MemoryCursor {
    fn key(&self) -> Option<&[u8]> {
        self.entries.get(self.position).map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.entries.get(self.position).map(|(_, v)| v.as_slice())
    }

    fn next(&mut self) -> Result<()> {
        if self.position < self.entries.len() {
            self.position += 1;
        }
        Ok(())
    }

    fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
