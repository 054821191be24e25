//! MemoryStore - テスト・デモ用の単一書き込みストア
//!
//! # 学習ポイント
//! - 書き込みロックはハンドル単位。最初の書き込みで取得し、ハンドルの drop で解放する
//!   （別のハンドルがロックを持っている間の書き込みは busy）
//! - 同時に開いているハンドル数を数える（writer が直列化しているかの検証用）
//! - 失敗の注入: open 失敗 / 操作失敗のスクリプト、seed 付きの確率的 busy

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{BoxError, StoreError};
use crate::ports::HandleFactory;

/// Journal mode of the store (only recorded, both behave the same here).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Delete,
    Wal,
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub value: String,
}

/// Handle counters, for asserting single-writer behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleStats {
    /// Handles open right now.
    pub open: usize,
    /// Highest number of handles open at the same time.
    pub max_open: usize,
    /// Handles opened since the store was created.
    pub opened_total: u64,
}

#[derive(Debug)]
struct StoreState {
    records: BTreeMap<u64, String>,
    next_id: u64,
    journal_mode: JournalMode,
    handles: HandleStats,
    next_handle: u64,
    write_owner: Option<u64>,
    open_failures: VecDeque<StoreError>,
    op_failures: VecDeque<StoreError>,
    busy_rate: f64,
    rng: StdRng,
}

/// In-memory store with a single write lock.
///
/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Open a new handle.
    pub fn open_handle(&self) -> Result<MemoryHandle, StoreError> {
        let mut state = self.lock();
        if let Some(err) = state.open_failures.pop_front() {
            return Err(err);
        }

        state.next_handle += 1;
        let serial = state.next_handle;
        state.handles.open += 1;
        state.handles.opened_total += 1;
        state.handles.max_open = state.handles.max_open.max(state.handles.open);

        Ok(MemoryHandle {
            serial,
            store: self.clone(),
        })
    }

    /// The next `failures.len()` opens fail with these errors, in order.
    pub fn fail_next_opens(&self, failures: impl IntoIterator<Item = StoreError>) {
        self.lock().open_failures.extend(failures);
    }

    /// The next `failures.len()` operations (on any handle) fail with these
    /// errors, in order.
    pub fn fail_next_ops(&self, failures: impl IntoIterator<Item = StoreError>) {
        self.lock().op_failures.extend(failures);
    }

    pub fn handle_stats(&self) -> HandleStats {
        self.lock().handles
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.lock().journal_mode
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        self.lock()
            .records
            .iter()
            .map(|(id, value)| Record {
                id: *id,
                value: value.clone(),
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandleFactory for MemoryStore {
    type Handle = MemoryHandle;

    fn open(&self) -> Result<MemoryHandle, BoxError> {
        Ok(self.open_handle()?)
    }
}

/// Builder for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreBuilder {
    busy_rate: f64,
    seed: u64,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            busy_rate: 0.0,
            seed: 0,
        }
    }
}

impl MemoryStoreBuilder {
    /// Probability (0.0..=1.0) that a write reports busy.
    pub fn busy_rate(mut self, rate: f64) -> Self {
        self.busy_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore {
            state: Arc::new(Mutex::new(StoreState {
                records: BTreeMap::new(),
                next_id: 1,
                journal_mode: JournalMode::default(),
                handles: HandleStats::default(),
                next_handle: 0,
                write_owner: None,
                open_failures: VecDeque::new(),
                op_failures: VecDeque::new(),
                busy_rate: self.busy_rate,
                rng: StdRng::seed_from_u64(self.seed),
            })),
        }
    }
}

/// An open handle on a [`MemoryStore`]. Dropping it releases its write lock.
#[derive(Debug)]
pub struct MemoryHandle {
    serial: u64,
    store: MemoryStore,
}

impl MemoryHandle {
    /// Insert a row and return its id.
    pub fn insert(&mut self, value: &str) -> Result<u64, StoreError> {
        let mut state = self.begin_write()?;
        let id = state.next_id;
        state.next_id += 1;
        state.records.insert(id, value.to_string());
        Ok(id)
    }

    pub fn update(&mut self, id: u64, value: &str) -> Result<(), StoreError> {
        let mut state = self.begin_write()?;
        match state.records.get_mut(&id) {
            Some(slot) => {
                *slot = value.to_string();
                Ok(())
            }
            None => Err(StoreError::new(format!("no row with id {id}"))),
        }
    }

    pub fn get(&self, id: u64) -> Result<Option<String>, StoreError> {
        let state = self.begin_read()?;
        Ok(state.records.get(&id).cloned())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let state = self.begin_read()?;
        Ok(state.records.len())
    }

    pub fn set_journal_mode(&mut self, mode: JournalMode) -> Result<(), StoreError> {
        let mut state = self.begin_write()?;
        state.journal_mode = mode;
        Ok(())
    }

    fn begin_read(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let mut state = self.store.lock();
        if let Some(err) = state.op_failures.pop_front() {
            return Err(err);
        }
        Ok(state)
    }

    fn begin_write(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let mut state = self.begin_read()?;
        match state.write_owner {
            Some(owner) if owner != self.serial => return Err(StoreError::busy()),
            _ => {}
        }
        let busy_rate = state.busy_rate;
        if busy_rate > 0.0 && state.rng.gen_bool(busy_rate) {
            return Err(StoreError::busy());
        }
        state.write_owner = Some(self.serial);
        Ok(state)
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        state.handles.open = state.handles.open.saturating_sub(1);
        if state.write_owner == Some(self.serial) {
            state.write_owner = None;
        }
    }
}
