use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stowage_storage::{ObjectInfo, ObjectStore};
use stowage_types::error::{Result, StowageError};

/// In-memory object store for testing. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an object's bytes without going through `put`.
    pub fn overwrite(&self, name: &str, data: Vec<u8>) {
        self.data.lock().unwrap().insert(name.to_string(), data);
    }

    pub fn remove(&self, name: &str) {
        self.data.lock().unwrap().remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }
}

impl ObjectStore for MemoryBackend {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().get(name).cloned())
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.overwrite(name, data.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().contains_key(name))
    }

    fn list(&self) -> Result<Vec<ObjectInfo>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .iter()
            .map(|(name, data)| ObjectInfo {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}

/// Shared handle to inspect the mutating calls a [`RecordingBackend`] saw,
/// as `"put:<name>"` and `"delete:<name>"`.
#[derive(Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    /// All recorded operations since the last `clear()`.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.with_prefix("put:")
    }

    pub fn deletes(&self) -> Vec<String> {
        self.with_prefix("delete:")
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn record(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

/// Storage wrapper over a shared [`MemoryBackend`] that records puts and
/// deletes, can fail or slow down reads of chosen names, and can raise a
/// shutdown flag after a number of deletes.
pub struct RecordingBackend {
    inner: Arc<MemoryBackend>,
    log: OpLog,
    failing_gets: Mutex<Vec<String>>,
    get_delays: Mutex<HashMap<String, Duration>>,
    stop_after_deletes: Option<(Arc<AtomicBool>, usize)>,
    deletes: AtomicUsize,
}

impl RecordingBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> (Self, OpLog) {
        let log = OpLog::default();
        (
            Self {
                inner,
                log: log.clone(),
                failing_gets: Mutex::new(Vec::new()),
                get_delays: Mutex::new(HashMap::new()),
                stop_after_deletes: None,
                deletes: AtomicUsize::new(0),
            },
            log,
        )
    }

    /// Raise `flag` once `n` deletes have completed.
    pub fn stop_after_deletes(mut self, flag: Arc<AtomicBool>, n: usize) -> Self {
        self.stop_after_deletes = Some((flag, n));
        self
    }

    pub fn fail_get(&self, name: &str) {
        self.failing_gets.lock().unwrap().push(name.to_string());
    }

    pub fn delay_get(&self, name: &str, delay: Duration) {
        self.get_delays
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
    }
}

impl ObjectStore for RecordingBackend {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let delay = self.get_delays.lock().unwrap().get(name).copied();
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        if self.failing_gets.lock().unwrap().iter().any(|n| n == name) {
            return Err(StowageError::Other(format!("injected read failure for {name}")));
        }
        self.inner.get(name)
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.log.record(format!("put:{name}"));
        self.inner.put(name, data)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.log.record(format!("delete:{name}"));
        self.inner.delete(name)?;
        let done = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((flag, n)) = &self.stop_after_deletes {
            if done >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name)
    }

    fn list(&self) -> Result<Vec<ObjectInfo>> {
        self.inner.list()
    }
}
