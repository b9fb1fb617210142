use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use stowage_storage::{ObjectInfo, ObjectStore};
use stowage_types::{ContentHasher, Digest};
use tracing::{debug, info};

use crate::db::{LocalDatabase, VolumeState};
use crate::error::{Result, StowageError};
use crate::volume::VolumeUpload;

/// A downloaded volume with its observed size and hash.
#[derive(Debug, Clone)]
pub struct DownloadedVolume {
    pub name: String,
    pub data: Vec<u8>,
    pub size: u64,
    pub hash: Digest,
}

struct PendingUpload {
    name: String,
    size: u64,
    hash: Digest,
    handle: JoinHandle<Result<()>>,
}

/// Remote volume manager over an [`ObjectStore`]: downloads with size/hash
/// capture, background uploads and deletes.
///
/// Uploads run on their own threads, at most `max_in_flight` at once. Their
/// completion is applied to the database only by the owner thread, through
/// [`RemoteVolumes::wait_for_complete`].
pub struct RemoteVolumes {
    store: Arc<dyn ObjectStore>,
    hasher: ContentHasher,
    pending_uploads: VecDeque<PendingUpload>,
    max_in_flight: usize,
}

impl RemoteVolumes {
    pub fn new(store: Arc<dyn ObjectStore>, hasher: ContentHasher, max_in_flight: usize) -> Self {
        Self {
            store,
            hasher,
            pending_uploads: VecDeque::new(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    pub fn list(&self) -> Result<Vec<ObjectInfo>> {
        self.store.list()
    }

    pub fn get_with_info(&self, name: &str) -> Result<DownloadedVolume> {
        download(self.store.as_ref(), &self.hasher, name)
    }

    /// Size and hash a volume will have once stored.
    pub fn describe(&self, data: &[u8]) -> (u64, Digest) {
        (data.len() as u64, self.hasher.hash(data))
    }

    pub fn pending_count(&self) -> usize {
        self.pending_uploads.len()
    }

    /// Whether `name` was queued by this manager and has not been joined yet.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending_uploads.iter().any(|p| p.name == name)
    }

    /// Start a background upload. Blocks on the oldest upload first when the
    /// in-flight cap is reached.
    pub fn put(&mut self, db: &mut LocalDatabase, upload: VolumeUpload) -> Result<()> {
        self.cap_pending_uploads(db)?;

        let (size, hash) = self.describe(&upload.data);
        let store = Arc::clone(&self.store);
        let name = upload.name.clone();
        debug!(name = %upload.name, size, "queueing upload");
        let handle = std::thread::spawn(move || store.put_owned(&upload.name, upload.data));
        self.pending_uploads.push_back(PendingUpload {
            name,
            size,
            hash,
            handle,
        });
        Ok(())
    }

    /// Remove a remote volume. `expected_size` is the size it was listed with.
    pub fn delete(&self, name: &str, expected_size: u64) -> Result<()> {
        info!(name, size = expected_size, "deleting remote volume");
        self.store.delete(name)
    }

    fn wait_one_pending_upload(&mut self, db: &mut LocalDatabase) -> Result<()> {
        let Some(pending) = self.pending_uploads.pop_front() else {
            return Ok(());
        };
        pending
            .handle
            .join()
            .map_err(|_| StowageError::Other(format!("upload thread for {} panicked", pending.name)))??;
        db.update_remote_volume(
            &pending.name,
            VolumeState::Uploaded,
            Some(pending.size),
            Some(pending.hash),
        )?;
        info!(name = %pending.name, "upload complete");
        Ok(())
    }

    fn cap_pending_uploads(&mut self, db: &mut LocalDatabase) -> Result<()> {
        while self.pending_uploads.len() >= self.max_in_flight {
            self.wait_one_pending_upload(db)?;
        }
        Ok(())
    }

    /// Join every in-flight upload and mark the finished ones `Uploaded`.
    /// All uploads are drained even when one fails; the first error is returned.
    pub fn wait_for_complete(&mut self, db: &mut LocalDatabase) -> Result<()> {
        let mut first_err = None;
        while !self.pending_uploads.is_empty() {
            if let Err(e) = self.wait_one_pending_upload(db) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fetch `name` and capture its size and hash. Shared with the download workers.
pub(crate) fn download(
    store: &dyn ObjectStore,
    hasher: &ContentHasher,
    name: &str,
) -> Result<DownloadedVolume> {
    let data = store
        .get(name)?
        .ok_or_else(|| StowageError::VolumeNotFound(name.to_string()))?;
    Ok(DownloadedVolume {
        name: name.to_string(),
        size: data.len() as u64,
        hash: hasher.hash(&data),
        data,
    })
}
