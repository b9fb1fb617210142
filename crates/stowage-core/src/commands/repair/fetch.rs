use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use stowage_storage::ObjectStore;
use stowage_types::ContentHasher;
use tracing::debug;

use crate::backend::{download, DownloadedVolume};
use crate::error::Result;

type FetchResult = (String, Result<DownloadedVolume>);

/// Downloads a fixed set of remote volumes on a pool of worker threads.
///
/// Work queue → `window` workers → bounded result channel → consumer. At most
/// `window` downloads run at once and at most `window` finished ones wait to
/// be consumed. Results arrive in completion order, not submission order.
/// Dropping the iterator stops the workers after their current download.
pub struct PrefetchDownloads {
    results: Option<Receiver<FetchResult>>,
    remaining: usize,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl PrefetchDownloads {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        hasher: ContentHasher,
        names: Vec<String>,
        window: usize,
    ) -> Self {
        let window = window.max(1);
        let remaining = names.len();

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<String>();
        for name in names {
            // The receiver is alive until the workers exit, so this cannot fail.
            let _ = work_tx.send(name);
        }
        drop(work_tx);

        let (result_tx, result_rx) = crossbeam_channel::bounded::<FetchResult>(window);
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..window.min(remaining))
            .map(|_| {
                let rx = work_rx.clone();
                let tx = result_tx.clone();
                let store = Arc::clone(&store);
                let hasher = hasher.clone();
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    for name in rx {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        let fetched = download(store.as_ref(), &hasher, &name);
                        if tx.send((name, fetched)).is_err() {
                            return; // Consumer gone.
                        }
                    }
                })
            })
            .collect();

        Self {
            results: Some(result_rx),
            remaining,
            stop,
            workers,
        }
    }
}

impl Iterator for PrefetchDownloads {
    type Item = FetchResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.results.as_ref()?.recv().ok()?;
        self.remaining -= 1;
        debug!(name = %item.0, remaining = self.remaining, "prefetched volume");
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl Drop for PrefetchDownloads {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Closing the result channel unblocks workers waiting to send.
        self.results.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
