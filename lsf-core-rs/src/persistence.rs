//! Blob files and the background persistence worker
//!
//! Every store writes to its own file inside the storage directory:
//!
//! ```text
//! <decimal checksum>\n
//! <serialized blob>
//! ```
//!
//! A file whose checksum does not match its content is treated as absent.
//!
//! The worker wakes on the shared [`WriteTrigger`], walks the stores in
//! [`BlobType::ALL`] order, writes any pending blob, and reports changed
//! blobs to the elector so they reach the peers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::{age_since, Clock};
use crate::codec;
use crate::store::{BlobOrigin, ReplicatedStore, VersionedBlob, WriteTrigger};
use crate::types::{BlobType, NodeId};

/// Pause before retrying after a failed write
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Reads and writes blob files
#[derive(Debug, Clone)]
pub struct BlobFiles {
    dir: PathBuf,
}

impl BlobFiles {
    /// Create the storage directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, blob_type: BlobType) -> PathBuf {
        self.dir.join(blob_type.file_name())
    }

    /// Validated content of a blob file, `None` when missing or corrupt
    pub fn read(&self, blob_type: BlobType) -> Option<String> {
        let path = self.path(blob_type);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Persistence: Cannot read {:?}: {}", path, e);
                return None;
            }
        };

        let (header, data) = match raw.split_once('\n') {
            Some(parts) => parts,
            None => {
                warn!("Persistence: {:?} has no checksum line, ignoring", path);
                return None;
            }
        };

        let stored: u32 = match header.trim().parse() {
            Ok(checksum) => checksum,
            Err(_) => {
                warn!("Persistence: {:?} has a bad checksum line, ignoring", path);
                return None;
            }
        };

        if codec::checksum(data.as_bytes()) != stored {
            warn!("Persistence: Checksum mismatch in {:?}, ignoring", path);
            return None;
        }

        Some(data.to_string())
    }

    /// Write a blob file atomically (temp file then rename)
    pub fn write(&self, blob: &VersionedBlob) -> io::Result<()> {
        let path = self.path(blob.blob_type);
        let temp_path = path.with_extension("lsf.tmp");

        fs::write(&temp_path, format!("{}\n{}", blob.checksum, blob.data))?;
        fs::rename(&temp_path, &path)?;

        debug!(
            "Persistence: Wrote {} ({} bytes, checksum {:08x})",
            blob.blob_type,
            blob.data.len(),
            blob.checksum
        );
        Ok(())
    }
}

/// A blob that changed on disk and must reach the peers
#[derive(Debug, Clone)]
pub struct BlobUpdate {
    pub blob: VersionedBlob,
    pub age: u64,
    pub origin: BlobOrigin,
}

/// Events emitted by the persistence worker
#[derive(Debug, Clone)]
pub enum PersistenceEvent {
    /// A store's blob changed and was written
    Written(BlobUpdate),
    /// A deferred peer blob request can be answered now
    BlobReady {
        peer: NodeId,
        blob: VersionedBlob,
        age: u64,
    },
}

/// Single writer for every store
pub struct PersistenceScheduler {
    files: BlobFiles,
    stores: Vec<Arc<dyn ReplicatedStore>>,
    trigger: WriteTrigger,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<PersistenceEvent>,
    deferred: Mutex<Vec<(BlobType, NodeId)>>,
}

impl PersistenceScheduler {
    pub fn new(
        files: BlobFiles,
        mut stores: Vec<Arc<dyn ReplicatedStore>>,
        trigger: WriteTrigger,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<PersistenceEvent>,
    ) -> Self {
        stores.sort_by_key(|s| s.blob_type());
        Self {
            files,
            stores,
            trigger,
            clock,
            events,
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self, blob_type: BlobType) -> Option<&Arc<dyn ReplicatedStore>> {
        self.stores.iter().find(|s| s.blob_type() == blob_type)
    }

    /// Initialize every store from disk. Corrupt or missing files yield
    /// InitialState, which the next cycle writes back.
    pub fn load_all(&self) {
        for store in &self.stores {
            let saved = self.files.read(store.blob_type());
            if let Err(e) = store.restore(saved) {
                warn!(
                    "Persistence: Cannot parse {} blob ({}), starting from InitialState",
                    store.blob_type(),
                    e
                );
                if let Err(e) = store.restore(None) {
                    error!("Persistence: Cannot reset {} store: {}", store.blob_type(), e);
                }
            }
        }
    }

    /// Current blob for a peer, or `None` when the request was queued until
    /// the pending write lands
    pub fn request_blob(&self, blob_type: BlobType, peer: NodeId) -> Option<(VersionedBlob, u64)> {
        let store = self.store(blob_type)?;
        if store.has_pending() {
            debug!("Persistence: Deferring {} blob request from {}", blob_type, peer);
            self.deferred.lock().push((blob_type, peer));
            self.trigger.schedule();
            return None;
        }
        let blob = store.last_blob();
        let age = age_since(self.clock.as_ref(), blob.timestamp);
        Some((blob, age))
    }

    /// Write every pending blob, then answer deferred requests. Returns
    /// false when a write failed; that blob stays pending.
    pub fn run_cycle(&self) -> bool {
        let mut all_written = true;
        for store in &self.stores {
            let pending = match store.take_pending() {
                Some(pending) => pending,
                None => continue,
            };

            let on_disk = self
                .files
                .read(store.blob_type())
                .map(|data| codec::checksum(data.as_bytes()));
            if on_disk == Some(pending.blob.checksum) {
                debug!("Persistence: {} unchanged, skipping write", store.blob_type());
                continue;
            }

            if let Err(e) = self.files.write(&pending.blob) {
                error!("Persistence: Failed to write {}: {}", store.blob_type(), e);
                store.requeue(pending);
                all_written = false;
                continue;
            }

            let age = age_since(self.clock.as_ref(), pending.blob.timestamp);
            let _ = self.events.send(PersistenceEvent::Written(BlobUpdate {
                blob: pending.blob,
                age,
                origin: pending.origin,
            }));
        }

        let deferred: Vec<_> = std::mem::take(&mut *self.deferred.lock());
        for (blob_type, peer) in deferred {
            let store = match self.store(blob_type) {
                Some(store) => store,
                None => continue,
            };
            if store.has_pending() {
                self.deferred.lock().push((blob_type, peer));
                continue;
            }
            let blob = store.last_blob();
            let age = age_since(self.clock.as_ref(), blob.timestamp);
            let _ = self
                .events
                .send(PersistenceEvent::BlobReady { peer, blob, age });
        }
        all_written
    }
}

/// Run the persistence worker until the event receiver goes away
pub async fn run_persistence_loop(scheduler: Arc<PersistenceScheduler>) {
    info!(
        "Persistence: Worker started for {:?}",
        scheduler.files.dir()
    );
    loop {
        scheduler.trigger.wait().await;
        if scheduler.events.is_closed() {
            break;
        }
        let worker = scheduler.clone();
        // Disk I/O stays off the async workers
        match tokio::task::spawn_blocking(move || worker.run_cycle()).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(WRITE_RETRY_DELAY).await,
            Err(e) => error!("Persistence: Write cycle panicked: {}", e),
        }
    }
    info!("Persistence: Worker stopped");
}
