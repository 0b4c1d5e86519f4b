//! Debounced snapshot file writer and uploader fan-out
//!
//! Roster changes arrive far more often than the snapshot needs rewriting.
//! Changes only mark the snapshot dirty. The [`SnapshotWriter`] writes the
//! first change right away, then coalesces everything that arrives during the
//! debounce window into a single write, reading the roster only when it
//! actually writes. Failed writes are retried after a short delay. Every
//! successful write is handed to the configured uploaders.

use crate::config::UploadTarget;
use crate::errors::{DataServerError, Result};
use crate::roster::Snapshot;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const SNAPSHOT_FILE_NAME: &str = "vatsim-data.json";

/// Receives the change generation; only the latest value is kept
pub type SnapshotReceiver = watch::Receiver<u64>;

/// Sending side of the snapshot channel
#[derive(Clone)]
pub struct SnapshotSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl SnapshotSignal {
    /// Marks the snapshot dirty. Repeated signals collapse into one.
    pub fn signal(&self) {
        self.tx
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

pub fn snapshot_channel() -> (SnapshotSignal, SnapshotReceiver) {
    let (tx, rx) = watch::channel(0);
    (SnapshotSignal { tx: Arc::new(tx) }, rx)
}

/// Current roster state, read when a snapshot is written
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Snapshot;
}

/// Durable destination of the serialized roster
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()>;
}

/// Writes `<directory>/vatsim-data.json`, replacing it atomically
pub struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE_NAME)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write_snapshot(&self, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// One remote copy of the snapshot
#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;
    async fn upload(&self, bytes: Arc<Vec<u8>>) -> Result<()>;
}

/// Puts the snapshot into an S3-compatible bucket as a publicly readable
/// object, signing requests with the target's access key
pub struct S3Uploader {
    name: String,
    bucket: String,
    object_key: String,
    client: aws_sdk_s3::Client,
}

impl S3Uploader {
    pub fn new(target: &UploadTarget) -> Self {
        let credentials = Credentials::new(
            &target.access_key,
            &target.secret_key,
            None,
            None,
            "dataserver-config",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(target.region.clone()))
            .endpoint_url(target.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            name: target.name.clone(),
            bucket: target.bucket.clone(),
            object_key: target.object_key.clone(),
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, bytes: Arc<Vec<u8>>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .content_type("application/json")
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| DataServerError::UploadError(DisplayErrorContext(&e).to_string()))?;
        debug!("Uploaded {} to {}/{}", self.name, self.bucket, self.object_key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Pending,
    Retrying,
}

/// Owns the snapshot channel receiver and all file writes
pub struct SnapshotWriter {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn SnapshotStore>,
    uploaders: Vec<Arc<dyn Uploader>>,
    debounce: Duration,
    retry_delay: Duration,
}

impl SnapshotWriter {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn SnapshotStore>,
        uploaders: Vec<Arc<dyn Uploader>>,
        debounce: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            store,
            uploaders,
            debounce,
            retry_delay,
        }
    }

    /// Runs until every [`SnapshotSignal`] is dropped
    pub async fn run(self, mut snapshots: SnapshotReceiver) {
        let mut state = WriterState::Idle;

        loop {
            state = match state {
                WriterState::Idle => {
                    if snapshots.changed().await.is_err() {
                        break;
                    }
                    if self.persist().await {
                        WriterState::Pending
                    } else {
                        WriterState::Retrying
                    }
                }
                WriterState::Pending => {
                    tokio::time::sleep(self.debounce).await;
                    match snapshots.has_changed() {
                        Ok(true) => {
                            snapshots.mark_unchanged();
                            if self.persist().await {
                                WriterState::Idle
                            } else {
                                WriterState::Retrying
                            }
                        }
                        Ok(false) => WriterState::Idle,
                        Err(_) => {
                            self.persist().await;
                            break;
                        }
                    }
                }
                WriterState::Retrying => {
                    tokio::time::sleep(self.retry_delay).await;
                    snapshots.mark_unchanged();
                    if self.persist().await {
                        WriterState::Idle
                    } else {
                        WriterState::Retrying
                    }
                }
            };
        }

        info!("Snapshot writer stopped");
    }

    /// Reads, serializes and stores the current roster, then starts the
    /// uploads. Returns false if the write failed.
    async fn persist(&self) -> bool {
        let snapshot = self.source.snapshot().await;

        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                return false;
            }
        };

        if let Err(e) = self.store.write_snapshot(&bytes).await {
            warn!(
                "Failed to write snapshot, retrying in {:?}: {}",
                self.retry_delay, e
            );
            return false;
        }
        debug!(
            "Wrote snapshot with {} pilots and {} controllers",
            snapshot.pilots.len(),
            snapshot.controllers.len()
        );

        self.spawn_uploads(bytes);
        true
    }

    fn spawn_uploads(&self, bytes: Arc<Vec<u8>>) {
        for uploader in &self.uploaders {
            let uploader = Arc::clone(uploader);
            let bytes = Arc::clone(&bytes);
            tokio::spawn(async move {
                if let Err(e) = uploader.upload(bytes).await {
                    error!("Upload to {} failed: {}", uploader.name(), e);
                }
            });
        }
    }
}
