//! src/services/storage_service.rs
//!
//! StorageService: content-addressed object storage on local disk. Every
//! object is named by the SHA-256 of its bytes and lives at
//! `root/{id[0:2]}/{id[2:4]}/{id}.bin`, with a `{id}.meta` sidecar beside it.
//!
//! There is no locking. Writes go to a temp file inside the root and are
//! renamed onto the canonical path, so a reader sees either nothing or the
//! complete object, and two writers of the same bytes produce the same file.

use crate::{
    digest::{self, CHUNK_SIZE},
    models::{file::FileMetadata, wire::OCTET_STREAM},
    services::{
        disk::{DiskSpace, SystemDiskSpace},
        sidecar::Sidecar,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    fmt,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter, Take},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shortest accepted id: the two fan-out levels need four hex characters.
const MIN_ID_LEN: usize = 4;

/// Times `commit` recreates a missing shard directory before giving up.
const COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file_id")]
    InvalidId,
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("invalid range")]
    InvalidRange,
    #[error("unsatisfiable range")]
    Unsatisfiable,
    #[error("file too large (limit {limit} bytes)")]
    TooLarge { limit: u64 },
    #[error("insufficient free space: {available} bytes available, {required} required")]
    InsufficientStorage { available: u64, required: u64 },
    #[error("upload stream failed: {0}")]
    Stream(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A resolved byte window over one object, read lazily from disk.
pub struct RangeRead {
    /// Chunks covering exactly `start..=last`.
    pub body: ReaderStream<Take<File>>,
    pub start: u64,
    pub last: u64,
    /// Size of the whole object.
    pub size: u64,
}

impl RangeRead {
    /// Number of bytes in the window.
    pub fn content_length(&self) -> u64 {
        self.last - self.start + 1
    }
}

impl fmt::Debug for RangeRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeRead")
            .field("start", &self.start)
            .field("last", &self.last)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// StorageService provides the blob operations behind the HTTP surface:
/// - save a stream under its content hash
/// - head/size an object, preferring sidecar metadata
/// - open a byte range for streaming
/// - delete blob and sidecar
#[derive(Clone)]
pub struct StorageService {
    /// Root directory holding the fan-out tree.
    root: PathBuf,

    /// Uploads are refused while the volume has less than this free.
    min_free_bytes: u64,

    /// Largest accepted upload; 0 means unlimited.
    max_file_bytes: u64,

    disk: Arc<dyn DiskSpace>,
}

impl fmt::Debug for StorageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageService")
            .field("root", &self.root)
            .field("min_free_bytes", &self.min_free_bytes)
            .field("max_file_bytes", &self.max_file_bytes)
            .finish_non_exhaustive()
    }
}

/// Removes the wrapped path on drop unless it was committed.
///
/// Covers early returns, I/O errors and futures dropped mid-upload.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    debug!("failed to remove temp file {}: {}", self.path.display(), err);
                }
            }
        }
    }
}

impl StorageService {
    /// Create a StorageService rooted at `root` with no free-space floor and
    /// no upload limit.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_free_bytes: 0,
            max_file_bytes: 0,
            disk: Arc::new(SystemDiskSpace),
        }
    }

    pub fn with_min_free_bytes(mut self, min_free_bytes: u64) -> Self {
        self.min_free_bytes = min_free_bytes;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Replace the free-space source.
    pub fn with_disk_space(mut self, disk: Arc<dyn DiskSpace>) -> Self {
        self.disk = disk;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// Two-level fan-out directory for an id.
    fn shard_dir(&self, id: &str) -> PathBuf {
        self.root.join(&id[0..2]).join(&id[2..4])
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{}.bin", id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{}.meta", id))
    }

    /// Free bytes on the storage volume.
    pub async fn available_bytes(&self) -> io::Result<u64> {
        let disk = self.disk.clone();
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || disk.available_bytes(&root))
            .await
            .map_err(io::Error::other)?
    }

    /// True if the root exists (or can be created) and accepts a new file.
    pub async fn is_writable(&self) -> bool {
        if let Err(err) = fs::create_dir_all(&self.root).await {
            debug!("cannot create storage root {}: {}", self.root.display(), err);
            return false;
        }
        let probe = TempPath::new(self.root.join(format!(".probe-{}", Uuid::new_v4())));
        match fs::write(probe.path(), b"probe").await {
            Ok(()) => true,
            Err(err) => {
                debug!("storage root {} not writable: {}", self.root.display(), err);
                false
            }
        }
    }

    /// Refuse writes when the volume is below the configured floor.
    ///
    /// A volume whose free space cannot be read is not treated as full.
    async fn ensure_free_space(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        if self.min_free_bytes == 0 {
            return Ok(());
        }
        match self.available_bytes().await {
            Ok(available) if available < self.min_free_bytes => {
                Err(StorageError::InsufficientStorage {
                    available,
                    required: self.min_free_bytes,
                })
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(
                    "could not determine free space for {}: {}",
                    self.root.display(),
                    err
                );
                Ok(())
            }
        }
    }

    /// Stream an upload to disk and commit it under its SHA-256.
    ///
    /// - Checks the free-space floor before writing anything.
    /// - Writes through a `CHUNK_SIZE` buffer into a temp file in the root,
    ///   hashing and counting as it goes, and aborts once `max_file_bytes` is
    ///   exceeded.
    /// - fsyncs and renames onto the canonical path.
    /// - Writes the sidecar the same way; a sidecar failure is logged only,
    ///   since the blob's identity is its hash.
    pub async fn save<S>(&self, stream: S, content_type: &str) -> StorageResult<FileMetadata>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.ensure_free_space().await?;

        let tmp = TempPath::new(self.root.join(format!(".upload-{}", Uuid::new_v4())));
        let file = File::create(tmp.path()).await?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut size_bytes: u64 = 0;
        let mut hasher = Sha256::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(StorageError::Stream)?;
            size_bytes += chunk.len() as u64;
            if self.max_file_bytes > 0 && size_bytes > self.max_file_bytes {
                return Err(StorageError::TooLarge {
                    limit: self.max_file_bytes,
                });
            }
            hasher.update(&chunk);
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);

        let file_id = hex::encode(hasher.finalize());
        self.commit(tmp, &file_id).await?;

        let created_at = Utc::now();
        if let Err(err) = self.write_sidecar(&file_id, content_type, created_at).await {
            warn!("failed to write sidecar for {}: {}", file_id, err);
        }

        info!(file_id = %file_id, size_bytes, content_type, "stored object");

        Ok(FileMetadata {
            sha256: file_id.clone(),
            file_id,
            size_bytes,
            content_type: content_type.to_string(),
            created_at: Some(created_at),
        })
    }

    /// Rename a finished temp file onto the canonical blob path.
    async fn commit(&self, tmp: TempPath, file_id: &str) -> StorageResult<()> {
        let target = self.blob_path(file_id);
        let mut attempts = 0;
        loop {
            match fs::rename(tmp.path(), &target).await {
                Ok(()) => {
                    tmp.disarm();
                    return Ok(());
                }
                // Same id means same bytes: the existing file is already correct.
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!("object {} already present, discarding upload copy", file_id);
                    return Ok(());
                }
                // The shard directory is new, or a concurrent delete pruned it.
                Err(err) if err.kind() == ErrorKind::NotFound && attempts < COMMIT_ATTEMPTS => {
                    attempts += 1;
                    if let Err(err) = fs::create_dir_all(self.shard_dir(file_id)).await {
                        if err.kind() != ErrorKind::NotFound {
                            return Err(StorageError::Io(err));
                        }
                    }
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
    }

    async fn write_sidecar(
        &self,
        file_id: &str,
        content_type: &str,
        created_at: DateTime<Utc>,
    ) -> io::Result<()> {
        let tmp = TempPath::new(
            self.shard_dir(file_id)
                .join(format!(".meta-{}", Uuid::new_v4())),
        );
        let body = Sidecar::new(file_id, content_type, created_at).render();
        let mut file = File::create(tmp.path()).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(tmp.path(), self.meta_path(file_id)).await?;
        tmp.disarm();
        Ok(())
    }

    /// Best-effort sidecar read; anything unreadable counts as absent.
    async fn read_sidecar(&self, id: &str) -> Sidecar {
        match fs::read(self.meta_path(id)).await {
            Ok(raw) => Sidecar::parse(&String::from_utf8_lossy(&raw)),
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("unreadable sidecar for {}: {}", id, err);
                }
                Sidecar::default()
            }
        }
    }

    /// Metadata for an object.
    ///
    /// Uses sidecar fields when they are well formed; otherwise rehashes the
    /// blob and reports `application/octet-stream`.
    pub async fn head(&self, file_id: &str) -> StorageResult<FileMetadata> {
        let id = normalize_id(file_id)?;
        let size_bytes = self.blob_size(&id).await?;
        let sidecar = self.read_sidecar(&id).await;

        let sha256 = match sidecar.sha256 {
            Some(sha) => sha,
            None => {
                debug!("sidecar digest missing for {}, rehashing", id);
                digest::sha256_file(&self.blob_path(&id))
                    .await
                    .map_err(|err| not_found_or_io(err, &id))?
            }
        };

        Ok(FileMetadata {
            file_id: id,
            size_bytes,
            sha256,
            content_type: sidecar
                .content_type
                .unwrap_or_else(|| OCTET_STREAM.to_string()),
            created_at: sidecar.created_at,
        })
    }

    /// Size of an object in bytes.
    pub async fn size(&self, file_id: &str) -> StorageResult<u64> {
        let id = normalize_id(file_id)?;
        self.blob_size(&id).await
    }

    async fn blob_size(&self, id: &str) -> StorageResult<u64> {
        match fs::metadata(self.blob_path(id)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::NotFound(id.to_string())),
            Err(err) => Err(not_found_or_io(err, id)),
        }
    }

    /// Open `start..=end` of an object for streaming.
    ///
    /// An open or oversized `end` is clamped to the last byte. `end < start`
    /// is invalid; a `start` past the last byte (or any range over an empty
    /// object) is unsatisfiable.
    pub async fn open_range(
        &self,
        file_id: &str,
        start: u64,
        end: Option<u64>,
    ) -> StorageResult<RangeRead> {
        let id = normalize_id(file_id)?;
        let mut file = File::open(self.blob_path(&id))
            .await
            .map_err(|err| not_found_or_io(err, &id))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(id));
        }
        let size = meta.len();

        if matches!(end, Some(end) if end < start) {
            return Err(StorageError::InvalidRange);
        }
        if size == 0 {
            return Err(StorageError::Unsatisfiable);
        }
        let last = end.map_or(size - 1, |end| end.min(size - 1));
        if start > last {
            return Err(StorageError::Unsatisfiable);
        }

        file.seek(SeekFrom::Start(start)).await?;
        let body = ReaderStream::with_capacity(file.take(last - start + 1), CHUNK_SIZE);

        Ok(RangeRead {
            body,
            start,
            last,
            size,
        })
    }

    /// Remove an object's blob and sidecar.
    ///
    /// Returns true if either existed, so repeated deletes are harmless.
    pub async fn delete(&self, file_id: &str) -> StorageResult<bool> {
        let id = normalize_id(file_id)?;
        let blob = remove_if_present(&self.blob_path(&id)).await?;
        let meta = remove_if_present(&self.meta_path(&id)).await?;
        if blob || meta {
            debug!(file_id = %id, blob, meta, "deleted object");
            self.prune_shard(&id).await;
        }
        Ok(blob || meta)
    }

    /// Remove the two fan-out directories of an id if they are now empty.
    async fn prune_shard(&self, id: &str) {
        let outer = self.root.join(&id[0..2]);
        let inner = outer.join(&id[2..4]);
        for dir in [inner, outer] {
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
        }
    }
}

/// Trim, lowercase and check that an id is hex and long enough to shard.
pub fn normalize_id(file_id: &str) -> StorageResult<String> {
    let id = file_id.trim().to_ascii_lowercase();
    if id.len() < MIN_ID_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StorageError::InvalidId);
    }
    Ok(id)
}

fn not_found_or_io(err: io::Error, id: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(id.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Unlink a file. A missing path, or a directory where a file belongs,
/// counts as absent.
async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => match fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                debug!("not removing directory {}", path.display());
                Ok(false)
            }
            _ => Err(err),
        },
    }
}
