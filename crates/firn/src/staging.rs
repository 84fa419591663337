//! Local byte accumulation for open files.
//!
//! `BuildLocal` spills each open file to disk under the configured temp
//! directory and uploads in one put on commit. `Streamed` keeps bytes in
//! memory and commits through a multipart upload. Either way, nothing is
//! visible at the target key until commit completes, and a commit failure
//! leaves the stage intact for retry.

use bytes::{Bytes, BytesMut};
use object_store::path::Path as ObjectPath;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use firn_common::{StorageError, StorageProvider};

use crate::error::{CreateDirSnafu, StageError, StageIoSnafu};

/// How open-file bytes are held before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    /// Accumulate in memory, commit via multipart upload.
    #[default]
    Streamed,
    /// Spill to a local file, commit via a single put.
    BuildLocal,
}

/// Factory for stage handles.
#[derive(Debug, Clone)]
pub struct StagingStore {
    mode: WriteMode,
    tmp_dir: PathBuf,
    /// Distinguishes stage files of concurrent tasks sharing a temp dir.
    nonce: u32,
}

impl StagingStore {
    pub fn new(mode: WriteMode, tmp_dir: impl Into<PathBuf>) -> Result<Self, StageError> {
        let tmp_dir = tmp_dir.into();
        if mode == WriteMode::BuildLocal {
            std::fs::create_dir_all(&tmp_dir).context(CreateDirSnafu {
                path: tmp_dir.clone(),
            })?;
        }
        let nonce = std::process::id();
        Ok(Self {
            mode,
            tmp_dir,
            nonce,
        })
    }

    /// Open a stage for one file. The discriminator keys the spill file and
    /// must be unique among open files of this task.
    pub fn open(&self, discriminator: &str) -> Result<StageHandle, StageError> {
        match self.mode {
            WriteMode::Streamed => Ok(StageHandle::Memory {
                buf: BytesMut::new(),
            }),
            WriteMode::BuildLocal => {
                let file_name = format!("{}_{}.stage", self.nonce, sanitize(discriminator));
                let path = self.tmp_dir.join(file_name);
                std::fs::File::create(&path).context(StageIoSnafu { path: path.clone() })?;
                debug!(path = %path.display(), "Opened stage file");
                Ok(StageHandle::Disk { path, written: 0 })
            }
        }
    }

    /// Upload the staged bytes to their final key. The handle survives a
    /// failed upload so the commit can be retried.
    pub async fn commit(
        &self,
        handle: &StageHandle,
        storage: &StorageProvider,
        key: &ObjectPath,
    ) -> Result<u64, StageCommitError> {
        let bytes = match handle {
            StageHandle::Memory { buf } => Bytes::copy_from_slice(buf),
            StageHandle::Disk { path, .. } => {
                let contents = match tokio::fs::read(path).await {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StageCommitError::Stage {
                            source: StageError::StageGone { path: path.clone() },
                        })
                    }
                    Err(source) => {
                        return Err(StageCommitError::Stage {
                            source: StageError::StageIo {
                                path: path.clone(),
                                source,
                            },
                        })
                    }
                };
                Bytes::from(contents)
            }
        };

        let size = bytes.len() as u64;
        let upload = match self.mode {
            WriteMode::Streamed => storage.put_multipart_bytes(key, bytes).await,
            WriteMode::BuildLocal => storage.put_payload(key, bytes.into()).await,
        };
        upload.map_err(|source| StageCommitError::Storage { source })?;

        Ok(size)
    }

    /// Release local resources after a successful commit or on discard.
    pub fn reclaim(&self, handle: StageHandle) {
        if let StageHandle::Disk { path, .. } = handle {
            if let Err(error) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), %error, "Stage file already gone");
            }
        }
    }
}

/// Byte accumulation for one open file, exclusively owned by it.
#[derive(Debug)]
pub enum StageHandle {
    Memory { buf: BytesMut },
    Disk { path: PathBuf, written: u64 },
}

impl StageHandle {
    /// Append a chunk of encoded bytes.
    ///
    /// Disk stages reopen the spill file on every append, so a file removed
    /// behind the sink's back surfaces as `StageGone` instead of silently
    /// recreating a truncated stage.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), StageError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self {
            StageHandle::Memory { buf } => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            StageHandle::Disk { path, written } => {
                let mut file = match std::fs::OpenOptions::new().append(true).open(&*path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StageError::StageGone { path: path.clone() })
                    }
                    Err(source) => {
                        return Err(StageError::StageIo {
                            path: path.clone(),
                            source,
                        })
                    }
                };
                file.write_all(chunk).context(StageIoSnafu {
                    path: path.clone(),
                })?;
                *written += chunk.len() as u64;
                Ok(())
            }
        }
    }

    /// Bytes staged so far.
    pub fn len(&self) -> u64 {
        match self {
            StageHandle::Memory { buf } => buf.len() as u64,
            StageHandle::Disk { written, .. } => *written,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A commit failure is either local (stage) or remote (store); the caller
/// classifies them differently.
#[derive(Debug, Snafu)]
pub enum StageCommitError {
    #[snafu(display("{source}"))]
    Stage { source: StageError },
    #[snafu(display("{source}"))]
    Storage { source: StorageError },
}

fn sanitize(discriminator: &str) -> String {
    discriminator
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
