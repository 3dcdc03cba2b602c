//! Dataset persistence.
//!
//! Layout: a single file holding a JSON envelope
//! `{ format, version, checksum, dataset }`. The checksum is the BLAKE3 hash
//! of the serialized dataset and is verified on every extract.
//!
//! Writes go to a `.tmp` sibling opened with `create_new` and are renamed
//! into place. A second writer racing on the same path fails with
//! [`StorageError::Busy`] instead of interleaving bytes.

use crate::domain::{Dataset, DatasetError};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Envelope tag identifying the transparent format.
pub const TRANSPARENT_FORMAT: &str = "marketflow-transparent";
/// Current envelope version.
pub const TRANSPARENT_VERSION: u32 = 1;
/// Extension used for datasets stored in a directory.
pub const DATASET_EXTENSION: &str = "dat";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot store a dataset at {0}")]
    Unsupported(PathBuf),

    #[error("another writer is storing to {0}")]
    Busy(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a dataset file: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode dataset: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{path} holds format '{found}' version {version}, expected '{TRANSPARENT_FORMAT}' version {TRANSPARENT_VERSION}")]
    WrongFormat {
        path: PathBuf,
        found: String,
        version: u32,
    },

    #[error("checksum mismatch in {path}: stored {stored}, computed {computed}")]
    ChecksumMismatch {
        path: PathBuf,
        stored: String,
        computed: String,
    },

    #[error("inconsistent dataset at {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },
}

/// A way of persisting datasets.
pub trait StorageFormat: Send + Sync {
    fn can_store_to(&self, path: &Path) -> bool;

    fn store(&self, dataset: &Dataset, path: &Path) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing has been stored at `path` yet.
    fn extract(&self, path: &Path) -> Result<Option<Dataset>, StorageError>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    checksum: String,
    dataset: &'a serde_json::value::RawValue,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    format: String,
    version: u32,
    checksum: String,
    #[serde(borrow)]
    dataset: &'a serde_json::value::RawValue,
}

/// Human-readable JSON storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransparentFormat;

impl TransparentFormat {
    pub fn new() -> Self {
        Self
    }

    /// File that actually holds the data for `path`.
    ///
    /// A directory stores into `<dir>/<dirname>.dat`.
    pub fn data_file(&self, path: &Path) -> PathBuf {
        if path.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string());
            path.join(format!("{name}.{DATASET_EXTENSION}"))
        } else {
            path.to_path_buf()
        }
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn storable_extension(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        None => true,
        Some(ext) => ext.eq_ignore_ascii_case(DATASET_EXTENSION) || ext.eq_ignore_ascii_case("bin"),
    }
}

impl StorageFormat for TransparentFormat {
    fn can_store_to(&self, path: &Path) -> bool {
        if path.is_dir() {
            return true;
        }
        if path.exists() && !path.is_file() {
            return false;
        }
        storable_extension(path)
    }

    fn store(&self, dataset: &Dataset, path: &Path) -> Result<(), StorageError> {
        if !self.can_store_to(path) {
            return Err(StorageError::Unsupported(path.to_path_buf()));
        }
        let target = self.data_file(path);
        dataset.validate().map_err(|source| StorageError::Invalid {
            path: target.clone(),
            source,
        })?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(Self::io(parent))?;
        }

        let body = serde_json::value::to_raw_value(dataset).map_err(StorageError::Encode)?;
        let envelope = EnvelopeRef {
            format: TRANSPARENT_FORMAT,
            version: TRANSPARENT_VERSION,
            checksum: checksum(body.get().as_bytes()),
            dataset: &body,
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(StorageError::Encode)?;

        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&tmp_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Busy(target));
            }
            Err(e) => return Err(Self::io(&tmp_path)(e)),
        };

        let written = file
            .write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(Self::io(&tmp_path));
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &target).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::Io {
                path: target.clone(),
                source,
            }
        })
    }

    fn extract(&self, path: &Path) -> Result<Option<Dataset>, StorageError> {
        let target = self.data_file(path);
        let bytes = match fs::read(&target) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io(&target)(e)),
        };

        let decode = |source| StorageError::Decode {
            path: target.clone(),
            source,
        };
        let envelope: Envelope<'_> = serde_json::from_slice(&bytes).map_err(decode)?;
        if envelope.format != TRANSPARENT_FORMAT || envelope.version != TRANSPARENT_VERSION {
            return Err(StorageError::WrongFormat {
                path: target,
                found: envelope.format,
                version: envelope.version,
            });
        }

        let computed = checksum(envelope.dataset.get().as_bytes());
        if computed != envelope.checksum {
            return Err(StorageError::ChecksumMismatch {
                path: target,
                stored: envelope.checksum,
                computed,
            });
        }

        let dataset: Dataset = serde_json::from_str(envelope.dataset.get()).map_err(decode)?;
        dataset.validate().map_err(|source| StorageError::Invalid {
            path: target.clone(),
            source,
        })?;
        Ok(Some(dataset))
    }
}
