//! Per-machine state persisted between driver invocations.
//!
//! Each machine gets a directory under the store root holding
//! `machine.json` (server name, resolved id, address, create job) plus the
//! SSH key pair and pinned host keys. The one-time password is never written.

use std::io;
use std::net::Ipv4Addr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MACHINES_DIR: &str = "machines";
const RECORD_FILE_NAME: &str = "machine.json";

/// State remembered about one machine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MachineRecord {
    /// Local machine name.
    pub machine_name: String,
    /// Generated provider server name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Provider server id, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Public IPv4 address scraped from the create job log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<Ipv4Addr>,
    /// Handle of the create job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_job_id: Option<u64>,
}

impl MachineRecord {
    /// Creates an empty record for `machine_name`.
    #[must_use]
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            ..Self::default()
        }
    }
}

/// Errors raised while reading or writing machine records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Raised when the machine name cannot be used as a directory name.
    #[error("invalid machine name `{0}`")]
    InvalidName(String),
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the record cannot be encoded or decoded.
    #[error("invalid machine record {path}: {message}")]
    Format {
        /// Record path.
        path: Utf8PathBuf,
        /// Decoder error message.
        message: String,
    },
}

/// File-backed store of [`MachineRecord`]s.
#[derive(Clone, Debug)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding everything belonging to `machine_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for names that are empty or would
    /// escape the store.
    pub fn machine_dir(&self, machine_name: &str) -> Result<Utf8PathBuf, StoreError> {
        let valid = !machine_name.is_empty()
            && machine_name != "."
            && machine_name != ".."
            && !machine_name.contains(['/', '\\']);
        if !valid {
            return Err(StoreError::InvalidName(machine_name.to_owned()));
        }
        Ok(self.root.join(MACHINES_DIR).join(machine_name))
    }

    /// Loads the record for `machine_name`, or an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record exists but cannot be read or
    /// decoded.
    pub fn load(&self, machine_name: &str) -> Result<MachineRecord, StoreError> {
        let dir_path = self.machine_dir(machine_name)?;
        let record_path = dir_path.join(RECORD_FILE_NAME);
        let dir = match Dir::open_ambient_dir(&dir_path, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(MachineRecord::new(machine_name));
            }
            Err(err) => return Err(io_error(&dir_path, &err)),
        };

        let contents = match dir.read_to_string(RECORD_FILE_NAME) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(MachineRecord::new(machine_name));
            }
            Err(err) => return Err(io_error(&record_path, &err)),
        };

        serde_json::from_str(&contents).map_err(|err| StoreError::Format {
            path: record_path,
            message: err.to_string(),
        })
    }

    /// Writes `record`, creating the machine directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory or file cannot be written.
    pub fn save(&self, record: &MachineRecord) -> Result<Utf8PathBuf, StoreError> {
        let dir_path = self.machine_dir(&record.machine_name)?;
        let record_path = dir_path.join(RECORD_FILE_NAME);
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;

        let rendered =
            serde_json::to_string_pretty(record).map_err(|err| StoreError::Format {
                path: record_path.clone(),
                message: err.to_string(),
            })?;
        dir.write(RECORD_FILE_NAME, rendered)
            .map_err(|err| io_error(&record_path, &err))?;
        Ok(record_path)
    }

    /// Deletes the machine directory. Missing directories are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when removal fails.
    pub fn remove(&self, machine_name: &str) -> Result<(), StoreError> {
        let dir_path = self.machine_dir(machine_name)?;
        let machines_path = self.root.join(MACHINES_DIR);
        let machines = match Dir::open_ambient_dir(&machines_path, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&machines_path, &err)),
        };
        match machines.remove_dir_all(machine_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&dir_path, &err)),
        }
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
