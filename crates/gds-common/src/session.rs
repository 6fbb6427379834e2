//! Session identity supplied to the archive at start.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// One half of a dual telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Flight software.
    #[default]
    Fsw,
    /// Simulation and support equipment.
    Sse,
}

impl Domain {
    /// Marker placed between table name and process id in bulk-load file names.
    pub fn file_marker(&self) -> &'static str {
        match self {
            Domain::Fsw => "_FSW_",
            Domain::Sse => "_SSE_",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Fsw => write!(f, "fsw"),
            Domain::Sse => write!(f, "sse"),
        }
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fsw" | "flight" => Ok(Domain::Fsw),
            "sse" | "gse" => Ok(Domain::Sse),
            _ => Err(format!("unknown domain: {}", s)),
        }
    }
}

/// Read-only context describing the run being archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSession {
    /// Session number; `None` or zero asks the backend to allocate one.
    pub number: Option<u64>,
    /// Fragment within the session.
    pub fragment: u32,
    /// Numeric host id used in bulk-load file names.
    pub host_id: u32,
    /// Host name recorded in the Host table.
    pub host_name: String,
    /// Process id used in bulk-load file names.
    pub pid: u32,
    /// Which telemetry half this process represents.
    pub domain: Domain,
    /// Root directory for this run's output.
    pub output_dir: PathBuf,
}

impl ArchiveSession {
    /// Session for the current process on the current host.
    pub fn new(domain: Domain, output_dir: impl Into<PathBuf>) -> Self {
        let host_name = detect_host_name();
        ArchiveSession {
            number: None,
            fragment: 1,
            host_id: derive_host_id(&host_name),
            host_name,
            pid: std::process::id(),
            domain,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_fragment(mut self, fragment: u32) -> Self {
        self.fragment = fragment;
        self
    }

    pub fn with_host(mut self, host_name: impl Into<String>, host_id: u32) -> Self {
        self.host_name = host_name.into();
        self.host_id = host_id;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Whether the backend must allocate a new session number.
    pub fn needs_new_session(&self) -> bool {
        self.number.map_or(true, |n| n < 1)
    }

    /// Check the identity fields the archive depends on.
    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(Error::InvalidSession("host name is empty".to_string()));
        }
        if self.host_id == 0 {
            return Err(Error::InvalidSession(format!(
                "host id for {} is zero",
                self.host_name
            )));
        }
        if self.fragment == 0 {
            return Err(Error::InvalidSession("fragment must start at 1".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::InvalidSession(
                "output directory is not set".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for ArchiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.number {
            Some(n) => write!(f, "{}/{}@{}", n, self.fragment, self.host_name),
            None => write!(f, "new/{}@{}", self.fragment, self.host_name),
        }
    }
}

/// Best-effort host name for the current machine.
pub fn detect_host_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "localhost".to_string()
}

/// Stable non-zero numeric id derived from a host name.
pub fn derive_host_id(host_name: &str) -> u32 {
    let digest = Sha256::digest(host_name.as_bytes());
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff;
    id.max(1)
}
