//! Platform services: wall clock and optional persistence.
//!
//! The engine asks its [`Platform`] for the current time and hands it
//! failure states and credentials to persist. Every persistence hook has a
//! no-op default, in which case state lives in memory only.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::backoff::{FailureState, RECORD_LEN};
use crate::catalog::ServiceId;
use crate::error::{AtlasError, Result};

/// Clock and persistence hooks supplied by the host.
pub trait Platform {
    /// Seconds since the Unix epoch.
    fn now_seconds(&self) -> u64;

    /// Persist the failure state of one service. Clear states may be
    /// dropped from storage.
    fn store_failure(&mut self, _state: &FailureState) -> Result<()> {
        Ok(())
    }

    /// Load every persisted failure state in one pass.
    fn load_failures(&self) -> Result<Vec<FailureState>> {
        Ok(Vec::new())
    }

    /// Load the persisted failure state of one service.
    fn load_failure(&self, service: ServiceId) -> Result<Option<FailureState>> {
        Ok(self.load_failures()?.into_iter().find(|s| s.service == service))
    }

    /// Persist an opaque credential value under a key.
    fn store_credential(&mut self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    /// Load a credential value stored under a key.
    fn load_credential(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

impl<P: Platform + ?Sized> Platform for Box<P> {
    fn now_seconds(&self) -> u64 {
        (**self).now_seconds()
    }

    fn store_failure(&mut self, state: &FailureState) -> Result<()> {
        (**self).store_failure(state)
    }

    fn load_failures(&self) -> Result<Vec<FailureState>> {
        (**self).load_failures()
    }

    fn load_failure(&self, service: ServiceId) -> Result<Option<FailureState>> {
        (**self).load_failure(service)
    }

    fn store_credential(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).store_credential(key, value)
    }

    fn load_credential(&self, key: &str) -> Result<Option<String>> {
        (**self).load_credential(key)
    }
}

/// System clock, no persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn now_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// In-memory platform with a manually driven clock.
///
/// Useful for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    now: u64,
    failures: HashMap<ServiceId, FailureState>,
    credentials: HashMap<String, String>,
}

impl MemoryPlatform {
    pub fn new(now_seconds: u64) -> Self {
        Self {
            now: now_seconds,
            ..Default::default()
        }
    }

    pub fn set_now(&mut self, now_seconds: u64) {
        self.now = now_seconds;
    }

    pub fn advance(&mut self, seconds: u64) {
        self.now += seconds;
    }

    /// Failure states currently persisted.
    pub fn stored_failures(&self) -> usize {
        self.failures.len()
    }
}

impl Platform for MemoryPlatform {
    fn now_seconds(&self) -> u64 {
        self.now
    }

    fn store_failure(&mut self, state: &FailureState) -> Result<()> {
        if state.is_clear() {
            self.failures.remove(&state.service);
        } else {
            self.failures.insert(state.service, *state);
        }
        Ok(())
    }

    fn load_failures(&self) -> Result<Vec<FailureState>> {
        let mut states: Vec<FailureState> = self.failures.values().copied().collect();
        states.sort_by_key(|s| s.service);
        Ok(states)
    }

    fn load_failure(&self, service: ServiceId) -> Result<Option<FailureState>> {
        Ok(self.failures.get(&service).copied())
    }

    fn store_credential(&mut self, key: &str, value: &str) -> Result<()> {
        self.credentials.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load_credential(&self, key: &str) -> Result<Option<String>> {
        Ok(self.credentials.get(key).cloned())
    }
}

const FAILURES_FILE: &str = "failures.bin";
const CREDENTIALS_FILE: &str = "credentials";

/// Directory-backed platform using the system clock.
///
/// Failure states are kept as packed seven-byte records in `failures.bin`;
/// credentials as `key=value` lines in `credentials`.
#[derive(Debug, Clone)]
pub struct FilePlatform {
    dir: PathBuf,
}

fn platform_err(action: &str, path: &Path, e: std::io::Error) -> AtlasError {
    AtlasError::Platform(format!("{action} {}: {e}", path.display()))
}

impl FilePlatform {
    /// Use `dir` for storage, creating it if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| platform_err("creating", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(platform_err("reading", &path, e)),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, bytes).map_err(|e| platform_err("writing", &path, e))
    }

    fn failures(&self) -> Result<Vec<FailureState>> {
        let Some(bytes) = self.read_optional(FAILURES_FILE)? else {
            return Ok(Vec::new());
        };
        if bytes.len() % RECORD_LEN != 0 {
            return Err(AtlasError::Platform(format!(
                "{FAILURES_FILE} has {} bytes, not a multiple of {RECORD_LEN}",
                bytes.len()
            )));
        }
        bytes.chunks_exact(RECORD_LEN).map(FailureState::decode).collect()
    }

    fn credentials(&self) -> Result<Vec<(String, String)>> {
        let Some(bytes) = self.read_optional(CREDENTIALS_FILE)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| AtlasError::Platform(format!("{CREDENTIALS_FILE} is not UTF-8")))?;
        Ok(text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }
}

impl Platform for FilePlatform {
    fn now_seconds(&self) -> u64 {
        SystemPlatform.now_seconds()
    }

    fn store_failure(&mut self, state: &FailureState) -> Result<()> {
        let mut states = self.failures()?;
        states.retain(|s| s.service != state.service);
        if !state.is_clear() {
            states.push(*state);
        }
        let bytes: Vec<u8> = states.iter().flat_map(|s| s.encode()).collect();
        self.write(FAILURES_FILE, &bytes)
    }

    fn load_failures(&self) -> Result<Vec<FailureState>> {
        self.failures()
    }

    fn store_credential(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || key.contains(['=', '\n']) || value.contains('\n') {
            return Err(AtlasError::InvalidParameter(format!(
                "credential key '{key}' cannot be stored"
            )));
        }
        let mut entries = self.credentials()?;
        entries.retain(|(k, _)| k != key);
        entries.push((key.to_string(), value.to_string()));

        let text: String = entries.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
        self.write(CREDENTIALS_FILE, text.as_bytes())
    }

    fn load_credential(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .credentials()?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v))
    }
}
