//! Bounded credential store keyed by provider.

use std::fmt;

use crate::error::{AtlasError, Result};

/// Default number of providers the store can hold.
pub const DEFAULT_CAPACITY: usize = 16;

/// Username and password for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fixed-capacity provider → credential map.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    capacity: usize,
    entries: Vec<Credential>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CredentialStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Add or update the credential of a provider.
    ///
    /// Updating an existing provider always succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] for an empty provider name and
    /// [`AtlasError::CredentialStoreFull`] when a new provider does not fit.
    pub fn set(&mut self, provider: &str, username: &str, password: &str) -> Result<()> {
        if provider.is_empty() {
            return Err(AtlasError::InvalidParameter("empty provider name".into()));
        }

        if let Some(entry) = self.entries.iter_mut().find(|e| e.provider == provider) {
            entry.username = username.to_string();
            entry.password = password.to_string();
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            return Err(AtlasError::CredentialStoreFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(Credential {
            provider: provider.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    /// Credential of a provider.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::NotFound`] if none is stored.
    pub fn get(&self, provider: &str) -> Result<&Credential> {
        self.find(provider)
            .ok_or_else(|| AtlasError::NotFound(format!("credentials for '{provider}'")))
    }

    pub fn find(&self, provider: &str) -> Option<&Credential> {
        self.entries.iter().find(|e| e.provider == provider)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.find(provider).is_some()
    }

    /// Remove a provider, returning whether it was present.
    pub fn remove(&mut self, provider: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.provider != provider);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }
}
