//! The shared escalation credential
//!
//! One [`Credentials`] value is shared by every channel of every invocation.
//! It caches the password after the first successful [`get`](Credentials::get)
//! and forgets it on [`invalidate`](Credentials::invalidate), so the next read
//! goes back to the [`CredentialSource`] for a fresh value.

use crate::core::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;

/// Where a password comes from when none is cached
pub trait CredentialSource: Send + Sync {
    fn obtain(&self) -> Result<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn obtain(&self) -> Result<String> {
        self()
    }
}

/// A fixed password
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl CredentialSource for StaticCredential {
    fn obtain(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the password from an environment variable on every obtain
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvCredential {
    fn obtain(&self) -> Result<String> {
        std::env::var(&self.var)
            .map_err(|e| Error::credential(format!("{}: {}", self.var, e)))
    }
}

/// Cached credential backed by a [`CredentialSource`]
pub struct Credentials {
    source: Box<dyn CredentialSource>,
    // held across `obtain` so concurrent readers wait for one fresh value
    cached: Mutex<Option<String>>,
}

impl Credentials {
    pub fn new(source: impl CredentialSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    /// Return the cached password, obtaining it first if necessary
    pub fn get(&self) -> Result<String> {
        let mut cached = self.cached.lock();
        if let Some(secret) = cached.as_ref() {
            return Ok(secret.clone());
        }

        let secret = self.source.obtain()?;
        *cached = Some(secret.clone());
        Ok(secret)
    }

    /// Forget the cached password
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }

    pub fn is_cached(&self) -> bool {
        self.cached.lock().is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cached", &self.is_cached())
            .finish_non_exhaustive()
    }
}
