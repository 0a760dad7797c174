//! Settings and connection-point documents shared with the browser.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::error::GatewayError;
use crate::sink::file::write_atomic;

/// A JSON document the browser reads and overwrites as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `settings.json`.
    Settings,
    /// `connectionpoints.json`.
    ConnectionPoints,
}

impl ResourceKind {
    /// File name inside the resources directory.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Settings => "settings.json",
            Self::ConnectionPoints => "connectionpoints.json",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings => f.write_str("settings"),
            Self::ConnectionPoints => f.write_str("connectionpoints"),
        }
    }
}

/// Directory holding the resource documents.
#[derive(Debug, Clone)]
pub struct ResourceStore {
    dir: PathBuf,
}

impl ResourceStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the `kind` document.
    #[must_use]
    pub fn path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Reads and parses the `kind` document.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Io`] if the file cannot be read.
    /// - [`GatewayError::Json`] if it is not valid JSON.
    pub async fn load(&self, kind: ResourceKind) -> Result<Json, GatewayError> {
        let bytes = tokio::fs::read(self.path(kind)).await.inspect_err(|e| {
            tracing::error!(resource = %kind, error = %e, "error reading resource");
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replaces the `kind` document with `document`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Json`] if encoding fails.
    /// - [`GatewayError::Io`] if the write fails; the previous document is
    ///   left in place.
    pub async fn store(&self, kind: ResourceKind, document: &Json) -> Result<(), GatewayError> {
        let bytes = serde_json::to_vec(document)?;
        write_atomic(&self.path(kind), &bytes).await.inspect_err(|e| {
            tracing::error!(resource = %kind, error = %e, "error writing resource");
        })?;
        tracing::debug!(resource = %kind, "resource stored");
        Ok(())
    }
}
