//! Read and write seams over registry state.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A schema as registered under a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub id: i32,
    pub version: i32,
}

/// Read access to registry state.
///
/// Absence is `Ok(None)` (or an empty list), never an error.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// Find `schema` among the versions of `subject`.
    async fn lookup(
        &self,
        subject: &str,
        schema: &str,
        schema_type: &str,
    ) -> Result<Option<RegisteredSchema>>;

    /// Known versions of `subject`, ascending.
    async fn versions(&self, subject: &str) -> Result<Vec<i32>>;

    /// Per-subject compatibility override.
    async fn compatibility(&self, subject: &str) -> Result<Option<String>>;

    /// Registry-wide default compatibility.
    async fn global_compatibility(&self) -> Result<Option<String>>;
}

/// Write access to the registry.
#[async_trait]
pub trait RegistryWriter: Send + Sync {
    async fn register(
        &self,
        subject: &str,
        schema: &str,
        schema_type: &str,
    ) -> Result<RegisteredSchema>;

    async fn set_compatibility(&self, subject: &str, level: &str) -> Result<()>;
}
