//! Schema registry access for kafka-reconcile.
//!
//! Two ways to read registry state:
//!
//! - [`RestRegistry`] issues REST calls, one or more per subject
//! - [`SchemaRegistryCache`] rebuilds the state by reading the registry's
//!   compacted change-log topic once, from the earliest offset up to the
//!   end offset captured when the bootstrap starts
//!
//! Both implement [`RegistryReader`]; writes always go through
//! [`RegistryWriter`], which only the REST client implements.

pub mod cache;
pub mod client;
pub mod error;
pub mod source;
pub mod wire;

pub use cache::{CacheState, SchemaRegistryCache, DEFAULT_REGISTRY_TOPIC};
pub use client::RestRegistry;
pub use error::{Error, Result};
pub use source::{RegisteredSchema, RegistryReader, RegistryWriter};
pub use wire::{ConfigValue, KeyType, RegistryKey, SchemaValue};
