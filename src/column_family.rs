//! Column families.
//!
//! A column family is a named key space mapped one-to-one onto an object
//! store of the same name. The tuning options below mirror the emulated
//! engine's column-family options so callers can pass the same settings;
//! the substrate accepts them but none of them change its behaviour.

use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Filter policy of the emulated engine. Accepted, never built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterPolicy {
    None,
    Bloom { bits_per_key: f64 },
    Ribbon { bloom_equivalent_bits_per_key: f64, bloom_before_level: i32 },
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::Bloom { bits_per_key: 10.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnFamilyOptions {
    pub enable_blob_files: bool,
    pub min_blob_size: u64,
    pub blob_file_size: u64,
    pub enable_blob_garbage_collection: bool,
    pub table_block_size: u64,
    pub table_cache_index_and_filter_blocks: bool,
    pub table_format_version: u32,
    pub optimize_filters_for_memory: bool,
    pub block_cache: bool,
    pub filter_policy: FilterPolicy,
    /// Substrate-specific: in-line key path of the object store
    pub key_path: Option<String>,
    /// Substrate-specific: key generator of the object store
    pub auto_increment: bool,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            enable_blob_files: false,
            min_blob_size: 0,
            blob_file_size: 0,
            enable_blob_garbage_collection: true,
            table_block_size: 16384,
            table_cache_index_and_filter_blocks: true,
            table_format_version: 6,
            optimize_filters_for_memory: false,
            block_cache: true,
            filter_policy: FilterPolicy::default(),
            key_path: None,
            auto_increment: false,
        }
    }
}

impl ColumnFamilyOptions {
    /// Defaults merged with the fields present in `overrides` (a JSON object)
    pub fn with_overrides(overrides: &serde_json::Value) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        let fields = overrides.as_object().ok_or_else(|| {
            DbError::InvalidArgument("column family overrides must be a JSON object".into())
        })?;
        if let Some(target) = merged.as_object_mut() {
            for (name, value) in fields {
                if !target.contains_key(name) {
                    return Err(DbError::InvalidArgument(format!(
                        "unknown column family option '{}'",
                        name
                    )));
                }
                target.insert(name.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }
}

/// Handle descriptor used for substrate calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFamily {
    name: String,
    descriptor: StoreDescriptor,
    options: ColumnFamilyOptions,
}

impl ColumnFamily {
    pub fn new(name: &str) -> Self {
        Self::with_options(name, ColumnFamilyOptions::default())
    }

    pub fn with_options(name: &str, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.to_string(),
            descriptor: StoreDescriptor {
                store_name: name.to_string(),
            },
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backing object store
    pub fn store_name(&self) -> &str {
        &self.descriptor.store_name
    }

    pub fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &ColumnFamilyOptions {
        &self.options
    }

    /// Relabel this family; later substrate calls target the new store name
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.descriptor.store_name = name.to_string();
    }

    /// Fresh family named `name` carrying a copy of these options
    pub fn clone_settings(&self, name: &str) -> ColumnFamily {
        ColumnFamily::with_options(name, self.options.clone())
    }
}
