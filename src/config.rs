use crate::batch::pool::MAX_BATCH_REUSE;
use crate::column_family::ColumnFamilyOptions;
use crate::core::{DbError, Result};
use crate::encoding::Encoding;
use crate::substrate::MemorySubstrate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage engine configuration
///
/// Everything here is fixed for the life of a State.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Open without write access; writes fail with `ReadOnly`
    pub read_only: bool,

    /// Column families materialized on first open, besides the default one
    pub column_families: Vec<String>,

    /// Per-family option overrides
    pub column_family_options: HashMap<String, ColumnFamilyOptions>,

    /// Encoding used by the `*_encoded` helpers for keys
    pub key_encoding: Encoding,

    /// Encoding used by the `*_encoded` helpers for values
    pub value_encoding: Encoding,

    /// Pooled batches kept per kind
    pub max_batch_reuse: usize,

    /// Entries fetched per substrate transaction when iterating
    pub iterator_page_size: usize,

    /// Substrate to open against; the process-wide one when unset
    #[serde(skip)]
    pub substrate: Option<MemorySubstrate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            column_families: Vec::new(),
            column_family_options: HashMap::new(),
            key_encoding: Encoding::Binary,
            value_encoding: Encoding::Binary,
            max_batch_reuse: MAX_BATCH_REUSE,
            iterator_page_size: 256,
            substrate: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Add a column family to materialize on open
    pub fn column_family(mut self, name: &str) -> Self {
        if !self.column_families.iter().any(|n| n == name) {
            self.column_families.push(name.to_string());
        }
        self
    }

    /// Add a column family with explicit options
    pub fn column_family_with_options(mut self, name: &str, options: ColumnFamilyOptions) -> Self {
        self.column_family_options.insert(name.to_string(), options);
        self.column_family(name)
    }

    pub fn key_encoding(mut self, encoding: Encoding) -> Self {
        self.key_encoding = encoding;
        self
    }

    pub fn value_encoding(mut self, encoding: Encoding) -> Self {
        self.value_encoding = encoding;
        self
    }

    pub fn max_batch_reuse(mut self, max: usize) -> Self {
        self.max_batch_reuse = max;
        self
    }

    pub fn iterator_page_size(mut self, size: usize) -> Self {
        self.iterator_page_size = size;
        self
    }

    /// Use a specific substrate instead of the process-wide one
    pub fn substrate(mut self, substrate: MemorySubstrate) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Parse from a JSON document. Missing fields take their defaults.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = EngineConfig::from_json(r#"{ "read_only": true }"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(DbError::InvalidArgument)?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.iterator_page_size == 0 {
            return Err("iterator_page_size must be > 0".to_string());
        }

        if self.column_families.iter().any(|name| name.is_empty()) {
            return Err("column family names cannot be empty".to_string());
        }

        if let Some(name) = self
            .column_family_options
            .keys()
            .find(|name| name.is_empty())
        {
            return Err(format!("column family options given for invalid name '{}'", name));
        }

        Ok(())
    }
}
