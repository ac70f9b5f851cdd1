use crate::core::{OrmError, Result};
use serde::{Deserialize, Serialize};

/// Settings of one [`Context`](super::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Name of the domain model the context serves.
    pub domain_name: String,

    /// Connection string handed to data mapper factories.
    pub data_source: Option<String>,

    /// Initial capacity of the identity map.
    pub identity_map_capacity: usize,

    /// Deepest nesting of lists and embedded entities the codec accepts.
    pub max_nesting_depth: usize,

    /// Longest string, byte array or list the decoder accepts.
    pub max_collection_len: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            domain_name: "default".to_string(),
            data_source: None,
            identity_map_capacity: 1024,
            max_nesting_depth: 32,
            max_collection_len: 16 * 1024 * 1024,
        }
    }
}

impl ContextConfig {
    pub fn new(domain_name: &str) -> Self {
        Self {
            domain_name: domain_name.to_string(),
            ..Self::default()
        }
    }

    /// Set the data source
    pub fn data_source(mut self, data_source: &str) -> Self {
        self.data_source = Some(data_source.to_string());
        self
    }

    /// Set the initial identity map capacity
    pub fn identity_map_capacity(mut self, capacity: usize) -> Self {
        self.identity_map_capacity = capacity;
        self
    }

    /// Set the codec nesting limit
    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Set the decoder length limit
    pub fn max_collection_len(mut self, len: usize) -> Self {
        self.max_collection_len = len;
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    ///
    /// ```ignore
    /// let config = ContextConfig::from_json(r#"{"domain_name": "billing"}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OrmError::Config(format!("invalid context configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| OrmError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.domain_name.trim().is_empty() {
            return Err(OrmError::Config("domain_name cannot be empty".to_string()));
        }

        if self.data_source.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(OrmError::Config("data_source cannot be blank".to_string()));
        }

        if self.max_nesting_depth == 0 {
            return Err(OrmError::Config("max_nesting_depth must be > 0".to_string()));
        }

        if self.max_collection_len == 0 {
            return Err(OrmError::Config("max_collection_len must be > 0".to_string()));
        }

        Ok(())
    }
}
