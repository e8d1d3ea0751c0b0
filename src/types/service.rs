//! Service definitions published by the external publishing workflow.
//!
//! A [`ServiceDefinition`] pairs a document source with declared input cells
//! and output cells/ranges. Definitions are read-only to the gateway; a
//! republish produces a new definition (ideally with a bumped `version`).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::address::CellAddress;
use crate::Result;

/// Declared type of an input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Number,
    Boolean,
    #[default]
    String,
}

/// An input cell declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    /// Alternative names callers may use.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Target cell, e.g. `Sheet1!B2`.
    pub address: String,
    #[serde(rename = "type", default)]
    pub input_type: InputType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Value applied when the caller omits the input.
    ///
    /// Absent means "no default"; an explicit `null` means "clear the cell".
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<serde_json::Value>,
}

impl InputDef {
    pub fn new(name: impl Into<String>, address: impl Into<String>, input_type: InputType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            address: address.into(),
            input_type,
            mandatory: false,
            min: None,
            max: None,
            default: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)`.
fn explicit_null<'de, D>(deserializer: D) -> std::result::Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// An output cell or range declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,
    /// Source cell or range, e.g. `Sheet1!C3` or `Sheet2!B2:B5`.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_hint: Option<String>,
}

impl OutputDef {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            format_hint: None,
        }
    }

    pub fn format_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }
}

/// Per-service rate limit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRateLimit {
    pub max_requests: u64,
    pub window_ms: u64,
}

/// Serialized form; converted into [`ServiceDefinition`] so the lookup
/// table is always built.
#[derive(Deserialize)]
struct ServiceDefinitionData {
    service_id: String,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    inputs: Vec<InputDef>,
    #[serde(default)]
    outputs: Vec<OutputDef>,
    #[serde(default)]
    source: String,
    #[serde(default = "default_true")]
    use_caching: bool,
    #[serde(default)]
    table_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    requires_token: bool,
    #[serde(default)]
    rate_limit: Option<ServiceRateLimit>,
}

fn default_true() -> bool {
    true
}

/// A published calculation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ServiceDefinitionData")]
pub struct ServiceDefinition {
    pub service_id: String,
    /// Republish counter. Cached documents and results are keyed on it.
    pub version: u64,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<OutputDef>,
    /// Engine-specific document source.
    pub source: String,
    /// Whether results may be served from the result cache.
    pub use_caching: bool,
    /// TTL for remote table data of this service; falls back to the gateway default.
    pub table_cache_ttl_secs: Option<u64>,
    pub requires_token: bool,
    pub rate_limit: Option<ServiceRateLimit>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl From<ServiceDefinitionData> for ServiceDefinition {
    fn from(data: ServiceDefinitionData) -> Self {
        let mut def = Self {
            service_id: data.service_id,
            version: data.version,
            inputs: data.inputs,
            outputs: data.outputs,
            source: data.source,
            use_caching: data.use_caching,
            table_cache_ttl_secs: data.table_cache_ttl_secs,
            requires_token: data.requires_token,
            rate_limit: data.rate_limit,
            lookup: HashMap::new(),
        };
        def.reindex();
        def
    }
}

impl ServiceDefinition {
    /// Create a definition with caching enabled and no inputs or outputs.
    pub fn new(service_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            version: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            source: source.into(),
            use_caching: true,
            table_cache_ttl_secs: None,
            requires_token: false,
            rate_limit: None,
            lookup: HashMap::new(),
        }
    }

    /// Parse a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn input(mut self, input: InputDef) -> Self {
        self.inputs.push(input);
        self.reindex();
        self
    }

    pub fn output(mut self, output: OutputDef) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn use_caching(mut self, enabled: bool) -> Self {
        self.use_caching = enabled;
        self
    }

    pub fn table_cache_ttl(mut self, ttl: Duration) -> Self {
        self.table_cache_ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn requires_token(mut self, required: bool) -> Self {
        self.requires_token = required;
        self
    }

    pub fn rate_limit(mut self, max_requests: u64, window: Duration) -> Self {
        self.rate_limit = Some(ServiceRateLimit {
            max_requests,
            window_ms: window.as_millis() as u64,
        });
        self
    }

    /// Resolve a caller-supplied key (name, alias or address, any casing)
    /// to its input declaration.
    pub fn find_input(&self, key: &str) -> Option<&InputDef> {
        self.input_index(key).map(|idx| &self.inputs[idx])
    }

    /// Position of the input declaration matching `key`, if any.
    pub fn input_index(&self, key: &str) -> Option<usize> {
        self.lookup.get(&key.trim().to_lowercase()).copied()
    }

    /// Parse every declared address, failing on the first malformed one.
    pub fn validate_addresses(&self) -> Result<()> {
        for address in self
            .inputs
            .iter()
            .map(|i| &i.address)
            .chain(self.outputs.iter().map(|o| &o.address))
        {
            CellAddress::parse(address)?;
        }
        Ok(())
    }

    /// Rebuild the key-variant lookup table. The first declaration wins when
    /// two inputs claim the same variant.
    fn reindex(&mut self) {
        let mut lookup = HashMap::new();
        for (idx, input) in self.inputs.iter().enumerate() {
            let variants = std::iter::once(&input.name)
                .chain(input.aliases.iter())
                .chain(std::iter::once(&input.address));
            for variant in variants {
                lookup.entry(variant.trim().to_lowercase()).or_insert(idx);
            }
        }
        self.lookup = lookup;
    }
}
