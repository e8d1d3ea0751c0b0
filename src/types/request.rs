//! Inbound requests and outbound responses.

use serde::{Deserialize, Serialize};

use super::value::{CellValue, OutputValue};
use crate::{CellgateError, Result};

/// Query parameters with a meaning of their own; never mapped to inputs.
pub const RESERVED_QUERY_PARAMS: &[&str] = &["token", "nocache", "_format", "service"];

/// A calculation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcRequest {
    pub service_id: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub bypass_cache: bool,
}

impl CalcRequest {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            ..Default::default()
        }
    }

    /// Add an input value.
    pub fn input(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Build a request from query parameters.
    ///
    /// Every non-reserved parameter becomes a string input (the normalizer
    /// coerces it to the declared type). Returns the requested output format
    /// alongside the request.
    pub fn from_query<K, V>(
        service_id: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(Self, OutputFormat)>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::new(service_id);
        let mut format = OutputFormat::default();
        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            let reserved = key.to_lowercase();
            if !RESERVED_QUERY_PARAMS.contains(&reserved.as_str()) {
                request
                    .inputs
                    .insert(key.to_string(), serde_json::Value::String(value.to_string()));
                continue;
            }
            match reserved.as_str() {
                "token" => request.token = Some(value.to_string()),
                "nocache" => request.bypass_cache = is_truthy(value),
                "_format" => format = value.parse()?,
                // `service` only routes the request.
                _ => {}
            }
        }
        Ok((request, format))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "" | "1" | "true" | "yes")
}

/// Output rendering selected by the query-parameter variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Plain,
}

impl std::str::FromStr for OutputFormat {
    type Err = CellgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "plain" | "text" => Ok(Self::Plain),
            other => Err(CellgateError::Validation(vec![crate::ValidationIssue::new(
                "_format",
                format!("unknown output format '{other}' (expected json, csv or plain)"),
            )])),
        }
    }
}

/// An echoed input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: CellValue,
}

/// A computed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResult {
    pub name: String,
    pub value: OutputValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_hint: Option<String>,
}

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub execution_time_ms: u64,
    pub cached: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A calculation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcResponse {
    pub service_id: String,
    pub inputs: Vec<NamedValue>,
    pub outputs: Vec<OutputResult>,
    pub metadata: ResponseMetadata,
}

impl CalcResponse {
    /// Look up an output by name.
    pub fn output(&self, name: &str) -> Option<&OutputValue> {
        self.outputs
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
            .map(|o| &o.value)
    }

    /// Render the response in the requested format.
    ///
    /// - `json`: the full response object
    /// - `csv`: `name,value` header, one line per scalar output and one line
    ///   per range row (`name,v1,v2,...`)
    /// - `plain`: the bare value for a single scalar output, otherwise one
    ///   `name: value` line per output
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string(self)?),
            OutputFormat::Csv => Ok(self.render_csv()),
            OutputFormat::Plain => Ok(self.render_plain()),
        }
    }

    fn render_csv(&self) -> String {
        let mut lines = vec!["name,value".to_string()];
        for output in &self.outputs {
            match &output.value {
                OutputValue::Scalar(v) => {
                    lines.push(format!("{},{}", csv_field(&output.name), csv_field(&v.to_string())));
                }
                OutputValue::Range(rows) => {
                    for row in rows {
                        let mut fields = vec![csv_field(&output.name)];
                        fields.extend(row.iter().map(|v| csv_field(&v.to_string())));
                        lines.push(fields.join(","));
                    }
                }
            }
        }
        lines.join("\n")
    }

    fn render_plain(&self) -> String {
        if let [single] = self.outputs.as_slice()
            && let OutputValue::Scalar(v) = &single.value
        {
            return v.to_string();
        }
        self.outputs
            .iter()
            .map(|o| format!("{}: {}", o.name, plain_value(&o.value)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn plain_value(value: &OutputValue) -> String {
    match value {
        OutputValue::Scalar(v) => v.to_string(),
        OutputValue::Range(rows) => rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
