//! Declarative resources accepted by `apply`.
//!
//! Resources arrive as YAML on the CLI side and as JSON inside a
//! [`Command`](crate::protocol::Command) on the wire. Both encodings share the
//! same camelCase field names. Every field is optional at parse time; the
//! closed enums ([`ResourceKind`], [`ScheduleType`]) fall back to `Unknown`
//! rather than failing, so that validation can report a useful message later.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Kind of an applied resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    DataCollection,
    #[default]
    Unknown,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataCollection => "datacollection",
            Self::Unknown => "unknown",
        }
    }

    /// Case-insensitive; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "datacollection" => Self::DataCollection,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for ResourceKind {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a data collection is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleType {
    Interval,
    Recurring,
    #[default]
    Unknown,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Recurring => "recurring",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Self::Interval,
            "recurring" => Self::Recurring,
            _ => Self::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<String> for ScheduleType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ScheduleType> for String {
    fn from(schedule_type: ScheduleType) -> Self {
        schedule_type.as_str().to_string()
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `DataCollection` resource: which securities to pull, from where, and when.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataCollection {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: Metadata,
    pub spec: DataCollectionSpec,
}

impl DataCollection {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.spec.targets.securities.iter().map(|s| s.symbol.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataCollectionSpec {
    pub source: Source,
    pub targets: Targets,
    pub schedule: Schedule,
    pub options: Options,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    pub securities: Vec<Security>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub symbol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Schedule {
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub timeout: String,
    pub retries: u32,
}

impl fmt::Display for DataCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataCollection(apiVersion: {}, kind: {}, name: {}, spec: {})",
            self.api_version, self.kind, self.metadata.name, self.spec
        )
    }
}

impl fmt::Display for DataCollectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Spec(source: {}, targets: {}, schedule: {}, options: {})",
            self.source, self.targets, self.schedule, self.options
        )
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Source(type: {}, endpoint: {}, parameters: {:?})",
            self.source_type, self.endpoint, self.parameters
        )
    }
}

impl fmt::Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols: Vec<&str> = self.securities.iter().map(|s| s.symbol.as_str()).collect();
        write!(f, "Targets(securities: [{}])", symbols.join(", "))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Schedule(type: {}, frequency: {}, startDate: {}, endDate: {})",
            self.schedule_type,
            self.frequency.as_deref().unwrap_or("-"),
            self.start_date.as_deref().unwrap_or("-"),
            self.end_date.as_deref().unwrap_or("-"),
        )
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Options(timeout: {}, retries: {})", self.timeout, self.retries)
    }
}

/// A resource that can be applied, one payload type per [`ResourceKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    DataCollection(DataCollection),
}

impl Resource {
    /// Decode a JSON payload, picking the schema by its `kind` field.
    ///
    /// `DataCollection` is the only schema today, so an unrecognized kind is
    /// decoded as one too and keeps `kind: unknown` for validation to reject or accept.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidPayload(serde::de::Error::custom(
                "resource must be a JSON object",
            )));
        }
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(ResourceKind::parse)
            .unwrap_or_default();

        match kind {
            ResourceKind::DataCollection | ResourceKind::Unknown => serde_json::from_value(value)
                .map(Resource::DataCollection)
                .map_err(ProtocolError::InvalidPayload),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::DataCollection(dc) => dc.kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::DataCollection(dc) => dc.name(),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ProtocolError> {
        match self {
            Resource::DataCollection(dc) => {
                serde_json::to_value(dc).map_err(ProtocolError::Encode)
            }
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::DataCollection(dc) => dc.fmt(f),
        }
    }
}
