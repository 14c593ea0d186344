//! Per-request ingestion settings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Source data format, named as the service expects it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Tsv,
    Scsv,
    Sohsv,
    Psv,
    Txt,
    Raw,
    Tsve,
    Json,
    MultiJson,
    SingleJson,
    Avro,
    ApacheAvro,
    Parquet,
    Orc,
    SStream,
    W3cLogFile,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Scsv => "scsv",
            Self::Sohsv => "sohsv",
            Self::Psv => "psv",
            Self::Txt => "txt",
            Self::Raw => "raw",
            Self::Tsve => "tsve",
            Self::Json => "json",
            Self::MultiJson => "multijson",
            Self::SingleJson => "singlejson",
            Self::Avro => "avro",
            Self::ApacheAvro => "apacheavro",
            Self::Parquet => "parquet",
            Self::Orc => "orc",
            Self::SStream => "sstream",
            Self::W3cLogFile => "w3clogfile",
        }
    }

    /// Formats that cannot be ingested without a column mapping.
    pub fn requires_mapping(&self) -> bool {
        matches!(self, Self::Json | Self::MultiJson | Self::SingleJson)
    }

    /// Already-compressed container formats; uploaded without gzip.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Avro | Self::ApacheAvro | Self::Parquet | Self::Orc | Self::SStream
        )
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "tsv" => Self::Tsv,
            "scsv" => Self::Scsv,
            "sohsv" => Self::Sohsv,
            "psv" => Self::Psv,
            "txt" => Self::Txt,
            "raw" => Self::Raw,
            "tsve" => Self::Tsve,
            "json" => Self::Json,
            "multijson" => Self::MultiJson,
            "singlejson" => Self::SingleJson,
            "avro" => Self::Avro,
            "apacheavro" => Self::ApacheAvro,
            "parquet" => Self::Parquet,
            "orc" => Self::Orc,
            "sstream" => Self::SStream,
            "w3clogfile" => Self::W3cLogFile,
            other => {
                return Err(IngestError::InvalidProperties(format!(
                    "unknown data format '{other}'"
                )))
            }
        };
        Ok(format)
    }
}

/// Which outcomes the service reports back on the status queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportLevel {
    #[default]
    FailuresOnly,
    DoNotReport,
    FailuresAndSuccesses,
}

impl ReportLevel {
    /// Wire value carried in the ingestion message.
    pub fn code(&self) -> u8 {
        match self {
            Self::FailuresOnly => 0,
            Self::DoNotReport => 1,
            Self::FailuresAndSuccesses => 2,
        }
    }
}

/// Where the service writes status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMethod {
    #[default]
    Queue,
    Table,
    QueueAndTable,
}

impl ReportMethod {
    pub fn code(&self) -> u8 {
        match self {
            Self::Queue => 0,
            Self::Table => 1,
            Self::QueueAndTable => 2,
        }
    }
}

/// Target and options of one ingestion request.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: DataFormat,
    /// Name of a mapping already defined on the table.
    pub mapping_reference: Option<String>,
    /// Inline mapping JSON.
    pub mapping: Option<String>,
    pub report_level: ReportLevel,
    pub report_method: ReportMethod,
    pub flush_immediately: bool,
    pub ignore_first_record: bool,
    /// Extent tags attached to the ingested data.
    pub tags: Vec<String>,
    /// Skip ingestion if an extent already carries one of these tags.
    pub ingest_if_not_exists: Vec<String>,
    pub creation_time: Option<DateTime<Utc>>,
    /// Passed through verbatim in the message's additional properties.
    pub additional_properties: BTreeMap<String, String>,
}

impl IngestionProperties {
    pub fn new(database: impl Into<String>, table: impl Into<String>, format: DataFormat) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            format,
            mapping_reference: None,
            mapping: None,
            report_level: ReportLevel::default(),
            report_method: ReportMethod::default(),
            flush_immediately: false,
            ignore_first_record: false,
            tags: Vec::new(),
            ingest_if_not_exists: Vec::new(),
            creation_time: None,
            additional_properties: BTreeMap::new(),
        }
    }

    pub fn with_mapping_reference(mut self, name: impl Into<String>) -> Self {
        self.mapping_reference = Some(name.into());
        self
    }

    pub fn with_mapping(mut self, mapping_json: impl Into<String>) -> Self {
        self.mapping = Some(mapping_json.into());
        self
    }

    pub fn with_report(mut self, level: ReportLevel, method: ReportMethod) -> Self {
        self.report_level = level;
        self.report_method = method;
        self
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.database.trim().is_empty() {
            return Err(IngestError::InvalidProperties("database is empty".into()));
        }
        if self.table.trim().is_empty() {
            return Err(IngestError::InvalidProperties("table is empty".into()));
        }
        if self.format.requires_mapping()
            && self.mapping_reference.is_none()
            && self.mapping.is_none()
        {
            return Err(IngestError::InvalidProperties(format!(
                "format '{}' requires a mapping reference or inline mapping",
                self.format
            )));
        }
        Ok(())
    }
}
