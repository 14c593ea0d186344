//! The queue message that hands a staged blob to the ingestion service.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;
use crate::properties::IngestionProperties;

/// One queued ingestion request.
///
/// Field names are fixed by the service. Built once per durable attempt and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionMessageEnvelope {
    id: Uuid,
    blob_path: String,
    raw_data_size: u64,
    database_name: String,
    table_name: String,
    retain_blob_on_success: bool,
    flush_immediately: bool,
    ignore_size_limit: bool,
    report_level: u8,
    report_method: u8,
    source_message_creation_time: DateTime<Utc>,
    additional_properties: BTreeMap<String, String>,
}

impl IngestionMessageEnvelope {
    pub fn new(
        id: Uuid,
        blob_path: impl Into<String>,
        raw_data_size: u64,
        properties: &IngestionProperties,
        authorization_context: &str,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            id,
            blob_path: blob_path.into(),
            raw_data_size,
            database_name: properties.database.clone(),
            table_name: properties.table.clone(),
            retain_blob_on_success: true,
            flush_immediately: properties.flush_immediately,
            ignore_size_limit: false,
            report_level: properties.report_level.code(),
            report_method: properties.report_method.code(),
            source_message_creation_time: Utc::now(),
            additional_properties: additional_properties(properties, authorization_context)?,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn blob_path(&self) -> &str {
        &self.blob_path
    }

    pub fn raw_data_size(&self) -> u64 {
        self.raw_data_size
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn additional_properties(&self) -> &BTreeMap<String, String> {
        &self.additional_properties
    }

    /// Base64 of the JSON document, as placed on the queue.
    pub fn encode(&self) -> Result<String, IngestError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(text: &str) -> Result<Self, IngestError> {
        let raw = STANDARD.decode(text.trim()).map_err(|e| {
            IngestError::InvalidProperties(format!("ingestion message is not base64: {e}"))
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn additional_properties(
    properties: &IngestionProperties,
    authorization_context: &str,
) -> Result<BTreeMap<String, String>, IngestError> {
    let mut extra = properties.additional_properties.clone();

    extra.insert(
        "authorizationContext".into(),
        authorization_context.to_string(),
    );
    extra.insert("format".into(), properties.format.as_str().to_string());
    if let Some(reference) = &properties.mapping_reference {
        extra.insert("ingestionMappingReference".into(), reference.clone());
    }
    if let Some(mapping) = &properties.mapping {
        extra.insert("ingestionMapping".into(), mapping.clone());
    }
    if !properties.tags.is_empty() {
        extra.insert("tags".into(), serde_json::to_string(&properties.tags)?);
    }
    if !properties.ingest_if_not_exists.is_empty() {
        extra.insert(
            "ingestIfNotExists".into(),
            serde_json::to_string(&properties.ingest_if_not_exists)?,
        );
    }
    if let Some(created) = properties.creation_time {
        extra.insert(
            "creationTime".into(),
            created.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    if properties.ignore_first_record {
        extra.insert("ignoreFirstRecord".into(), "true".into());
    }
    Ok(extra)
}
