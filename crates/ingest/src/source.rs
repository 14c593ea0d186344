//! Data sources accepted by the ingestors.

use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use crate::error::IngestError;
use crate::properties::DataFormat;

/// Header plus trailer of an empty gzip member.
const GZIP_MIN_LEN: usize = 18;

/// What to ingest.
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// In-memory payload. `name` becomes part of the staging blob name.
    Bytes {
        data: Bytes,
        name: String,
        compressed: bool,
    },
    /// Local file, read when the request runs. A `.gz` or `.zip` suffix
    /// marks it as already compressed.
    File(PathBuf),
    /// A blob the service can read directly; nothing is uploaded.
    Blob { uri: String, raw_size: Option<u64> },
}

impl IngestSource {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            data: data.into(),
            name: "stream".to_string(),
            compressed: false,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn blob(uri: impl Into<String>, raw_size: Option<u64>) -> Self {
        Self::Blob {
            uri: uri.into(),
            raw_size,
        }
    }
}

/// Compression marker from a file or blob name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Packing {
    Plain,
    Gzip,
    Zip,
}

impl Packing {
    pub(crate) fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") {
            Packing::Gzip
        } else if lower.ends_with(".zip") {
            Packing::Zip
        } else {
            Packing::Plain
        }
    }
}

/// Where a payload's bytes live.
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Memory(Bytes),
    /// Left on disk; read only when uploaded.
    File(PathBuf),
}

/// A resolved source, ready to stream or upload.
#[derive(Debug, Clone)]
pub(crate) struct Payload {
    pub name: String,
    pub body: Body,
    pub packing: Packing,
    size: u64,
    raw_size: u64,
}

impl Payload {
    pub(crate) fn in_memory(name: impl Into<String>, data: Bytes, packing: Packing) -> Self {
        let raw_size = match packing {
            Packing::Gzip => gzip_trailer(&data).unwrap_or(data.len() as u64),
            _ => data.len() as u64,
        };
        Self {
            name: name.into(),
            size: data.len() as u64,
            raw_size,
            body: Body::Memory(data),
            packing,
        }
    }

    /// Resolve an in-memory or file source. Blob sources have no payload.
    ///
    /// Files no larger than `memory_limit` are read into memory; larger ones
    /// are only measured and stay on disk until upload.
    pub(crate) async fn load(
        source: &IngestSource,
        memory_limit: u64,
    ) -> Result<Option<Self>, IngestError> {
        match source {
            IngestSource::Bytes {
                data,
                name,
                compressed,
            } => {
                let packing = if *compressed {
                    Packing::Gzip
                } else {
                    Packing::Plain
                };
                Ok(Some(Self::in_memory(name.clone(), data.clone(), packing)))
            }
            IngestSource::File(path) => {
                let name = file_stem(path);
                let packing = Packing::from_name(&path.to_string_lossy());
                let size = tokio::fs::metadata(path).await?.len();
                if size <= memory_limit {
                    let data = Bytes::from(tokio::fs::read(path).await?);
                    return Ok(Some(Self::in_memory(name, data, packing)));
                }

                let raw_size = match packing {
                    Packing::Gzip => read_gzip_trailer(path, size).await?.unwrap_or(size),
                    _ => size,
                };
                Ok(Some(Self {
                    name,
                    body: Body::File(path.clone()),
                    packing,
                    size,
                    raw_size,
                }))
            }
            IngestSource::Blob { .. } => Ok(None),
        }
    }

    /// Size of the payload as given, compressed or not.
    pub(crate) fn len(&self) -> u64 {
        self.size
    }

    /// Uncompressed size; gzip payloads report the size from their trailer.
    pub(crate) fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub(crate) fn in_memory_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Memory(data) => Some(data),
            Body::File(_) => None,
        }
    }

    /// Bytes for the staging blob and whether they are gzip-compressed.
    ///
    /// Plain text formats are gzipped; binary formats and already-packed
    /// payloads are uploaded unchanged. Files are compressed straight from
    /// disk, so only the compressed copy is held in memory.
    pub(crate) async fn for_upload(&self, format: DataFormat) -> Result<(Bytes, bool), IngestError> {
        let compress = self.packing == Packing::Plain && !format.is_binary();
        let gzipped = compress || self.packing == Packing::Gzip;
        let bytes = match (&self.body, compress) {
            (Body::Memory(data), false) => data.clone(),
            (Body::Memory(data), true) => Bytes::from(gzip(data)?),
            (Body::File(path), false) => Bytes::from(tokio::fs::read(path).await?),
            (Body::File(path), true) => Bytes::from(gzip_file(path.clone()).await?),
        };
        Ok((bytes, gzipped))
    }

    /// `{database}__{table}__{source_id}__{name}.{format}` plus the
    /// compression suffix of the uploaded bytes.
    pub(crate) fn blob_name(
        &self,
        database: &str,
        table: &str,
        source_id: Uuid,
        format: DataFormat,
        gzipped: bool,
    ) -> String {
        let suffix = match (self.packing, gzipped) {
            (Packing::Zip, _) => ".zip",
            (_, true) => ".gz",
            _ => "",
        };
        format!(
            "{database}__{table}__{source_id}__{}.{format}{suffix}",
            self.name
        )
    }
}

/// File name without its compression suffix and format extension.
fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unpacked = match Packing::from_name(&name) {
        Packing::Gzip => &name[..name.len() - 3],
        Packing::Zip => &name[..name.len() - 4],
        Packing::Plain => &name[..],
    };
    let stem = Path::new(unpacked)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        "file".to_string()
    } else {
        stem
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

async fn gzip_file(path: PathBuf) -> Result<Vec<u8>, IngestError> {
    let compressed = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(path)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        io::copy(&mut file, &mut encoder)?;
        encoder.finish()
    })
    .await
    .map_err(io::Error::other)??;
    Ok(compressed)
}

/// ISIZE field of a gzip member: the uncompressed length modulo 2^32.
fn gzip_trailer(data: &[u8]) -> Option<u64> {
    if data.len() < GZIP_MIN_LEN {
        return None;
    }
    let tail = &data[data.len() - 4..];
    Some(u64::from(u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]])))
}

async fn read_gzip_trailer(path: &Path, size: u64) -> Result<Option<u64>, IngestError> {
    if size < GZIP_MIN_LEN as u64 {
        return Ok(None);
    }
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::End(-4)).await?;
    let mut tail = [0u8; 4];
    file.read_exact(&mut tail).await?;
    Ok(Some(u64::from(u32::from_le_bytes(tail))))
}
