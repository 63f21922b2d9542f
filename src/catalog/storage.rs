//! Binary storage for product embeddings.
//!
//! File format: embeddings.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - product_id: u64 (little-endian)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::StoredEmbedding;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Entry bytes before the vector: product_id(8) + content_hash(8)
const ENTRY_PREFIX: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Unsupported dimensions: {0}")]
    UnsupportedDimensions(usize),
}

impl EmbeddingStorageError {
    /// Whether the file is readable but was written for another model or
    /// dimensionality, meaning every stored vector has to be regenerated.
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            EmbeddingStorageError::ModelMismatch
                | EmbeddingStorageError::DimensionMismatch { .. }
                | EmbeddingStorageError::VersionMismatch(..)
        )
    }
}

/// SHA256 of the model name, used to tie a file to the model that wrote it.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

pub struct EmbeddingStorage {
    path: PathBuf,
}

impl EmbeddingStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load every stored embedding, keyed by product id.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<HashMap<u64, StoredEmbedding>, EmbeddingStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        Self::validate_header(&header, expected_model_id, expected_dimensions)?;

        let mut entries = HashMap::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (id, embedding) = Self::read_entry(&mut reader, header.dimensions as usize)?;
            entries.insert(id, embedding);
        }

        Ok(entries)
    }

    /// Save all embeddings.
    ///
    /// Uses atomic write: temp file -> fsync -> rename. Entries whose length
    /// differs from `dimensions` are not written.
    pub fn save(
        &self,
        entries: &HashMap<u64, StoredEmbedding>,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<(), EmbeddingStorageError> {
        if dimensions == 0 || dimensions > u16::MAX as usize {
            return Err(EmbeddingStorageError::UnsupportedDimensions(dimensions));
        }

        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_to_file(&temp_path, entries, model_id, dimensions);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        path: &Path,
        entries: &HashMap<u64, StoredEmbedding>,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<(), EmbeddingStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut ids: Vec<u64> = entries
            .iter()
            .filter(|(id, e)| {
                let ok = e.vector.len() == dimensions;
                if !ok {
                    log::warn!(
                        "dropping embedding of product {id}: {} dimensions, expected {dimensions}",
                        e.vector.len()
                    );
                }
                ok
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: dimensions as u16,
            entry_count: ids.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for id in ids {
            if let Some(entry) = entries.get(&id) {
                Self::write_entry(&mut writer, id, entry)?;
            }
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, EmbeddingStorageError> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        Header::decode(&bytes)
    }

    fn validate_header(
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), EmbeddingStorageError> {
        if header.model_id != *expected_model_id {
            return Err(EmbeddingStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(EmbeddingStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), EmbeddingStorageError> {
        writer.write_all(&header.encode())?;
        Ok(())
    }

    /// One entry is `16 + 4 * dimensions` bytes: id, content hash, vector.
    fn read_entry(
        reader: &mut impl Read,
        dimensions: usize,
    ) -> Result<(u64, StoredEmbedding), EmbeddingStorageError> {
        let mut buf = vec![0u8; ENTRY_PREFIX + dimensions * 4];
        reader.read_exact(&mut buf)?;

        let (prefix, floats) = buf.split_at(ENTRY_PREFIX);
        let id = u64::from_le_bytes(le_array(&prefix[..8]));
        let content_hash = u64::from_le_bytes(le_array(&prefix[8..]));
        let vector = floats
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(le_array(chunk)))
            .collect();

        Ok((
            id,
            StoredEmbedding {
                vector,
                content_hash,
            },
        ))
    }

    fn write_entry(
        writer: &mut impl Write,
        id: u64,
        entry: &StoredEmbedding,
    ) -> Result<(), EmbeddingStorageError> {
        let mut buf = Vec::with_capacity(ENTRY_PREFIX + entry.vector.len() * 4);
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&entry.content_hash.to_le_bytes());
        buf.extend(entry.vector.iter().flat_map(|v| v.to_le_bytes()));

        writer.write_all(&buf)?;
        Ok(())
    }
}

/// Copy a little-endian field out of a slice of known length.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    const CHECKSUMMED: usize = HEADER_SIZE - 4;

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.version;
        bytes[1..33].copy_from_slice(&self.model_id);
        bytes[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[35..Self::CHECKSUMMED].copy_from_slice(&self.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..Self::CHECKSUMMED]);
        bytes[Self::CHECKSUMMED..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, EmbeddingStorageError> {
        let version = bytes[0];
        if version > FORMAT_VERSION {
            return Err(EmbeddingStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored = u32::from_le_bytes(le_array(&bytes[Self::CHECKSUMMED..]));
        if stored != crc32fast::hash(&bytes[..Self::CHECKSUMMED]) {
            return Err(EmbeddingStorageError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id: le_array(&bytes[1..33]),
            dimensions: u16::from_le_bytes(le_array(&bytes[33..35])),
            entry_count: u64::from_le_bytes(le_array(&bytes[35..Self::CHECKSUMMED])),
        })
    }
}
