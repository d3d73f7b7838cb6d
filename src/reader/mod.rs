use serde::Deserialize;
use thiserror::Error;

pub mod binder;
pub mod byte_stream;
pub mod chunk;
pub mod constant_pool;
pub mod de;
pub mod event;
pub mod metadata;
pub mod type_descriptor;
pub mod types;
pub mod value_descriptor;

#[cfg(test)]
pub(crate) mod test_util;

pub use chunk::{Chunk, ChunkHeader};
pub use event::{Accessor, Event};

/// Failure while decoding a chunk. Offsets are absolute positions in the input buffer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed chunk header at offset {offset}: {reason}")]
    MalformedHeader { offset: usize, reason: String },

    #[error("chunk size {size} exceeds the configured limit {limit}")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("unexpected end of input at offset {offset} ({needed} more bytes needed)")]
    UnexpectedEndOfInput { offset: usize, needed: usize },

    #[error("varint at offset {offset} overflows 32 bits")]
    IntegerOverflow { offset: usize },

    #[error("unknown string encoding {tag} at offset {offset}")]
    UnknownStringEncoding { offset: usize, tag: u8 },

    #[error("event record at offset {offset} references unknown class {class_id}")]
    UnknownEventClass { offset: usize, class_id: i64 },

    #[error("class {0} is not declared in the chunk metadata")]
    UnknownType(i64),

    #[error("checkpoint at offset {offset} has unsupported type mask {mask}")]
    UnsupportedCheckpointMask { offset: usize, mask: i32 },

    #[error("field {class}.{field} is a two-dimensional array")]
    TwoDimensionalArrayUnsupported { class: String, field: String },

    #[error("malformed metadata at offset {offset}: {reason}")]
    MalformedMetadata { offset: usize, reason: String },

    #[error("malformed checkpoint at offset {offset}: {reason}")]
    MalformedCheckpoint { offset: usize, reason: String },

    #[error("record at offset {offset} declares invalid size {size}")]
    InvalidRecordSize { offset: usize, size: i64 },

    #[error("inline values of class {class_id} nest too deeply")]
    NestingTooDeep { class_id: i64 },

    #[error("{0}")]
    DeserializeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The first chunk of a recording that failed to decode.
#[derive(Debug, Error)]
#[error("failed to decode chunk #{index} at offset {offset}: {source}")]
pub struct ChunkError {
    pub index: usize,
    pub offset: usize,
    #[source]
    pub source: Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Chunks declaring a larger size are rejected before any of their content is read.
    pub max_chunk_size: Option<u64>,
    /// Use the built-in expected field layouts for well-known classes.
    /// When disabled every class decodes all of its declared fields.
    pub expected_layouts: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: None,
            expected_layouts: true,
        }
    }
}

/// Chunks decoded from a buffer, plus the error that stopped decoding, if any.
#[derive(Debug)]
pub struct Recording<'a> {
    pub chunks: Vec<Chunk<'a>>,
    pub error: Option<ChunkError>,
}

/// Decodes the chunks of an in-memory recording one after another.
///
/// Iteration stops after the first chunk that fails to decode.
pub struct JfrReader<'a> {
    buf: &'a [u8],
    offset: usize,
    index: usize,
    options: DecodeOptions,
    failed: bool,
}

impl<'a> JfrReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_options(buf, DecodeOptions::default())
    }

    pub fn with_options(buf: &'a [u8], options: DecodeOptions) -> Self {
        Self {
            buf,
            offset: 0,
            index: 0,
            options,
            failed: false,
        }
    }

    pub fn read_chunk(&mut self) -> Option<std::result::Result<Chunk<'a>, ChunkError>> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        let _span = tracing::debug_span!("chunk", index = self.index, offset = self.offset).entered();
        match Chunk::try_new(self.buf, self.offset, &self.options) {
            Ok(chunk) => {
                self.offset += chunk.header.chunk_size as usize;
                self.index += 1;
                Some(Ok(chunk))
            }
            Err(source) => {
                tracing::warn!(index = self.index, offset = self.offset, error = %source, "Chunk decoding failed");
                self.failed = true;
                Some(Err(ChunkError {
                    index: self.index,
                    offset: self.offset,
                    source,
                }))
            }
        }
    }

    /// Decodes every chunk, keeping the chunks that precede a failure.
    pub fn read_all(mut self) -> Recording<'a> {
        let mut chunks = vec![];
        let mut error = None;
        while let Some(result) = self.read_chunk() {
            match result {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => error = Some(e),
            }
        }
        Recording { chunks, error }
    }
}

impl<'a> Iterator for JfrReader<'a> {
    type Item = std::result::Result<Chunk<'a>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_chunk()
    }
}

/// Shortcut for `JfrReader::with_options(buf, options).read_all()`.
pub fn decode(buf: &[u8], options: DecodeOptions) -> Recording<'_> {
    JfrReader::with_options(buf, options).read_all()
}
