//! A single JFR chunk: header, metadata, constant pools and the events decoded from it.
//!
//! Related JMC code: [ChunkLoaderV1.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/ChunkLoaderV1.java)

use crate::reader::binder::FieldBinder;
use crate::reader::byte_stream::{ByteStream, IntEncoding};
use crate::reader::constant_pool::PoolMap;
use crate::reader::event::{Event, EventRecord, EventScanner};
use crate::reader::metadata::Metadata;
use crate::reader::{DecodeOptions, Error, Result};
use crate::{Version, MAGIC};
use rustc_hash::FxHashMap;

/// magic(4) + version(4) + 7 * i64 + features(4)
pub const CHUNK_HEADER_SIZE: usize = 68;

const FEATURES_COMPRESSED_INTS: u32 = 1;

/// Chunk header. Offsets are relative to the chunk body, which starts right after the header.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkHeader {
    pub version: Version,
    pub chunk_size: u64,
    pub constant_pool_offset: u64,
    pub metadata_offset: u64,
    pub start_time_nanos: i64,
    pub duration_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
    pub features: u32,
}

impl ChunkHeader {
    /// Reads and validates the header at the current position of `stream`.
    pub fn try_new(stream: &mut ByteStream, options: &DecodeOptions) -> Result<Self> {
        let offset = stream.absolute_position();
        let malformed = |reason: String| Error::MalformedHeader { offset, reason };

        let magic: [u8; 4] = stream.read_exact()?;
        if magic != MAGIC {
            return Err(malformed(format!("bad magic {:02x?}", magic)));
        }

        let version = Version {
            major: stream.read_u16_be()?,
            minor: stream.read_u16_be()?,
        };
        if !version.is_supported() {
            return Err(malformed(format!(
                "unsupported version {}.{}",
                version.major, version.minor
            )));
        }

        let chunk_size = stream.read_u64_be()?;
        let constant_pool_offset = stream.read_u64_be()?;
        let metadata_offset = stream.read_u64_be()?;
        let start_time_nanos = stream.read_u64_be()? as i64;
        let duration_nanos = stream.read_u64_be()? as i64;
        let start_ticks = stream.read_u64_be()? as i64;
        let ticks_per_second = stream.read_u64_be()? as i64;
        let features = stream.read_u32_be()?;

        if chunk_size <= CHUNK_HEADER_SIZE as u64 || chunk_size > i64::MAX as u64 {
            return Err(malformed(format!("invalid chunk size {}", chunk_size)));
        }
        if let Some(limit) = options.max_chunk_size {
            if chunk_size > limit {
                return Err(Error::SizeLimitExceeded {
                    size: chunk_size,
                    limit,
                });
            }
        }
        for (name, value) in [
            ("constant pool", constant_pool_offset),
            ("metadata", metadata_offset),
        ] {
            if value < CHUNK_HEADER_SIZE as u64 || value >= chunk_size {
                return Err(malformed(format!("invalid {} offset {}", name, value)));
            }
        }

        Ok(Self {
            version,
            chunk_size,
            constant_pool_offset: constant_pool_offset - CHUNK_HEADER_SIZE as u64,
            metadata_offset: metadata_offset - CHUNK_HEADER_SIZE as u64,
            start_time_nanos,
            duration_nanos,
            start_ticks,
            ticks_per_second,
            features,
        })
    }

    pub fn is_ints_compressed(&self) -> bool {
        self.features & FEATURES_COMPRESSED_INTS != 0
    }

    pub fn chunk_body_size(&self) -> u64 {
        self.chunk_size - CHUNK_HEADER_SIZE as u64
    }

    /// Converts a tick count relative to the chunk start into nanoseconds since the epoch.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        if self.ticks_per_second <= 0 {
            return self.start_time_nanos;
        }
        let elapsed = (ticks as i128 - self.start_ticks as i128) * 1_000_000_000
            / self.ticks_per_second as i128;
        self.start_time_nanos
            .saturating_add(elapsed.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

#[derive(Debug)]
pub struct Chunk<'a> {
    pub header: ChunkHeader,
    pub metadata: Metadata,
    pub constant_pool: PoolMap<'a>,
    pub(crate) events: Vec<EventRecord<'a>>,
}

impl<'a> Chunk<'a> {
    /// Decodes the chunk starting at `offset` in `buf`.
    pub fn try_new(buf: &'a [u8], offset: usize, options: &DecodeOptions) -> Result<Self> {
        let mut stream = ByteStream::with_base(&buf[offset.min(buf.len())..], offset);
        let header = ChunkHeader::try_new(&mut stream, options)?;
        tracing::debug!(
            version = ?header.version,
            size = header.chunk_size,
            compressed = header.is_ints_compressed(),
            "Read chunk header"
        );

        let mut body = stream.sub_stream(CHUNK_HEADER_SIZE, header.chunk_body_size() as usize)?;
        body.set_int_encoding(if header.is_ints_compressed() {
            IntEncoding::Compressed
        } else {
            IntEncoding::Raw
        });

        // offset -> size of every record decoded before the event scan
        let mut consumed = FxHashMap::default();

        let mut metadata_stream = body.clone();
        metadata_stream.seek(header.metadata_offset as usize)?;
        let (metadata, metadata_size) = Metadata::try_new(&mut metadata_stream)?;
        consumed.insert(header.metadata_offset as usize, metadata_size);

        let mut binder = FieldBinder::new(&metadata.class_registry, options.expected_layouts);
        let mut constant_pool = PoolMap::try_new(
            &body,
            header.constant_pool_offset as usize,
            &mut binder,
            &mut consumed,
        )?;
        constant_pool.resolve();

        let events = EventScanner::new(&body, &consumed).scan(&mut binder, &constant_pool)?;
        drop(binder);

        Ok(Self {
            header,
            metadata,
            constant_pool,
            events,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = Event<'_>> {
        let chunk: &Chunk = self;
        chunk.events.iter().filter_map(move |record| {
            chunk
                .metadata
                .class_registry
                .get(record.class_id)
                .map(|class| Event {
                    class,
                    chunk,
                    record,
                })
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
