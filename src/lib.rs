//! Decoder for the Java Flight Recorder binary format.
//!
//! A recording is a sequence of self-contained chunks. Each chunk carries its own
//! metadata (the schema of every class it uses), constant pools and event records.
//! See [`reader::JfrReader`] for the entry point.

pub mod reader;

const MAGIC: [u8; 4] = [b'F', b'L', b'R', b'\0'];
const VERSION_1: Version = Version { major: 1, minor: 0 };
const VERSION_2: Version = Version { major: 2, minor: 0 };

const EVENT_TYPE_METADATA: i64 = 0;
const EVENT_TYPE_CONSTANT_POOL: i64 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub fn is_supported(&self) -> bool {
        (VERSION_1.major..=VERSION_2.major).contains(&self.major)
    }
}
