use crate::error::{CascadeError, Result};

/// Largest value a 3-byte length field can hold, and the largest source a
/// single cascade call accepts.
pub const MAX_FIELD: usize = 0xFF_FFFF;

/// Signature of the 9-byte legacy single-buffer float layout. Only the
/// header is readable; its payload predates the layered codecs.
pub const LEGACY_SIGNATURE: [u8; 2] = *b"BL";

/// Signature of the current 11-byte cascade layout.
pub const CASCADE_SIGNATURE: [u8; 2] = *b"PC";

/// Size of the header written by [`CascadeHeader::encode`].
pub const HEADER_SIZE: usize = 11;

/// Set on the discriminator of every non-residual float buffer whose cascade
/// ends with a residual buffer.
pub const RESIDUAL_FOLLOWS: u8 = 0x80;

/// Level code reserved for the residual buffer.
pub const RESIDUAL_LEVEL: u8 = 0;

/// Float payloads open with one byte holding the buffer's position in its
/// cascade (0 for the coarsest). Counted in `compressed_len`.
pub const LAYER_POSITION_SIZE: usize = 1;

// ── Format descriptor table ────────────────────────────────────────────────

/// One header layout the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub version: u8,
    pub signature: [u8; 2],
    pub header_size: usize,
    /// Whether bytes 9 and 10 (datatype, buffer count) are present.
    pub has_cascade_fields: bool,
}

/// Every known layout, oldest first. The last entry is what gets written.
pub const FORMATS: &[FormatDescriptor] = &[
    FormatDescriptor {
        version: 1,
        signature: LEGACY_SIGNATURE,
        header_size: 9,
        has_cascade_fields: false,
    },
    FormatDescriptor {
        version: 2,
        signature: CASCADE_SIGNATURE,
        header_size: HEADER_SIZE,
        has_cascade_fields: true,
    },
];

/// Layout used for all newly written buffers.
pub fn current_format() -> &'static FormatDescriptor {
    &FORMATS[FORMATS.len() - 1]
}

/// Find the layout for a signature.
pub fn format_for_signature(signature: [u8; 2]) -> Result<&'static FormatDescriptor> {
    FORMATS
        .iter()
        .find(|f| f.signature == signature)
        .ok_or(CascadeError::BadSignature(signature))
}

// ── Discriminator ──────────────────────────────────────────────────────────

/// Byte 2 of the header: the level code plus the residual-follows flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discriminator(pub u8);

impl Discriminator {
    pub fn new(level: u8, residual_follows: bool) -> Self {
        let flag = if residual_follows { RESIDUAL_FOLLOWS } else { 0 };
        Self((level & !RESIDUAL_FOLLOWS) | flag)
    }

    pub fn residual() -> Self {
        Self(RESIDUAL_LEVEL)
    }

    pub fn level(self) -> u8 {
        self.0 & !RESIDUAL_FOLLOWS
    }

    pub fn is_residual(self) -> bool {
        self.level() == RESIDUAL_LEVEL
    }

    pub fn residual_follows(self) -> bool {
        self.0 & RESIDUAL_FOLLOWS != 0
    }
}

// ── Buffer header ──────────────────────────────────────────────────────────

/// Decoded representation of a compressed buffer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeHeader {
    pub version: u8,
    pub discriminator: Discriminator,
    /// Payload bytes following the header.
    pub compressed_len: usize,
    /// Uncompressed source length in bytes.
    pub original_len: usize,
    /// Raw element type tag of the source array.
    pub datatype: u8,
    /// Buffers produced together by the cascade call that wrote this one.
    pub buffer_count: u8,
}

impl CascadeHeader {
    /// Serialize with the current layout. Fails if either length overflows
    /// its 3-byte field.
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let compressed = put_u24("compressed_len", self.compressed_len)?;
        let original = put_u24("original_len", self.original_len)?;

        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&CASCADE_SIGNATURE);
        buf[2] = self.discriminator.0;
        buf[3..6].copy_from_slice(&compressed);
        buf[6..9].copy_from_slice(&original);
        buf[9] = self.datatype;
        buf[10] = self.buffer_count;
        Ok(buf)
    }

    /// Deserialize any known layout, dispatching on the signature.
    ///
    /// Legacy headers carry neither a datatype nor a buffer count; they always
    /// describe a single 32-bit float buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(CascadeError::TruncatedHeader {
                needed: 2,
                actual: buf.len(),
            });
        }
        let format = format_for_signature([buf[0], buf[1]])?;
        if buf.len() < format.header_size {
            return Err(CascadeError::TruncatedHeader {
                needed: format.header_size,
                actual: buf.len(),
            });
        }

        let (datatype, buffer_count) = if format.has_cascade_fields {
            (buf[9], buf[10])
        } else {
            (crate::dtype::ElementTypeTag::F32 as u8, 1)
        };

        Ok(Self {
            version: format.version,
            discriminator: Discriminator(buf[2]),
            compressed_len: get_u24(&buf[3..6]),
            original_len: get_u24(&buf[6..9]),
            datatype,
            buffer_count,
        })
    }

    /// Size of this header's layout on the wire.
    pub fn header_size(&self) -> usize {
        FORMATS
            .iter()
            .find(|f| f.version == self.version)
            .map(|f| f.header_size)
            .unwrap_or(HEADER_SIZE)
    }
}

fn put_u24(field: &'static str, value: usize) -> Result<[u8; 3]> {
    if value > MAX_FIELD {
        return Err(CascadeError::HeaderFieldOverflow { field, value });
    }
    Ok([
        (value & 0xff) as u8,
        ((value >> 8) & 0xff) as u8,
        ((value >> 16) & 0xff) as u8,
    ])
}

fn get_u24(bytes: &[u8]) -> usize {
    bytes[0] as usize | (bytes[1] as usize) << 8 | (bytes[2] as usize) << 16
}

// ── Block record ───────────────────────────────────────────────────────────

/// Magic bytes opening every block record written through a cascade index.
pub const BLOCK_MAGIC: &[u8; 4] = b"PCBK";

/// Size of a block record header in bytes.
///   magic[4] + level:u32 + block_id:u32 + original_len:u32
///   + payload_len:u32 + checksum:u64 + _pad[4]
///   = 4 + 4 + 4 + 4 + 4 + 8 + 4 = 32
pub const BLOCK_RECORD_SIZE: usize = 32;

/// Prefix of one stored cascade block. The payload follows immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockRecord {
    pub level: u32,
    pub block_id: u32,
    pub original_len: u32,
    pub payload_len: u32,
    /// xxhash3-64 of the payload.
    pub checksum: u64,
}

impl BlockRecord {
    pub fn to_bytes(&self) -> [u8; BLOCK_RECORD_SIZE] {
        let mut buf = [0u8; BLOCK_RECORD_SIZE];
        buf[0..4].copy_from_slice(BLOCK_MAGIC);
        buf[4..8].copy_from_slice(&self.level.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.original_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[20..28].copy_from_slice(&self.checksum.to_le_bytes());
        // buf[28..32] = padding, stays zero
        buf
    }

    /// Parse a record header. `None` if the magic does not match.
    pub fn from_bytes(buf: &[u8; BLOCK_RECORD_SIZE]) -> Option<Self> {
        if &buf[0..4] != BLOCK_MAGIC {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&buf[20..28]);
        Some(Self {
            level: u32_at(4),
            block_id: u32_at(8),
            original_len: u32_at(12),
            payload_len: u32_at(16),
            checksum: u64::from_le_bytes(checksum),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CascadeHeader {
        CascadeHeader {
            version: 2,
            discriminator: Discriminator::new(65, true),
            compressed_len: 0x01_0203,
            original_len: 400,
            datatype: 5,
            buffer_count: 3,
        }
    }

    #[test]
    fn encode_lays_out_fields_little_endian() {
        let buf = sample().encode().unwrap();
        assert_eq!(&buf[0..2], b"PC");
        assert_eq!(buf[2], 65 | RESIDUAL_FOLLOWS);
        assert_eq!(&buf[3..6], &[0x03, 0x02, 0x01]);
        assert_eq!(&buf[6..9], &[0x90, 0x01, 0x00]);
        assert_eq!(buf[9], 5);
        assert_eq!(buf[10], 3);
        assert_eq!(CascadeHeader::decode(&buf).unwrap(), sample());
    }

    #[test]
    fn encode_rejects_24_bit_overflow() {
        let mut h = sample();
        h.original_len = MAX_FIELD + 1;
        assert!(matches!(
            h.encode(),
            Err(CascadeError::HeaderFieldOverflow { field: "original_len", .. })
        ));

        h.original_len = MAX_FIELD;
        assert!(h.encode().is_ok());
    }

    #[test]
    fn decode_rejects_unknown_signature() {
        let mut buf = sample().encode().unwrap();
        buf[0] = b'Z';
        assert!(matches!(
            CascadeHeader::decode(&buf),
            Err(CascadeError::BadSignature([b'Z', b'C']))
        ));
    }

    #[test]
    fn decode_rejects_short_input() {
        let buf = sample().encode().unwrap();
        assert!(matches!(
            CascadeHeader::decode(&buf[..7]),
            Err(CascadeError::TruncatedHeader { needed: 11, actual: 7 })
        ));
    }

    #[test]
    fn decode_legacy_layout() {
        let legacy = [b'B', b'L', 66, 10, 0, 0, 0x90, 0x01, 0x00];
        let h = CascadeHeader::decode(&legacy).unwrap();
        assert_eq!(h.version, 1);
        assert_eq!(h.header_size(), 9);
        assert_eq!(h.discriminator.level(), 66);
        assert_eq!(h.compressed_len, 10);
        assert_eq!(h.original_len, 400);
        assert_eq!(h.datatype, 5);
        assert_eq!(h.buffer_count, 1);
    }

    #[test]
    fn discriminator_flags() {
        let d = Discriminator::new(67, true);
        assert_eq!(d.level(), 67);
        assert!(d.residual_follows());
        assert!(!d.is_residual());
        assert!(Discriminator::residual().is_residual());
        assert!(!Discriminator::new(67, false).residual_follows());
    }

    #[test]
    fn block_record_layout() {
        let rec = BlockRecord {
            level: 2,
            block_id: 37,
            original_len: 4096,
            payload_len: 321,
            checksum: 0xdead_beef_cafe_f00d,
        };
        let bytes = rec.to_bytes();
        assert_eq!(&bytes[0..4], BLOCK_MAGIC);
        assert_eq!(BlockRecord::from_bytes(&bytes), Some(rec));

        let mut bad = bytes;
        bad[0] = 0;
        assert_eq!(BlockRecord::from_bytes(&bad), None);
    }
}
