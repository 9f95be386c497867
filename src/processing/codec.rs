//! Binary wire format for session messages
//!
//! Envelope: `[protocol(1)] [tag(1)] [body(..)] [crc16(2)]`, little-endian.
//!
//! Anchor record body (36 bytes):
//! `[px py pz: f32] [rx ry rz rw: f32] [version: u32] [publisher: u32]`

use crate::core::constants::ANCHOR_RECORD_SIZE;
use crate::core::types::{AnchorRecord, ParticipantId, Pose};
use crate::validation::error::ValidationError;
use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 1;

const TAG_ANCHOR_PUBLISHED: u8 = 1;
const TAG_ANCHOR_REQUEST: u8 = 2;
const TAG_READINESS: u8 = 3;

const HEADER_SIZE: usize = 2;
const CHECKSUM_SIZE: usize = 2;

/// Messages exchanged between participants
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionMessage {
    /// A version-numbered anchor record, from the authority or a relaying peer
    AnchorPublished(AnchorRecord),
    /// A participant with a tracked reference but no anchor asks for one
    AnchorRequest { requester: ParticipantId },
    /// A participant reports local alignment
    Readiness { participant: ParticipantId },
}

impl SessionMessage {
    fn tag(&self) -> u8 {
        match self {
            SessionMessage::AnchorPublished(_) => TAG_ANCHOR_PUBLISHED,
            SessionMessage::AnchorRequest { .. } => TAG_ANCHOR_REQUEST,
            SessionMessage::Readiness { .. } => TAG_READINESS,
        }
    }
}

/// Errors that can occur while decoding a payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("insufficient data: need {required} bytes, got {available}")]
    InsufficientData { required: usize, available: usize },
    #[error("unsupported protocol version {version}")]
    UnsupportedProtocol { version: u8 },
    #[error("unknown message tag {tag}")]
    UnknownTag { tag: u8 },
    #[error("checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    InvalidChecksum { expected: u16, actual: u16 },
    #[error("trailing data: {extra} unexpected bytes")]
    TrailingData { extra: usize },
    #[error("anchor pose rejected: {0}")]
    InvalidPose(#[from] ValidationError),
}

/// Encoder/decoder for [`SessionMessage`]s and retained anchor records
#[derive(Debug, Clone)]
pub struct MessageCodec {
    verify_checksum: bool,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            verify_checksum: true,
        }
    }

    /// Enable or disable checksum verification on decode
    pub fn set_verify_checksum(&mut self, verify: bool) {
        self.verify_checksum = verify;
    }

    pub fn encode(&self, message: &SessionMessage) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE + ANCHOR_RECORD_SIZE + CHECKSUM_SIZE);
        data.push(PROTOCOL_VERSION);
        data.push(message.tag());

        match message {
            SessionMessage::AnchorPublished(record) => data.extend_from_slice(&encode_record(record)),
            SessionMessage::AnchorRequest { requester } => {
                data.extend_from_slice(&requester.0.to_le_bytes())
            }
            SessionMessage::Readiness { participant } => {
                data.extend_from_slice(&participant.0.to_le_bytes())
            }
        }

        let checksum = calculate_checksum(&data);
        data.extend_from_slice(&checksum.to_le_bytes());
        data
    }

    pub fn decode(&self, data: &[u8]) -> Result<SessionMessage, ParseError> {
        let body = self.verify_frame(data)?;

        if data[0] != PROTOCOL_VERSION {
            return Err(ParseError::UnsupportedProtocol { version: data[0] });
        }

        match data[1] {
            TAG_ANCHOR_PUBLISHED => Ok(SessionMessage::AnchorPublished(decode_record(body)?)),
            TAG_ANCHOR_REQUEST => Ok(SessionMessage::AnchorRequest {
                requester: ParticipantId(read_u32_exact(body)?),
            }),
            TAG_READINESS => Ok(SessionMessage::Readiness {
                participant: ParticipantId(read_u32_exact(body)?),
            }),
            tag => Err(ParseError::UnknownTag { tag }),
        }
    }

    /// Encode a record for the retained shared-state slot: body plus checksum
    pub fn encode_shared_record(&self, record: &AnchorRecord) -> Vec<u8> {
        let mut data = encode_record(record).to_vec();
        let checksum = calculate_checksum(&data);
        data.extend_from_slice(&checksum.to_le_bytes());
        data
    }

    pub fn decode_shared_record(&self, data: &[u8]) -> Result<AnchorRecord, ParseError> {
        let required = ANCHOR_RECORD_SIZE + CHECKSUM_SIZE;
        if data.len() < required {
            return Err(ParseError::InsufficientData {
                required,
                available: data.len(),
            });
        }
        self.check(&data[..ANCHOR_RECORD_SIZE], &data[ANCHOR_RECORD_SIZE..required])?;
        if data.len() > required {
            return Err(ParseError::TrailingData {
                extra: data.len() - required,
            });
        }
        decode_record(&data[..ANCHOR_RECORD_SIZE])
    }

    /// Check envelope length and checksum, returning the body slice
    fn verify_frame<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], ParseError> {
        let minimum = HEADER_SIZE + CHECKSUM_SIZE;
        if data.len() < minimum {
            return Err(ParseError::InsufficientData {
                required: minimum,
                available: data.len(),
            });
        }

        let split = data.len() - CHECKSUM_SIZE;
        self.check(&data[..split], &data[split..])?;
        Ok(&data[HEADER_SIZE..split])
    }

    fn check(&self, covered: &[u8], checksum_bytes: &[u8]) -> Result<(), ParseError> {
        if !self.verify_checksum {
            return Ok(());
        }
        let expected = u16::from_le_bytes([checksum_bytes[0], checksum_bytes[1]]);
        let actual = calculate_checksum(covered);
        if expected != actual {
            return Err(ParseError::InvalidChecksum { expected, actual });
        }
        Ok(())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode the 36-byte anchor record body
pub fn encode_record(record: &AnchorRecord) -> [u8; ANCHOR_RECORD_SIZE] {
    let mut out = [0u8; ANCHOR_RECORD_SIZE];
    let components = record
        .pose
        .position_array()
        .into_iter()
        .chain(record.pose.rotation_xyzw());

    for (index, value) in components.enumerate() {
        out[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    out[28..32].copy_from_slice(&record.version.to_le_bytes());
    out[32..36].copy_from_slice(&record.published_by.0.to_le_bytes());
    out
}

/// Decode and validate an anchor record body
pub fn decode_record(data: &[u8]) -> Result<AnchorRecord, ParseError> {
    if data.len() < ANCHOR_RECORD_SIZE {
        return Err(ParseError::InsufficientData {
            required: ANCHOR_RECORD_SIZE,
            available: data.len(),
        });
    }
    if data.len() > ANCHOR_RECORD_SIZE {
        return Err(ParseError::TrailingData {
            extra: data.len() - ANCHOR_RECORD_SIZE,
        });
    }

    let position = [read_f32(data, 0), read_f32(data, 4), read_f32(data, 8)];
    let rotation = [
        read_f32(data, 12),
        read_f32(data, 16),
        read_f32(data, 20),
        read_f32(data, 24),
    ];
    let pose = Pose::new(position, rotation)?;

    Ok(AnchorRecord {
        pose,
        version: read_u32(data, 28),
        published_by: ParticipantId(read_u32(data, 32)),
    })
}

/// CRC-16/MODBUS
pub fn calculate_checksum(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

fn read_f32(data: &[u8], offset: usize) -> f32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    f32::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u32_exact(body: &[u8]) -> Result<u32, ParseError> {
    match body.len() {
        4 => Ok(read_u32(body, 0)),
        n if n < 4 => Err(ParseError::InsufficientData {
            required: 4,
            available: n,
        }),
        n => Err(ParseError::TrailingData { extra: n - 4 }),
    }
}
