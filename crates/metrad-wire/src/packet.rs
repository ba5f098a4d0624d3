use crate::wire::{WireDecode, WireEncode, WireError};

/// Size of the packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Magic number identifying a metrad wire packet (occupies the low byte of
/// `checksum`).
pub const PACKET_MAGIC_NUM: u8 = 0x7A;

/// Maximum allowed packet payload (16 MiB).
pub const PACKET_MAX_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("incomplete header: need {need} bytes, have {have}")]
    IncompleteHeader { need: usize, have: usize },
    #[error("invalid packet magic: {0:#04x}")]
    InvalidMagic(u8),
    #[error("packet too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("truncated payload: header says {expect} bytes, have {have}")]
    Truncated { expect: usize, have: usize },
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Calculate the CRC32C checksum with the packet magic in the low byte.
fn checksum_of(payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(payload);
    (crc & !0xff) | (PACKET_MAGIC_NUM as u32)
}

/// Bit-exact framing for the remote control protocol and plugin RPC: a
/// 4-byte CRC32C checksum (magic in the low byte) and a 4-byte payload
/// size, both little-endian, followed by the payload.
pub struct Packet;

impl Packet {
    /// Frame an encodable message.
    pub fn seal<T: WireEncode>(msg: &T) -> Result<Vec<u8>, PacketError> {
        let mut payload = Vec::new();
        msg.encode(&mut payload);
        if payload.len() > PACKET_MAX_SIZE {
            return Err(PacketError::TooLarge {
                size: payload.len(),
                max: PACKET_MAX_SIZE,
            });
        }

        let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
        out.extend_from_slice(&checksum_of(&payload).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend(payload);
        Ok(out)
    }

    /// Validate the frame and decode the payload.
    pub fn open<T: WireDecode>(data: &[u8]) -> Result<T, PacketError> {
        let payload = Self::validate(data)?;
        let mut offset = 0;
        Ok(T::decode(payload, &mut offset)?)
    }

    /// Validate the header against the payload and return the payload slice.
    pub fn validate(data: &[u8]) -> Result<&[u8], PacketError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::IncompleteHeader {
                need: PACKET_HEADER_SIZE,
                have: data.len(),
            });
        }
        let checksum = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let size = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;

        if (checksum & 0xff) as u8 != PACKET_MAGIC_NUM {
            return Err(PacketError::InvalidMagic((checksum & 0xff) as u8));
        }
        if size > PACKET_MAX_SIZE {
            return Err(PacketError::TooLarge {
                size,
                max: PACKET_MAX_SIZE,
            });
        }
        let payload = &data[PACKET_HEADER_SIZE..];
        if payload.len() != size {
            return Err(PacketError::Truncated {
                expect: size,
                have: payload.len(),
            });
        }

        let expected = checksum_of(payload);
        if checksum != expected {
            return Err(PacketError::ChecksumMismatch {
                expected,
                actual: checksum,
            });
        }
        Ok(payload)
    }

    /// Read the declared payload size from a raw 8-byte header.
    pub fn payload_size(header: &[u8; PACKET_HEADER_SIZE]) -> usize {
        u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize
    }
}
