pub mod content;
pub mod packet;
pub mod wire;

pub use content::{
    decode_metrics, encode_metrics, swap_content_type, CONTENT_TYPE_ALL, CONTENT_TYPE_BIN,
    CONTENT_TYPE_JSON,
};
pub use packet::{Packet, PacketError, PACKET_HEADER_SIZE, PACKET_MAX_SIZE};
pub use wire::{WireDecode, WireEncode, WireError};
