//! Serial-connected mmWave radar

mod link;
mod protocol;
mod worker;

pub use link::{RadarLink, SerialLink, SyntheticRadarLink};
pub use protocol::{
    encode_packet, parse_packet, PacketParser, ParserStats, RadarPacket, HEADER_LEN, MAGIC_WORD,
};
pub use worker::RadarWorker;
