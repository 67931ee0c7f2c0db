mod error;
mod opcode;
mod packet;
mod payload;

pub use error::PacketError;
pub use opcode::Opcode;
pub use packet::Packet;
pub use payload::Payload;
