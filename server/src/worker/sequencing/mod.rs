mod inbound;
mod outbound;

pub use inbound::InboundSequencer;
pub use outbound::OutboundSequencer;
