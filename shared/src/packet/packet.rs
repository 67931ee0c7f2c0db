use serde_json::Value;

use crate::{
    codec::{check_short_string, ByteReader, ByteWriter, LongBytes, Serde, SerdeErr},
    types::{RequestId, SequenceNumber},
    wrapping_number::SEQUENCE_MASK,
    ChannelId,
};

use super::{Opcode, PacketError, Payload};

const FLAG_REQUEST_ID: u8 = 0x01;
const FLAG_IDENTITY: u8 = 0x02;
const FLAG_CODED_OPCODE: u8 = 0x04;
const FLAG_PAYLOAD_JSON: u8 = 0x08;
const FLAG_PAYLOAD_BINARY: u8 = 0x10;
const KNOWN_FLAGS: u8 =
    FLAG_REQUEST_ID | FLAG_IDENTITY | FLAG_CODED_OPCODE | FLAG_PAYLOAD_JSON | FLAG_PAYLOAD_BINARY;

const NEW_GENERATION_BIT: u32 = 0x8000_0000;

/// Envelope for every message sent between channels.
///
/// Wire layout, in order: flags byte; 32-bit sequence word whose top bit is
/// the new-generation hint; sender channel id (u16 length prefix); identity
/// JSON (u32 length prefix, if flagged); opcode (a single byte for
/// acks/errors/pings, a u16-prefixed string otherwise); request id (if
/// flagged); payload (u32 length prefix, JSON or binary, if flagged).
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sequence: SequenceNumber,
    pub new_generation: bool,
    pub source: ChannelId,
    pub identity: Option<Value>,
    pub opcode: Opcode,
    pub request_id: Option<RequestId>,
    pub payload: Payload,
}

impl Packet {
    pub fn new(source: ChannelId, opcode: Opcode, payload: Payload) -> Self {
        Self {
            sequence: 0,
            new_generation: false,
            source,
            identity: None,
            opcode,
            request_id: None,
            payload,
        }
    }

    pub fn ping(source: ChannelId) -> Self {
        Self::new(source, Opcode::Ping, Payload::Empty)
    }

    /// A named message that expects a response
    pub fn is_request(&self) -> bool {
        matches!(self.opcode, Opcode::Message(_)) && self.request_id.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.opcode.is_response()
    }

    /// Fails when the sender id or message name is too long to frame
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let source = self.source.to_string();
        check_short_string("sender id", &source)?;
        if let Opcode::Message(name) = &self.opcode {
            check_short_string("message name", name)?;
        }
        let mut writer = ByteWriter::new();
        self.ser(&source, &mut writer);
        Ok(writer.to_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut reader = ByteReader::new(bytes);
        let packet = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(packet)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.request_id.is_some() {
            flags |= FLAG_REQUEST_ID;
        }
        if self.identity.is_some() {
            flags |= FLAG_IDENTITY;
        }
        if self.opcode.code().is_some() {
            flags |= FLAG_CODED_OPCODE;
        }
        match self.payload {
            Payload::Empty => {}
            Payload::Json(_) => flags |= FLAG_PAYLOAD_JSON,
            Payload::Binary(_) => flags |= FLAG_PAYLOAD_BINARY,
        }
        flags
    }

    fn ser(&self, source: &str, writer: &mut ByteWriter) {
        let flags = self.flags();
        flags.ser(writer);

        let mut sequence_word = self.sequence & SEQUENCE_MASK;
        if self.new_generation {
            sequence_word |= NEW_GENERATION_BIT;
        }
        sequence_word.ser(writer);

        source.to_string().ser(writer);

        if let Some(identity) = &self.identity {
            LongBytes(identity.to_string().into_bytes()).ser(writer);
        }

        match (&self.opcode, self.opcode.code()) {
            (_, Some(code)) => code.ser(writer),
            (Opcode::Message(name), None) => name.ser(writer),
            // only named messages lack a code
            (_, None) => {}
        }

        if let Some(request_id) = self.request_id {
            request_id.ser(writer);
        }

        match &self.payload {
            Payload::Empty => {}
            Payload::Json(value) => LongBytes(value.to_string().into_bytes()).ser(writer),
            Payload::Binary(bytes) => LongBytes(bytes.clone()).ser(writer),
        }
    }

    fn read(reader: &mut ByteReader) -> Result<Self, PacketError> {
        let flags = u8::de(reader)?;
        if flags & !KNOWN_FLAGS != 0
            || (flags & FLAG_PAYLOAD_JSON != 0 && flags & FLAG_PAYLOAD_BINARY != 0)
        {
            return Err(SerdeErr::InvalidValue {
                field: "flags",
                value: u32::from(flags),
            }
            .into());
        }

        let sequence_word = u32::de(reader)?;
        let new_generation = sequence_word & NEW_GENERATION_BIT != 0;
        let sequence = sequence_word & SEQUENCE_MASK;

        let source = ChannelId::parse(&String::de(reader)?)?;

        let identity = if flags & FLAG_IDENTITY != 0 {
            Some(read_json(reader, "identity")?)
        } else {
            None
        };

        let opcode = if flags & FLAG_CODED_OPCODE != 0 {
            Opcode::from_code(u8::de(reader)?)?
        } else {
            Opcode::Message(String::de(reader)?)
        };

        let request_id = if flags & FLAG_REQUEST_ID != 0 {
            Some(u32::de(reader)?)
        } else {
            None
        };

        let payload = if flags & FLAG_PAYLOAD_JSON != 0 {
            Payload::Json(read_json(reader, "payload")?)
        } else if flags & FLAG_PAYLOAD_BINARY != 0 {
            Payload::Binary(LongBytes::de(reader)?.0)
        } else {
            Payload::Empty
        };

        Ok(Self {
            sequence,
            new_generation,
            source,
            identity,
            opcode,
            request_id,
            payload,
        })
    }
}

fn read_json(reader: &mut ByteReader, field: &'static str) -> Result<Value, PacketError> {
    let LongBytes(bytes) = LongBytes::de(reader)?;
    serde_json::from_slice(&bytes).map_err(|err| PacketError::InvalidJson {
        field,
        reason: err.to_string(),
    })
}
