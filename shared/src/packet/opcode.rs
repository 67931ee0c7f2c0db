// What a packet asks its receiver to do

use crate::codec::SerdeErr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    // A named message, dispatched to the receiver's handler table
    Message(String),
    // Successful response to a request, correlated by request id
    Ack,
    // Error response to a request; payload holds the error code string
    Err,
    // Exchange round-trip probe a server sends to itself
    Ping,
}

impl Opcode {
    pub fn message(name: &str) -> Self {
        Opcode::Message(name.to_string())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Opcode::Message(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Opcode::Ack | Opcode::Err)
    }

    /// Small-integer form; named messages have none and are written as strings
    pub(crate) fn code(&self) -> Option<u8> {
        match self {
            Opcode::Message(_) => None,
            Opcode::Ack => Some(1),
            Opcode::Err => Some(2),
            Opcode::Ping => Some(3),
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, SerdeErr> {
        match code {
            1 => Ok(Opcode::Ack),
            2 => Ok(Opcode::Err),
            3 => Ok(Opcode::Ping),
            // SECURITY: Malformed packets could carry any byte here
            other => Err(SerdeErr::InvalidValue {
                field: "opcode",
                value: u32::from(other),
            }),
        }
    }
}
