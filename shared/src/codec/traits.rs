use super::{ByteReader, ByteWriter, SerdeErr};

/// Binary (de)serialization for wire types
pub trait Serde: Sized {
    fn ser(&self, writer: &mut ByteWriter);

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr>;
}

impl Serde for u8 {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u8(*self);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        reader.read_u8()
    }
}

impl Serde for u32 {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u32(*self);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        reader.read_u32()
    }
}

/// Longest string a u16 length prefix can frame
pub const MAX_SHORT_STRING: usize = u16::MAX as usize;

/// Rejects strings too long for `String`'s u16 length prefix
pub fn check_short_string(field: &'static str, value: &str) -> Result<(), SerdeErr> {
    if value.len() > MAX_SHORT_STRING {
        return Err(SerdeErr::TooLong {
            field,
            len: value.len(),
            max: MAX_SHORT_STRING,
        });
    }
    Ok(())
}

// Short strings: u16 length prefix. Callers check the length with
// `check_short_string` before encoding.
impl Serde for String {
    fn ser(&self, writer: &mut ByteWriter) {
        let bytes = self.as_bytes();
        debug_assert!(bytes.len() <= MAX_SHORT_STRING);
        writer.write_u16(bytes.len() as u16);
        writer.write_bytes(bytes);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let len = reader.read_u16()? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerdeErr::InvalidUtf8)
    }
}

/// Opaque blob with a u32 length prefix
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LongBytes(pub Vec<u8>);

impl Serde for LongBytes {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.0.len() as u32);
        writer.write_bytes(&self.0);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let len = reader.read_u32()? as usize;
        Ok(LongBytes(reader.read_bytes(len)?.to_vec()))
    }
}
