mod byte_reader;
mod byte_writer;
mod error;
mod traits;

pub use byte_reader::ByteReader;
pub use byte_writer::ByteWriter;
pub use error::SerdeErr;
pub(crate) use traits::check_short_string;
pub use traits::{LongBytes, Serde};
