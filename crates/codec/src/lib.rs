//! `cardrecon-codec`: partner batch file codec.
//!
//! Partner files are ASCII, one record per line, tagged by their first
//! character (`H` header, `D` detail, `T` trailer). Column layouts are data,
//! not types: [`PartnerLayout`] describes one partner's columns and a single
//! generic [`Decoder`] / [`encode`] pair consumes it.

pub mod decode;
pub mod encode;
pub mod error;
pub mod layout;
pub mod record;

pub use decode::Decoder;
pub use encode::encode;
pub use error::{CodecError, CodecResult};
pub use layout::{AmountFormat, ColumnSpec, Encoding, Field, PartnerLayout};
pub use record::{BatchFile, DecodeWarning, DetailRecord, Header, RecordKind, Trailer};
