//! Bencoding, the serialization used by `.torrent` files and HTTP tracker
//! responses.

mod decoder;
mod encoder;
mod value;

pub use decoder::{decode, dict_value_span};
pub use encoder::encode;
pub use value::Value;
