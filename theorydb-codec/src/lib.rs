//! TheoryDB Codec - Values and Cursors
//!
//! Converts language values to and from typed attribute values under a
//! frozen model descriptor, and encodes pagination cursors into their
//! byte-stable token form. The codec never performs I/O and never suspends;
//! every conversion copies, so decoded values share no storage with their
//! inputs.

mod canonical;
mod cursor;
mod decode;
mod encode;

pub use canonical::canonical_json;
pub use cursor::Cursor;
pub use decode::{decode, decode_item};
pub use encode::{encode, encode_to_item, item_key, key_item, EncodedItem};
