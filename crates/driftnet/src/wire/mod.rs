mod buffer;
mod codec;
mod normals;

pub use buffer::{WireError, WireReader, WireWriter, f16_to_f32, f32_to_f16};
pub use codec::{
    CodecConfig, FieldMask, OBJECT_HEADER_BYTES, ObjectDelta, VectorPrecision, decode_object,
    encode_full, encode_object,
};
pub use normals::{NORMAL_COUNT, NORMAL_TABLE, byte_to_dir, dir_to_byte};
