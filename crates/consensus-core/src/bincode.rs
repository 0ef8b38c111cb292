use bincode::config;
use bincode::de::Decode;
use bincode::error::DecodeError;

pub const STANDARD_LIMIT_16M: usize = 0x100_0000;

/// Encoding used for everything consensus related: wire messages,
/// signing payloads and database values
pub const CONSENSUS_BINCODE_CONFIG: config::Configuration<
    config::BigEndian,
    config::Varint,
    config::Limit<STANDARD_LIMIT_16M>,
> = config::standard()
    .with_limit::<STANDARD_LIMIT_16M>()
    .with_big_endian()
    .with_variable_int_encoding();

/// Decode `src`, failing if any bytes are left over
pub fn decode_whole<D: Decode<()>>(src: &[u8]) -> Result<D, DecodeError> {
    let (t, consumed) = bincode::decode_from_slice(src, CONSENSUS_BINCODE_CONFIG)?;

    if consumed != src.len() {
        return Err(DecodeError::Other("leftover bytes"));
    }

    Ok(t)
}

pub fn encode_to_vec(v: &impl bincode::Encode) -> Vec<u8> {
    bincode::encode_to_vec(v, CONSENSUS_BINCODE_CONFIG).expect("Can't fail")
}
