use crate::foundation::error::{NodeError, Result};

pub fn strip_hex_prefix(input: &str) -> &str {
    input.strip_prefix("0x").unwrap_or(input)
}

pub fn parse_hex_array<const N: usize>(input: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(strip_hex_prefix(input.trim()))?;
    bytes.as_slice().try_into().map_err(|_| NodeError::Serialization {
        format: "hex".to_string(),
        details: format!("expected {} bytes, got {}", N, bytes.len()),
    })
}
