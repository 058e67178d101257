//! Lightweight, non-cryptographic corruption detectors.

/// XOR of every byte.  Guards the config record.
pub fn xor8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// XOR each byte into a 16-bit accumulator, rotating it left by one after
/// every byte.  Guards scene entries and the scene table.
pub fn rotate_xor16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| (acc ^ u16::from(b)).rotate_left(1))
}
