//! Checksum Module
//!
//! CRC-32 (IEEE, the zlib/Ethernet polynomial) over byte buffers. Both ends
//! of the wire must agree bit-for-bit, so everything goes through the same
//! one-shot helper.

/// Compute the CRC-32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
