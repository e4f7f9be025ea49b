//! Header integrity fields
//!
//! A dex header carries two digests of the file itself: a SHA-1 signature of
//! everything after the signature field, and an Adler-32 checksum of
//! everything after the checksum field (which therefore covers the
//! signature). The signature must be written before the checksum is
//! computed.

use crate::parser::HEADER_SIZE;
use crate::{Error, Result};
use adler32::RollingAdler32;
use sha1::{Digest, Sha1};

pub const CHECKSUM_OFFSET: usize = 8;
pub const SIGNATURE_OFFSET: usize = 12;
/// First byte covered by the signature
pub const SIGNATURE_DOMAIN_START: usize = 32;

fn check_len(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(Error::InvalidDex(format!(
            "{} bytes is too short to hold a header",
            bytes.len()
        )));
    }
    Ok(())
}

/// SHA-1 over bytes `[32..]`
pub fn compute_signature(bytes: &[u8]) -> Result<[u8; 20]> {
    check_len(bytes)?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes[SIGNATURE_DOMAIN_START..]);
    let mut signature = [0u8; 20];
    signature.copy_from_slice(&hasher.finalize());
    Ok(signature)
}

/// Adler-32 over the signature followed by bytes `[32..]`
///
/// The signature is fed from `signature` rather than from the buffer, so the
/// result is correct even before the signature has been stored.
pub fn compute_checksum(bytes: &[u8], signature: &[u8; 20]) -> Result<u32> {
    check_len(bytes)?;
    let mut adler = RollingAdler32::new();
    adler.update_buffer(signature);
    adler.update_buffer(&bytes[SIGNATURE_DOMAIN_START..]);
    Ok(adler.hash())
}

/// Compute both digests and store them in the header
pub fn write_integrity_fields(bytes: &mut [u8]) -> Result<()> {
    let signature = compute_signature(bytes)?;
    let checksum = compute_checksum(bytes, &signature)?;
    bytes[SIGNATURE_OFFSET..SIGNATURE_DOMAIN_START].copy_from_slice(&signature);
    bytes[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Whether the stored signature and checksum match the content
pub fn verify(bytes: &[u8]) -> Result<bool> {
    let signature = compute_signature(bytes)?;
    let checksum = compute_checksum(bytes, &signature)?;
    let stored_checksum = u32::from_le_bytes([
        bytes[CHECKSUM_OFFSET],
        bytes[CHECKSUM_OFFSET + 1],
        bytes[CHECKSUM_OFFSET + 2],
        bytes[CHECKSUM_OFFSET + 3],
    ]);
    Ok(bytes[SIGNATURE_OFFSET..SIGNATURE_DOMAIN_START] == signature && stored_checksum == checksum)
}
