//! Kasa "autokey" XOR cipher
//!
//! Every byte is XORed with the previous *ciphertext* byte, the first one with
//! [`INITIAL_KEY`]. The same chaining is used in both directions, so a decoder
//! can start anywhere a ciphertext byte is known.

/// Seed of the key chain
pub const INITIAL_KEY: u8 = 171;

/// Size of the optional big-endian length prefix
pub const HEADER_LEN: usize = 4;

/// Encrypt `plain` without a length header.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len());
    let mut key = INITIAL_KEY;
    for &byte in plain {
        key ^= byte;
        out.push(key);
    }
    out
}

/// Decrypt a headerless ciphertext.
pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cipher.len());
    let mut key = INITIAL_KEY;
    for &byte in cipher {
        out.push(byte ^ key);
        key = byte;
    }
    out
}

/// Encrypt `plain`, optionally prefixed with its length as a big-endian u32.
pub fn encode(plain: &[u8], with_header: bool) -> Vec<u8> {
    if !with_header {
        return encrypt(plain);
    }
    let mut out = Vec::with_capacity(HEADER_LEN + plain.len());
    out.extend_from_slice(&(plain.len() as u32).to_be_bytes());
    out.extend_from_slice(&encrypt(plain));
    out
}

/// Decode a message received from the network.
///
/// With `has_header`, anything up to the header size decodes to nothing. A
/// declared length larger than what follows the header means the prefix was not
/// a header after all, and the whole buffer is decrypted as headerless payload.
pub fn decode(data: &[u8], has_header: bool) -> Vec<u8> {
    if !has_header {
        return decrypt(data);
    }
    if data.len() <= HEADER_LEN {
        return Vec::new();
    }

    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[HEADER_LEN..];
    match body.get(..declared) {
        Some(payload) => decrypt(payload),
        None => decrypt(data),
    }
}
