//! `ban_` address codec: Nano-alphabet base32 with a BLAKE2b-40 checksum.

use blake2b_simd::Params;

use crate::error::{WalletError, WalletResult};

/// Address prefix for the Banano network.
pub const ADDRESS_PREFIX: &str = "ban_";

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
const ACCOUNT_CHARS: usize = 52;
const CHECKSUM_CHARS: usize = 8;

/// Encodes a 32-byte public key as a `ban_` address.
#[must_use]
pub fn encode_address(public_key: &[u8; 32]) -> String {
    // 4 zero bits of padding bring the key to 260 bits, an even 52 chars.
    let mut payload = Vec::with_capacity(33);
    payload.push(0u8);
    payload.extend_from_slice(public_key);
    let account = encode_base32(&payload, 4);

    let mut checksum = Params::new()
        .hash_length(5)
        .hash(public_key)
        .as_bytes()
        .to_vec();
    checksum.reverse();
    let check = encode_base32(&checksum, 0);

    format!("{ADDRESS_PREFIX}{account}{check}")
}

/// Decodes a `ban_` address back to its 32-byte public key.
///
/// # Errors
///
/// Returns [`WalletError::InvalidParams`] for a bad prefix, length,
/// alphabet character, or checksum mismatch.
pub fn decode_address(address: &str) -> WalletResult<[u8; 32]> {
    let body = address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or_else(|| WalletError::InvalidParams(format!("bad address prefix: {address}")))?;
    if body.len() != ACCOUNT_CHARS + CHECKSUM_CHARS {
        return Err(WalletError::InvalidParams(format!(
            "bad address length: {address}"
        )));
    }

    let (account, check) = body.split_at(ACCOUNT_CHARS);
    let key_bits = decode_base32(account)?;
    // 260 bits decoded into 33 bytes; the top 4 bits must be padding.
    if key_bits.len() != 33 || key_bits[0] != 0 {
        return Err(WalletError::InvalidParams(format!(
            "bad address encoding: {address}"
        )));
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&key_bits[1..]);

    let mut expected = Params::new()
        .hash_length(5)
        .hash(&public_key)
        .as_bytes()
        .to_vec();
    expected.reverse();
    if encode_base32(&expected, 0) != check {
        return Err(WalletError::InvalidParams(format!(
            "address checksum mismatch: {address}"
        )));
    }

    Ok(public_key)
}

/// Returns whether `input` parses as a valid `ban_` address.
#[must_use]
pub fn is_valid_address(input: &str) -> bool {
    decode_address(input).is_ok()
}

/// Encodes bytes as 5-bit groups over the Nano alphabet, skipping
/// `skip_bits` leading bits of the input.
fn encode_base32(bytes: &[u8], skip_bits: usize) -> String {
    let total_bits = bytes.len() * 8 - skip_bits;
    debug_assert_eq!(total_bits % 5, 0);

    let mut out = String::with_capacity(total_bits / 5);
    let mut acc: u32 = 0;
    let mut acc_bits: usize = 0;
    let mut skipped = 0usize;

    for &byte in bytes {
        let mut bits = 8usize;
        let mut value = u32::from(byte);
        if skipped < skip_bits {
            let take = (skip_bits - skipped).min(8);
            bits -= take;
            value &= (1 << bits) - 1;
            skipped += take;
        }
        acc = (acc << bits) | value;
        acc_bits += bits;
        while acc_bits >= 5 {
            acc_bits -= 5;
            let index = ((acc >> acc_bits) & 0x1F) as usize;
            out.push(ALPHABET[index] as char);
        }
    }
    out
}

/// Decodes a Nano-alphabet base32 string into bytes, left-padded with zero
/// bits to a whole number of bytes.
fn decode_base32(input: &str) -> WalletResult<Vec<u8>> {
    let total_bits = input.len() * 5;
    let pad_bits = (8 - total_bits % 8) % 8;
    let mut out = Vec::with_capacity((total_bits + pad_bits) / 8);
    let mut acc: u32 = 0;
    let mut acc_bits = pad_bits;

    for c in input.chars() {
        let index = ALPHABET
            .iter()
            .position(|&a| a as char == c)
            .ok_or_else(|| {
                WalletError::InvalidParams(format!("invalid base32 character: {c}"))
            })?;
        acc = (acc << 5) | index as u32;
        acc_bits += 5;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push(((acc >> acc_bits) & 0xFF) as u8);
        }
    }
    Ok(out)
}
