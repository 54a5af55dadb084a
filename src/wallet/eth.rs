//! EVM address and personal-sign helpers on top of k256 + keccak.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// EIP-191 `personal_sign` digest.
pub fn eip191_personal_sign_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> Result<String, String> {
    let encoded = key.to_encoded_point(false);
    let pubkey = encoded.as_bytes();
    if pubkey.len() != 65 || pubkey[0] != 0x04 {
        return Err("unexpected public key format".to_string());
    }

    let digest = keccak256(&pubkey[1..]);
    Ok(format!("0x{}", encode_hex_lower(&digest[12..])))
}

/// Sign `message` EIP-191 style; returns `r || s || v` with `v` in {27, 28}.
pub fn sign_personal(key: &SigningKey, message: &[u8]) -> Result<[u8; 65], String> {
    let prehash = eip191_personal_sign_hash(message);
    let (sig, recid) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| format!("ECDSA signing failed: {e}"))?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte() + 27;
    Ok(out)
}

/// Recover the lowercase address that produced a personal-sign signature.
pub fn recover_personal_signer(message: &[u8], signature: &[u8]) -> Result<String, String> {
    if signature.len() != 65 {
        return Err("signature must be 65 bytes".to_string());
    }
    let sig = EcdsaSignature::try_from(&signature[..64])
        .map_err(|e| format!("invalid ECDSA signature bytes: {e}"))?;
    let recovery_id = normalize_recovery_id(signature[64])?;
    let prehash = eip191_personal_sign_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| format!("failed recovering signer from signature: {e}"))?;
    address_from_verifying_key(&verifying_key)
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, String> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => return Err("signature recovery id must be 0/1 or 27/28".to_string()),
    };
    RecoveryId::try_from(id).map_err(|_| "signature recovery id is invalid".to_string())
}

/// Lowercase a `0x`-prefixed 20-byte address, or `None` if malformed.
pub fn normalize_wallet_address(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return None;
    }
    let hex = &trimmed[2..];
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Decode hex with an optional `0x` prefix.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    let trimmed = value.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex.is_empty() {
        return Err("hex string is empty".to_string());
    }
    if !hex.len().is_multiple_of(2) {
        return Err("hex string must have an even number of characters".to_string());
    }

    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks_exact(2) {
        let hi = decode_hex_nibble(pair[0]).ok_or_else(|| "invalid hex character".to_string())?;
        let lo = decode_hex_nibble(pair[1]).ok_or_else(|| "invalid hex character".to_string())?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

pub fn encode_hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0x0f));
    }
    out
}

fn nibble_to_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        10..=15 => (b'a' + (nibble - 10)) as char,
        _ => '0',
    }
}
