//! Password scrambles for `mysql_native_password` and
//! `caching_sha2_password`.

use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use yacht_core::ClientSecret;

use super::handshake::SCRAMBLE_LEN;

pub const NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// caching_sha2 "auth more data" status bytes.
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
pub const PERFORM_FULL_AUTH: u8 = 0x04;

/// A fresh scramble of printable, non-NUL bytes.
pub fn generate_scramble() -> [u8; SCRAMBLE_LEN] {
    let mut scramble = [0u8; SCRAMBLE_LEN];
    rand::rng().fill_bytes(&mut scramble);
    for byte in &mut scramble {
        *byte = 0x21 + (*byte % 0x5E);
    }
    scramble
}

/// `SHA1(SHA1(password))`, the stored form of a native password.
pub fn native_hash(password: &[u8]) -> [u8; 20] {
    Sha1::digest(Sha1::digest(password)).into()
}

/// Client-side native token: `SHA1(pw) XOR SHA1(scramble + SHA1(SHA1(pw)))`.
pub fn native_token(password: &[u8], scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);
    let mix = Sha1::new()
        .chain_update(&scramble[..SCRAMBLE_LEN.min(scramble.len())])
        .chain_update(stage2)
        .finalize();
    stage1.iter().zip(mix.iter()).map(|(a, b)| a ^ b).collect()
}

/// Client-side caching_sha2 token:
/// `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) + scramble)`.
pub fn caching_sha2_token(password: &[u8], scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha256::digest(password);
    let stage2 = Sha256::digest(stage1);
    let mix = Sha256::new()
        .chain_update(stage2)
        .chain_update(&scramble[..SCRAMBLE_LEN.min(scramble.len())])
        .finalize();
    stage1.iter().zip(mix.iter()).map(|(a, b)| a ^ b).collect()
}

/// Token for whichever plugin the server asked for. Unknown plugins get a
/// native token; the server will switch if it disagrees.
pub fn token_for_plugin(plugin: &str, password: &[u8], scramble: &[u8]) -> Vec<u8> {
    match plugin {
        CACHING_SHA2_PASSWORD => caching_sha2_token(password, scramble),
        _ => native_token(password, scramble),
    }
}

/// Check a client's native token against the configured secret.
pub fn verify_native(secret: &ClientSecret, scramble: &[u8], response: &[u8]) -> bool {
    let stored = match secret {
        ClientSecret::Password(password) if password.is_empty() => return response.is_empty(),
        ClientSecret::Password(password) => native_hash(password.as_bytes()),
        ClientSecret::NativeHash(hash) => *hash,
    };
    if response.len() != 20 {
        return false;
    }

    let mix = Sha1::new()
        .chain_update(&scramble[..SCRAMBLE_LEN.min(scramble.len())])
        .chain_update(stored)
        .finalize();
    let stage1: Vec<u8> = response.iter().zip(mix.iter()).map(|(a, b)| a ^ b).collect();
    let candidate = Sha1::digest(&stage1);

    candidate
        .iter()
        .zip(stored.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
