//! Relay keypair loading (§6): real key generation and signing are an
//! external collaborator per `SPEC_FULL.md` §1. This loads (or, on first
//! run, materializes) the raw `key.seed`/`key.pub` byte files and exposes
//! the public half as the hex string share-tokens are checked against.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::paths::RelayPaths;

const SEED_LEN: usize = 32;

/// Writes a fresh `key.seed`/`key.pub` pair if neither file exists yet.
/// Leaves an existing pair untouched.
pub fn ensure_keypair(paths: &RelayPaths) -> std::io::Result<()> {
    if paths.key_seed().exists() && paths.key_pub().exists() {
        return Ok(());
    }
    let seed = fresh_seed();
    let public = derive_public(&seed);
    std::fs::write(paths.key_seed(), seed)?;
    std::fs::write(paths.key_pub(), public)?;
    Ok(())
}

/// Loads the public key and returns it hex-encoded, the form
/// `ConnHandlerConfig::own_relay_pubkey` expects.
pub fn load_public_hex(paths: &RelayPaths) -> std::io::Result<String> {
    let bytes = std::fs::read(paths.key_pub())?;
    Ok(hex::encode(bytes))
}

fn fresh_seed() -> [u8; SEED_LEN] {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let mut seed = [0u8; SEED_LEN];
    for (i, byte) in seed.iter_mut().enumerate() {
        let shift = ((i % 16) * 4) as u32;
        *byte = (nanos.wrapping_shr(shift) ^ (i as u128).wrapping_mul(0x9E3779B9)) as u8;
    }
    seed
}

/// A placeholder public-key derivation: the real scheme is an external
/// collaborator, so this only needs to be a stable function of the seed.
fn derive_public(seed: &[u8; SEED_LEN]) -> [u8; SEED_LEN] {
    let mut public = *seed;
    for byte in public.iter_mut() {
        *byte ^= 0xA5;
    }
    public
}
