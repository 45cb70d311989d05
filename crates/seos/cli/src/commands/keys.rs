//! Commands for key diversification

use std::path::Path;

use anyhow::Context;

use crate::utils::{self, CipherArg, HashArg};

/// Print the keys a credential derives from the facility keys
pub fn derive_command(
    keys: &Path,
    diversifier: &str,
    cipher: CipherArg,
    hash: HashArg,
    key_index: u8,
) -> anyhow::Result<()> {
    let facility = utils::load_facility_keys(keys)?;
    let diversifier = utils::parse_hex(diversifier)?;

    let derived = facility
        .derive_keys(&diversifier, cipher.into(), hash.into(), key_index)
        .context("Key derivation failed")?;

    println!("Cipher: {cipher}, hash: {hash}, key index: {key_index}");
    println!("Priv Key: {}", utils::format_hex(&derived.priv_key));
    println!("Auth Key: {}", utils::format_hex(&derived.auth_key));
    Ok(())
}
