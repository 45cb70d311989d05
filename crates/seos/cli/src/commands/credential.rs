//! Commands for credential files

use std::fs;
use std::path::Path;

use anyhow::Context;
use seos::Credential;
use tracing::info;

use crate::utils;

/// Print a credential summary
pub fn inspect_command(path: &Path) -> anyhow::Result<()> {
    let credential = utils::load_credential(path)?;
    println!("{}", credential.summary());
    Ok(())
}

/// Convert a Seader credential file to the Seos format
pub fn convert_seader_command(input: &Path, output: &Path) -> anyhow::Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read Seader file {}", input.display()))?;
    let credential = Credential::from_seader(&text)
        .with_context(|| format!("Invalid Seader file {}", input.display()))?;
    info!(diversifier = %hex::encode(&credential.diversifier), "Imported credential");

    fs::write(output, credential.to_file_string())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Credential written to {}", output.display());
    println!("{}", credential.summary());
    Ok(())
}
