use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::*;
use utils::{CipherArg, HashArg};

#[derive(Parser)]
#[command(version, about = "SEOS CLI for credential files and offline handshakes")]
struct Cli {
    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the contents of a credential file
    Inspect {
        /// Seos credential file
        #[arg(required = true)]
        credential: PathBuf,
    },

    /// Import a Seader credential file
    ConvertSeader {
        /// Seader credential file to read
        #[arg(required = true)]
        input: PathBuf,

        /// Seos credential file to write
        #[arg(required = true)]
        output: PathBuf,
    },

    /// Print the diversified keys of a credential
    Derive {
        /// Facility keys file
        #[arg(long, required = true)]
        keys: PathBuf,

        /// Credential diversifier, as a hex string
        #[arg(long, required = true)]
        diversifier: String,

        /// Cipher suite the keys are used with
        #[arg(long, value_enum, default_value_t = CipherArg::Des)]
        cipher: CipherArg,

        /// Hash algorithm of the session
        #[arg(long, value_enum, default_value_t = HashArg::Sha1)]
        hash: HashArg,

        /// Key index selected by the reader
        #[arg(long, default_value_t = seos::constants::DEFAULT_KEY_INDEX)]
        key_index: u8,
    },

    /// Replay contactless frames through the credential emulator
    Emulate {
        /// Seos credential file
        #[arg(long, required = true)]
        credential: PathBuf,

        /// Facility keys file, not needed for captured credentials
        #[arg(long)]
        keys: Option<PathBuf>,

        /// Answer with the inspection template instead of the credential
        #[arg(long)]
        inspect: bool,

        /// Frames to feed, as hex strings including the prologue
        #[arg(required = true)]
        frames: Vec<String>,
    },

    /// Read a credential from the emulator with the reader flow
    Handshake {
        /// Seos credential file
        #[arg(long, required = true)]
        credential: PathBuf,

        /// Facility keys file
        #[arg(long, required = true)]
        keys: PathBuf,

        /// Cipher suite the emulator offers
        #[arg(long, value_enum, default_value_t = CipherArg::Des)]
        cipher: CipherArg,

        /// Hash algorithm the emulator offers
        #[arg(long, value_enum, default_value_t = HashArg::Sha1)]
        hash: HashArg,

        /// Write the captured credential here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Inspect { credential } => inspect_command(credential)?,
        Commands::ConvertSeader { input, output } => convert_seader_command(input, output)?,
        Commands::Derive {
            keys,
            diversifier,
            cipher,
            hash,
            key_index,
        } => derive_command(keys, diversifier, *cipher, *hash, *key_index)?,
        Commands::Emulate {
            credential,
            keys,
            inspect,
            frames,
        } => emulate_command(credential, keys.as_ref(), *inspect, frames)?,
        Commands::Handshake {
            credential,
            keys,
            cipher,
            hash,
            output,
        } => handshake_command(credential, keys, *cipher, *hash, output.as_ref())?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
