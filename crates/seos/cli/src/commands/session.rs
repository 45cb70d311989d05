//! Commands that run the protocol engines in memory

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use seos::{
    Bytes, Emulator, EmulatorConfig, EmulatorMode, EventLog, Reader, SessionControl,
};
use tracing::{debug, info};

use crate::utils::{self, CipherArg, HashArg};

/// Block prologue prepended to every APDU of the offline handshake
const I_BLOCK_PCB: u8 = 0x02;

/// Feed frames to the emulator and print its answers
pub fn emulate_command(
    credential: &Path,
    keys: Option<&PathBuf>,
    inspect: bool,
    frames: &[String],
) -> anyhow::Result<()> {
    let credential = utils::load_credential(credential)?;
    let facility = keys.map(|path| utils::load_facility_keys(path)).transpose()?;
    let config = EmulatorConfig {
        mode: if inspect {
            EmulatorMode::Inspect
        } else {
            EmulatorMode::Credential
        },
        ..Default::default()
    };

    let events = EventLog::new();
    let mut emulator = Emulator::new(credential, facility, config).with_sink(events.clone());

    for frame in frames {
        let frame = utils::parse_hex(frame)?;
        let reply = emulator.handle_frame(&frame);
        println!("> {}", utils::format_hex(&frame));
        match &reply.frame {
            Some(answer) => println!("< {}", utils::format_hex(answer)),
            None => println!("< (no answer)"),
        }
        for event in events.take() {
            println!("  event: {event:?}");
        }
        if reply.session == SessionControl::Stop {
            info!("Emulator ended the session");
            break;
        }
    }
    debug!(state = ?emulator.state(), "Emulation finished");
    Ok(())
}

/// Run the reader flow against the emulator and print the SIO it releases
pub fn handshake_command(
    credential: &Path,
    keys: &Path,
    cipher: CipherArg,
    hash: HashArg,
    output: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let credential = utils::load_credential(credential)?;
    let facility = utils::load_facility_keys(keys)?;
    let config = EmulatorConfig {
        cipher: cipher.into(),
        hash: hash.into(),
        mode: EmulatorMode::Credential,
    };

    let events = EventLog::new();
    let mut emulator =
        Emulator::new(credential, Some(facility.clone()), config).with_sink(events.clone());
    let mut reader = Reader::new(facility);

    let captured = reader
        .read_credential(|apdu: &[u8]| {
            let mut frame = Vec::with_capacity(apdu.len() + 1);
            frame.push(I_BLOCK_PCB);
            frame.extend_from_slice(apdu);
            debug!(frame = %hex::encode(&frame), "Reader sends");
            let answer = emulator
                .handle_frame(&frame)
                .frame
                .ok_or(seos::Error::ProtocolMismatch("no answer from credential"))?;
            Ok::<Bytes, seos::Error>(answer.slice(1..))
        })
        .context("Handshake failed")?;

    println!("Handshake complete ({cipher}, {hash})");
    println!(
        "Events: {}",
        events
            .events()
            .iter()
            .map(|event| format!("{event:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("SIO: {}", utils::format_hex(&captured.sio));

    if let Some(path) = output {
        fs::write(path, captured.to_file_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Captured credential written to {}", path.display());
    }
    Ok(())
}
