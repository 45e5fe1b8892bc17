//! File transmitter.
//!
//! Sends each payload of a script file in order. A line is hex or a sniff
//! log record, so a captured log can be replayed as is.

mod device;
mod protocol;
mod radio_args;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use lora_sniffer_firmware::app::ScriptLines;
use lora_sniffer_firmware::config::timing::SCRIPT_LINE_GAP_MS;

use device::{resolve_port, DeviceClient};
use radio_args::{describe, RadioArgs};

#[derive(Parser)]
#[command(name = "tx-file")]
#[command(about = "Transmit the payloads of a script file")]
struct Args {
    /// Script file: one hex payload or log record per line
    script: std::path::PathBuf,

    /// Serial port for the device (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Parse and list the payloads without transmitting
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    radio: RadioArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Reading {}", args.script.display()))?;

    // Reject a broken script before anything goes on air
    let mut payloads = Vec::new();
    for (line, payload) in ScriptLines::new(&script) {
        let payload = payload.map_err(|e| anyhow::anyhow!("{}:{}: {:?}", args.script.display(), line, e))?;
        payloads.push((line, payload));
    }
    println!("{} payloads in {}", payloads.len(), args.script.display());

    if args.dry_run {
        for (line, payload) in &payloads {
            println!("  line {:>4}: {} bytes", line, payload.len());
        }
        return Ok(());
    }

    let port = resolve_port(&args.port)?;
    let mut device = DeviceClient::new(&port, args.baud)?;
    device.drain_buffer()?;

    let config = args.radio.apply(&mut device)?;
    println!("Transmitting on {}", describe(&config));

    // Long spreading factors need time on air well past the default
    device.set_timeout(Duration::from_secs(300));

    let mut failed = 0;
    for (line, payload) in &payloads {
        print!("  line {:>4}: {} bytes ... ", line, payload.len());
        std::io::Write::flush(&mut std::io::stdout())?;

        match device.lora_tx(payload) {
            Ok(()) => println!("{}", "OK".green().bold()),
            Err(e) => {
                println!("{}", "FAIL".red().bold());
                println!("    {}", e.to_string().red());
                failed += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(SCRIPT_LINE_GAP_MS));
    }

    if failed > 0 {
        anyhow::bail!("{} of {} payloads failed", failed, payloads.len());
    }
    Ok(())
}
