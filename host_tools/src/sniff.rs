//! Sniff logger.
//!
//! Configures the device, then writes one JSON record per received packet
//! to stdout and, optionally, appends it to a log file.

mod device;
mod protocol;
mod radio_args;

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Local, Timelike};
use clap::Parser;
use colored::Colorize;

use lora_sniffer_firmware::app::{PacketRecord, RecordTimestamp};
use lora_sniffer_firmware::lora::Bandwidth;

use device::{resolve_port, DeviceClient};
use radio_args::{describe, RadioArgs};

#[derive(Parser)]
#[command(name = "sniff")]
#[command(about = "Log received LoRa packets")]
struct Args {
    /// Serial port for the device (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Append records to this file
    #[arg(short, long)]
    log: Option<std::path::PathBuf>,

    /// Stop after this many packets
    #[arg(short = 'n', long)]
    count: Option<usize>,

    #[command(flatten)]
    radio: RadioArgs,
}

fn now() -> RecordTimestamp {
    let t = Local::now();
    RecordTimestamp {
        year: t.year() as u16,
        month: t.month() as u8,
        day: t.day() as u8,
        hour: t.hour() as u8,
        minute: t.minute() as u8,
        second: t.second() as u8,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let port = resolve_port(&args.port)?;

    let mut device = DeviceClient::new(&port, args.baud)?;
    device.drain_buffer()?;

    let config = args.radio.apply(&mut device)?;
    eprintln!("{} {} on {}", "Sniffing".bold(), describe(&config), port);

    let bandwidth = Bandwidth::from_code(config.bandwidth)
        .with_context(|| format!("Device reports unknown bandwidth code 0x{:02x}", config.bandwidth))?;

    let mut log_file = match &args.log {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening {}", path.display()))?,
        ),
        None => None,
    };

    let mut received = 0usize;
    while args.count.map_or(true, |count| received < count) {
        let Some(frame) = device.next_rx_frame(Duration::from_secs(1))? else {
            continue;
        };
        received += 1;

        let record = PacketRecord {
            timestamp: now(),
            frequency_hz: config.frequency_hz,
            bandwidth,
            spreading_factor: config.spreading_factor,
            rssi: frame.rssi,
            payload: &frame.data,
        };

        println!("{}", record);
        if let Some(file) = log_file.as_mut() {
            writeln!(file, "{}", record)?;
            file.flush()?;
        }
        eprintln!(
            "  {} {} bytes, SNR {} dB",
            format!("#{}", received).cyan(),
            frame.data.len(),
            frame.snr
        );
    }

    Ok(())
}
