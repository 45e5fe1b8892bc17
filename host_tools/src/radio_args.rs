//! Radio settings shared by the sniff and tx-file tools.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use lora_sniffer_firmware::app::{parse_frequency_mhz, Mhz};
use lora_sniffer_firmware::lora::Bandwidth;

use crate::device::DeviceClient;
use crate::protocol::DeviceConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PresetArg {
    Default,
    LongRange,
    Fast,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RegionArg {
    Us915,
    Eu868,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DirectionArg {
    Uplink,
    Downlink,
}

/// Settings applied before the tool starts; anything left out keeps the device value
#[derive(Debug, Args)]
pub struct RadioArgs {
    /// Modulation preset, applied first
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,

    /// LoRaWAN region for --channel
    #[arg(long, value_enum, requires = "channel")]
    pub region: Option<RegionArg>,

    /// Link direction for --channel
    #[arg(long, value_enum, default_value = "uplink")]
    pub direction: DirectionArg,

    /// Channel number within the region's plan
    #[arg(long, requires = "region")]
    pub channel: Option<u8>,

    /// Data rate index for --channel
    #[arg(long, default_value = "0")]
    pub data_rate: u8,

    /// Frequency in MHz, e.g. 868.1
    #[arg(short, long)]
    pub frequency: Option<String>,

    /// Bandwidth chip code (0x04 = 125 kHz, 0x05 = 250 kHz, 0x06 = 500 kHz)
    #[arg(long, value_parser = parse_byte)]
    pub bandwidth: Option<u8>,

    /// Spreading factor, 5 to 12
    #[arg(long)]
    pub sf: Option<u8>,

    /// Coding rate, 1 (4/5) to 4 (4/8)
    #[arg(long)]
    pub cr: Option<u8>,
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

impl RadioArgs {
    /// Apply the requested settings and return what the device ended up with
    pub fn apply(&self, device: &mut DeviceClient) -> Result<DeviceConfig> {
        let mut config = device.config().context("GetConfig")?;

        if let Some(preset) = self.preset {
            config = device.set_preset(preset as u8).context("SetPreset")?;
        }
        if let (Some(region), Some(channel)) = (self.region, self.channel) {
            config = device
                .select_channel(region as u8, self.direction as u8, channel, self.data_rate)
                .context("SelectChannel")?;
        }
        if let Some(text) = &self.frequency {
            let hz = parse_frequency_mhz(text).map_err(|e| anyhow::anyhow!("Frequency {:?}: {:?}", text, e))?;
            config = device.set_frequency(hz).context("SetFrequency")?;
        }
        if let Some(code) = self.bandwidth {
            config = device.set_bandwidth(code).context("SetBandwidth")?;
        }
        if let Some(sf) = self.sf {
            config = device.set_spreading_factor(sf).context("SetSpreadingFactor")?;
        }
        if let Some(cr) = self.cr {
            config = device.set_coding_rate(cr).context("SetCodingRate")?;
        }

        Ok(config)
    }
}

/// Bandwidth label for a chip code
pub fn bandwidth_label(code: u8) -> &'static str {
    Bandwidth::from_code(code).map(Bandwidth::label).unwrap_or("unknown")
}

/// One-line summary of a device configuration
pub fn describe(config: &DeviceConfig) -> String {
    format!(
        "{} MHz, {}, SF{}, CR 4/{}{}",
        Mhz(config.frequency_hz),
        bandwidth_label(config.bandwidth),
        config.spreading_factor,
        config.coding_rate + 4,
        if config.low_data_rate_optimize { ", LDRO" } else { "" }
    )
}
