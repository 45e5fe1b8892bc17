//! Single-device test cases.

use anyhow::{bail, Result};
use colored::Colorize;

use crate::device::DeviceClient;
use crate::protocol::{build_command_payload, cobs_encode, CommandId, ResponseId, ResponseStatus};

type Case = fn(&mut DeviceClient) -> Result<()>;

/// Cases run in order; each one leaves the radio on the default preset at 915 MHz
const CASES: [(&str, Case); 11] = [
    ("GetVersion returns version bytes", test_get_version),
    ("Unknown command id is rejected", test_invalid_command),
    ("Back to back queries", test_repeated_queries),
    ("Corrupt CRC returns CrcError", test_bad_crc),
    ("GetConfig returns radio settings", test_get_config),
    ("SetFrequency lands on the PLL grid", test_set_frequency),
    ("Out of range values are rejected", test_invalid_parameters),
    ("SF11 and up enable LDRO", test_ldro_follows_sf),
    ("SelectChannel tunes EU868 RX2", test_select_channel),
    ("SetPacketParams is echoed", test_packet_params),
    ("Transmit completes", test_transmit),
];

pub struct TestResult {
    pub name: &'static str,
    pub outcome: Result<(), String>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run every case, reporting each as it finishes
pub fn run_all_tests(device: &mut DeviceClient) -> Vec<TestResult> {
    CASES
        .iter()
        .map(|&(name, case)| {
            print!("  {} ... ", name);
            std::io::Write::flush(&mut std::io::stdout()).ok();

            let outcome = case(device).map_err(|e| format!("{:#}", e));
            match &outcome {
                Ok(()) => println!("{}", "PASS".green().bold()),
                Err(msg) => println!("{}\n    {}", "FAIL".red().bold(), msg.red()),
            }
            TestResult { name, outcome }
        })
        .collect()
}

pub fn print_results(results: &[TestResult]) {
    let rule = "=".repeat(60);
    println!("\n{}\n{}\n{}", rule, "Test Results".bold(), rule);

    for result in results {
        match &result.outcome {
            Ok(()) => println!("  {} {}", "[PASS]".green().bold(), result.name),
            Err(msg) => {
                println!("  {} {}", "[FAIL]".red().bold(), result.name);
                println!("         {}", msg.red());
            }
        }
    }

    let failed = results.iter().filter(|r| !r.passed()).count();
    let passed = results.len() - failed;
    let failed_text = if failed > 0 {
        failed.to_string().red()
    } else {
        failed.to_string().normal()
    };
    println!("{}", "-".repeat(60));
    println!("  Total: {} passed, {} failed", passed.to_string().green(), failed_text);
    println!("{}", rule);
}

/// Put the radio back where every case expects to find it
fn restore_defaults(device: &mut DeviceClient) -> Result<()> {
    device.set_preset(0)?;
    device.set_frequency(915_000_000)?;
    device.set_packet_params(12, false, 255, false, false)?;
    Ok(())
}

fn expect_status(device: &mut DeviceClient, cmd: CommandId, payload: &[u8], status: ResponseStatus) -> Result<()> {
    let response = device.send_command(cmd, payload)?;
    match response.error() {
        Some((Ok(got), id)) if got == status && id == cmd as u8 => Ok(()),
        other => bail!("{:?} {:02x?}: expected {:?}, got {:?}", cmd, payload, status, other),
    }
}

fn test_get_version(device: &mut DeviceClient) -> Result<()> {
    let (major, minor, patch) = device.version()?;
    print!("(v{}.{}.{}) ", major, minor, patch);
    Ok(())
}

fn test_invalid_command(device: &mut DeviceClient) -> Result<()> {
    // 0xFF is the Error response id, so 0xFE is the highest unused command byte
    let response = device.send_raw_command(0xFE, &[])?;
    match response.error() {
        Some((Ok(ResponseStatus::InvalidCommand), 0xFE)) => Ok(()),
        Some((status, cmd)) => bail!("Expected InvalidCommand for 0xfe, got {:?} for 0x{:02x}", status, cmd),
        None => bail!("Expected Error response, got {:?}", response.resp_id),
    }
}

fn test_repeated_queries(device: &mut DeviceClient) -> Result<()> {
    for i in 0..5 {
        let (id, expected) = if i % 2 == 0 {
            (CommandId::GetVersion, ResponseId::Version)
        } else {
            (CommandId::GetConfig, ResponseId::Config)
        };
        let response = device.send_command(id, &[])?;
        if response.resp_id != expected {
            bail!("Query {} ({:?}) answered {:?}", i + 1, id, response.resp_id);
        }
    }
    Ok(())
}

fn test_bad_crc(device: &mut DeviceClient) -> Result<()> {
    let mut raw = build_command_payload(CommandId::GetConfig as u8, &[]);
    let last = raw.len() - 1;
    raw[last] ^= 0x5A;

    let response = device.send_encoded(&cobs_encode(&raw))?;
    match response.error() {
        Some((Ok(ResponseStatus::CrcError), _)) => Ok(()),
        other => bail!("Expected CrcError, got {:?}", other),
    }
}

fn test_get_config(device: &mut DeviceClient) -> Result<()> {
    let config = device.config()?;
    if !(150_000_000..=960_000_000).contains(&config.frequency_hz) {
        bail!("Frequency {} outside the radio's range", config.frequency_hz);
    }
    if !(5..=12).contains(&config.spreading_factor) {
        bail!("Spreading factor {} out of range", config.spreading_factor);
    }
    print!("({} Hz, SF{}) ", config.frequency_hz, config.spreading_factor);
    Ok(())
}

fn test_set_frequency(device: &mut DeviceClient) -> Result<()> {
    // 868.1 MHz is not a whole number of PLL steps
    let config = device.set_frequency(868_100_000)?;
    if config.frequency_hz.abs_diff(868_100_000) > 1 {
        bail!("868.1 MHz read back as {} Hz", config.frequency_hz);
    }
    let config = device.set_frequency(915_000_000)?;
    if config.frequency_hz != 915_000_000 {
        bail!("915 MHz read back as {} Hz", config.frequency_hz);
    }
    Ok(())
}

fn test_invalid_parameters(device: &mut DeviceClient) -> Result<()> {
    let before = device.config()?;

    expect_status(
        device,
        CommandId::SetFrequency,
        &100_000_000u32.to_le_bytes(),
        ResponseStatus::InvalidParameter,
    )?;
    expect_status(device, CommandId::SetBandwidth, &[0x07], ResponseStatus::InvalidParameter)?;
    expect_status(device, CommandId::SetSpreadingFactor, &[13], ResponseStatus::InvalidParameter)?;
    expect_status(device, CommandId::SetCodingRate, &[0], ResponseStatus::InvalidParameter)?;
    expect_status(device, CommandId::SetPreset, &[3], ResponseStatus::InvalidParameter)?;
    expect_status(device, CommandId::LoraTx, &[], ResponseStatus::InvalidLength)?;

    if device.config()? != before {
        bail!("Rejected commands changed the configuration");
    }
    Ok(())
}

fn test_ldro_follows_sf(device: &mut DeviceClient) -> Result<()> {
    for sf in 5..=12u8 {
        let config = device.set_spreading_factor(sf)?;
        if config.low_data_rate_optimize != (sf >= 11) {
            bail!("SF{} at 125 kHz: LDRO {}", sf, config.low_data_rate_optimize);
        }
    }
    restore_defaults(device)
}

fn test_select_channel(device: &mut DeviceClient) -> Result<()> {
    // EU868, downlink, channel 8 (RX2), DR0
    let config = device.select_channel(1, 1, 8, 0)?;
    if config.frequency_hz.abs_diff(869_525_000) > 1 || config.spreading_factor != 12 {
        bail!("RX2 gave {} Hz SF{}", config.frequency_hz, config.spreading_factor);
    }

    expect_status(device, CommandId::SelectChannel, &[0, 0, 72, 0], ResponseStatus::InvalidParameter)?;
    restore_defaults(device)
}

fn test_packet_params(device: &mut DeviceClient) -> Result<()> {
    let config = device.set_packet_params(16, false, 255, true, true)?;
    if config.preamble_length != 16 || !config.crc_enabled || !config.invert_iq {
        bail!("Echoed {:?}", config);
    }
    restore_defaults(device)
}

fn test_transmit(device: &mut DeviceClient) -> Result<()> {
    device.lora_tx(b"device-tests")
}
