//! Device communication client.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::SerialPort;

use crate::protocol::{
    build_command, build_command_payload, cobs_decode, cobs_encode, parse_response, CommandId, DeviceConfig,
    Response, ResponseId, RxFrame,
};

/// Ports that answer GetVersion
///
/// USB-Serial-JTAG enumerates as CDC-ACM, so only `ttyACM*` devices are
/// probed.
pub fn find_data_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .filter(|name| name.contains("ttyACM"))
        .filter(|name| probe(name))
        .collect();
    Ok(ports)
}

fn probe(port_name: &str) -> bool {
    let Ok(mut client) = DeviceClient::new(port_name, 115200) else {
        return false;
    };
    client.set_timeout(Duration::from_millis(500));
    client.version().is_ok()
}

/// `port_arg` itself, or the first responding device for "auto"
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }
    match find_data_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No data port found - ensure device is connected"),
    }
}

/// Two distinct ports; each "auto" takes a responding device the other did not name
pub fn resolve_two_ports(port_a: &str, port_b: &str) -> Result<(String, String)> {
    let explicit: Vec<&str> = [port_a, port_b].into_iter().filter(|p| *p != "auto").collect();
    let mut found = find_data_ports()?
        .into_iter()
        .filter(|p| !explicit.contains(&p.as_str()));

    let mut pick = |arg: &str| -> Result<String> {
        if arg != "auto" {
            return Ok(arg.to_string());
        }
        found.next().ok_or_else(|| anyhow::anyhow!("Need two devices connected, not enough responded"))
    };
    let a = pick(port_a)?;
    let b = pick(port_b)?;
    if a == b {
        anyhow::bail!("Both devices resolve to {}", a);
    }
    Ok((a, b))
}

/// Client for a sniffer on a serial port.
///
/// Received packets arrive unsolicited and can interleave with command
/// responses; `send_command` sets them aside for `next_rx_frame`.
pub struct DeviceClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    pending_rx: Vec<RxFrame>,
}

impl DeviceClient {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
            pending_rx: Vec::new(),
        })
    }

    /// How long `send_command` waits for an answer
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Drop OS-buffered input and any packets set aside
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.pending_rx.clear();
        Ok(())
    }

    /// Clear, then read until the port goes quiet
    pub fn drain_buffer(&mut self) -> Result<()> {
        self.clear_buffer()?;

        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Send a command and wait for its response.
    pub fn send_command(&mut self, cmd_id: CommandId, payload: &[u8]) -> Result<Response> {
        let frame = build_command(cmd_id, payload);
        self.exchange(&frame)
    }

    /// Any id byte, including ones the firmware does not know
    pub fn send_raw_command(&mut self, cmd_id: u8, payload: &[u8]) -> Result<Response> {
        let frame = cobs_encode(&build_command_payload(cmd_id, payload));
        self.exchange(&frame)
    }

    /// Bytes are written as given, for corrupt-frame tests
    pub fn send_encoded(&mut self, frame: &[u8]) -> Result<Response> {
        self.exchange(frame)
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Response> {
        self.port.write_all(frame)?;
        self.port.flush()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let response = match self.read_response(remaining)? {
                Some(response) => response,
                None => anyhow::bail!("Timeout waiting for response"),
            };

            if response.resp_id == ResponseId::RxPacket {
                self.pending_rx.push(response.rx_frame()?);
                continue;
            }
            return Ok(response);
        }
    }

    /// Read one response, `None` if nothing complete arrived in time.
    pub fn read_response(&mut self, timeout: Duration) -> Result<Option<Response>> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.port.read(&mut buf) {
                Ok(1) => {
                    data.push(buf[0]);
                    if buf[0] == 0x00 {
                        if data.len() > 1 {
                            let decoded = cobs_decode(&data)?;
                            return parse_response(&decoded).map(Some);
                        }
                        data.clear();
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if !data.is_empty() {
            anyhow::bail!(
                "Timeout mid-frame, got {} bytes: {:02x?}",
                data.len(),
                data
            );
        }
        Ok(None)
    }

    /// Next received packet, `None` if none arrives within `timeout`.
    pub fn next_rx_frame(&mut self, timeout: Duration) -> Result<Option<RxFrame>> {
        if !self.pending_rx.is_empty() {
            return Ok(Some(self.pending_rx.remove(0)));
        }

        let start = Instant::now();
        while start.elapsed() < timeout {
            let remaining = timeout.saturating_sub(start.elapsed());
            match self.read_response(remaining.min(Duration::from_millis(100)))? {
                Some(response) if response.resp_id == ResponseId::RxPacket => {
                    return response.rx_frame().map(Some);
                }
                Some(other) => {
                    eprintln!("Ignoring unexpected {:?} response", other.resp_id);
                }
                None => {}
            }
        }
        Ok(None)
    }

    /// Wait for a received packet or fail.
    pub fn wait_for_rx_frame(&mut self, timeout: Duration) -> Result<RxFrame> {
        match self.next_rx_frame(timeout)? {
            Some(frame) => Ok(frame),
            None => anyhow::bail!("Timeout waiting for RxPacket"),
        }
    }

    // --- Typed commands ---

    /// Firmware version as (major, minor, patch).
    pub fn version(&mut self) -> Result<(u8, u8, u8)> {
        let response = self.send_command(CommandId::GetVersion, &[])?;
        response.expect(ResponseId::Version)?;
        if response.payload.len() != 3 {
            anyhow::bail!("Version payload is {} bytes, expected 3", response.payload.len());
        }
        Ok((response.payload[0], response.payload[1], response.payload[2]))
    }

    pub fn config(&mut self) -> Result<DeviceConfig> {
        self.send_command(CommandId::GetConfig, &[])?.config()
    }

    /// Transmit a payload, waiting for TxComplete.
    pub fn lora_tx(&mut self, data: &[u8]) -> Result<()> {
        self.send_command(CommandId::LoraTx, data)?.expect(ResponseId::TxComplete)
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<DeviceConfig> {
        self.send_command(CommandId::SetFrequency, &hz.to_le_bytes())?.config()
    }

    pub fn set_bandwidth(&mut self, code: u8) -> Result<DeviceConfig> {
        self.send_command(CommandId::SetBandwidth, &[code])?.config()
    }

    pub fn set_spreading_factor(&mut self, sf: u8) -> Result<DeviceConfig> {
        self.send_command(CommandId::SetSpreadingFactor, &[sf])?.config()
    }

    pub fn set_coding_rate(&mut self, cr: u8) -> Result<DeviceConfig> {
        self.send_command(CommandId::SetCodingRate, &[cr])?.config()
    }

    pub fn set_preset(&mut self, preset: u8) -> Result<DeviceConfig> {
        self.send_command(CommandId::SetPreset, &[preset])?.config()
    }

    pub fn set_packet_params(
        &mut self,
        preamble_length: u16,
        fixed_header: bool,
        payload_length: u8,
        crc_enabled: bool,
        invert_iq: bool,
    ) -> Result<DeviceConfig> {
        let [p0, p1] = preamble_length.to_le_bytes();
        let payload = [
            p0,
            p1,
            fixed_header as u8,
            payload_length,
            crc_enabled as u8,
            invert_iq as u8,
        ];
        self.send_command(CommandId::SetPacketParams, &payload)?.config()
    }

    /// Tune to a LoRaWAN channel plan entry.
    pub fn select_channel(&mut self, region: u8, direction: u8, channel: u8, data_rate: u8) -> Result<DeviceConfig> {
        self.send_command(CommandId::SelectChannel, &[region, direction, channel, data_rate])?
            .config()
    }
}
