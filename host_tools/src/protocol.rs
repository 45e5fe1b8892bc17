//! Host side of the frame format.
//!
//! Ids, CRC and payload sizes come from the firmware crate so the two
//! sides cannot drift apart.

#![allow(dead_code)]

use anyhow::{bail, Context};

pub use lora_sniffer_firmware::commands::parser::calculate_crc;
pub use lora_sniffer_firmware::commands::serialiser::{CONFIG_PAYLOAD_LEN, RX_METADATA_LEN};
pub use lora_sniffer_firmware::commands::{CommandId, ResponseId, ResponseStatus};
pub use lora_sniffer_firmware::config::protocol::PROTOCOL_VERSION;

/// `[version][id][len: u16 LE][payload][crc: u16 LE]`, before COBS
pub fn build_command_payload(cmd_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![PROTOCOL_VERSION, cmd_id];
    data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(payload);
    let crc = calculate_crc(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    data
}

/// COBS encode; the output ends with the zero delimiter.
pub fn cobs_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = vec![0u8; corncobs::max_encoded_len(data.len())];
    let len = corncobs::encode_buf(data, &mut encoded);
    encoded.truncate(len);
    encoded
}

/// Frame ready to write to the port
pub fn build_command(cmd_id: CommandId, payload: &[u8]) -> Vec<u8> {
    cobs_encode(&build_command_payload(cmd_id as u8, payload))
}

/// A response frame that passed its checks
#[derive(Debug)]
pub struct Response {
    pub resp_id: ResponseId,
    pub payload: Vec<u8>,
}

/// Radio settings carried by a Config response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub frequency_hz: u32,
    pub bandwidth: u8,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub low_data_rate_optimize: bool,
    pub preamble_length: u16,
    pub fixed_header: bool,
    pub payload_length: u8,
    pub crc_enabled: bool,
    pub invert_iq: bool,
}

/// Packet carried by an RxPacket response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub rssi: i16,
    pub snr: i8,
    pub signal_rssi: i16,
}

impl Response {
    /// Decode an Error response into (status, original command id)
    pub fn error(&self) -> Option<(Result<ResponseStatus, u8>, u8)> {
        if self.resp_id != ResponseId::Error || self.payload.len() < 2 {
            return None;
        }
        let raw = self.payload[0];
        Some((ResponseStatus::from_byte(raw).ok_or(raw), self.payload[1]))
    }

    /// Decode a Config response
    pub fn config(&self) -> anyhow::Result<DeviceConfig> {
        self.expect(ResponseId::Config)?;
        let p = &self.payload;
        if p.len() != CONFIG_PAYLOAD_LEN {
            anyhow::bail!("Config payload is {} bytes, expected {}", p.len(), CONFIG_PAYLOAD_LEN);
        }

        Ok(DeviceConfig {
            frequency_hz: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            bandwidth: p[4],
            spreading_factor: p[5],
            coding_rate: p[6],
            low_data_rate_optimize: p[7] != 0,
            preamble_length: u16::from_le_bytes([p[8], p[9]]),
            fixed_header: p[10] != 0,
            payload_length: p[11],
            crc_enabled: p[12] != 0,
            invert_iq: p[13] != 0,
        })
    }

    /// Decode an RxPacket response
    pub fn rx_frame(&self) -> anyhow::Result<RxFrame> {
        self.expect(ResponseId::RxPacket)?;
        let p = &self.payload;
        if p.len() < RX_METADATA_LEN {
            anyhow::bail!("RxPacket payload too short: {} bytes", p.len());
        }

        let meta = &p[p.len() - RX_METADATA_LEN..];
        Ok(RxFrame {
            data: p[..p.len() - RX_METADATA_LEN].to_vec(),
            rssi: i16::from_le_bytes([meta[0], meta[1]]),
            snr: meta[2] as i8,
            signal_rssi: i16::from_le_bytes([meta[3], meta[4]]),
        })
    }

    /// Fail with a readable message unless this is `expected`
    pub fn expect(&self, expected: ResponseId) -> anyhow::Result<()> {
        if self.resp_id == expected {
            return Ok(());
        }
        match self.error() {
            Some((Ok(status), cmd)) => {
                anyhow::bail!("Device answered {:?} for command 0x{:02x}", status, cmd)
            }
            Some((Err(raw), cmd)) => {
                anyhow::bail!("Device answered status 0x{:02x} for command 0x{:02x}", raw, cmd)
            }
            None => anyhow::bail!("Expected {:?} response, got {:?}", expected, self.resp_id),
        }
    }
}

/// Check a COBS-decoded response frame and split out its payload
pub fn parse_response(data: &[u8]) -> anyhow::Result<Response> {
    let Some(header) = data.get(..4) else {
        bail!("Response too short: {} bytes", data.len());
    };
    let length = u16::from_le_bytes([header[2], header[3]]) as usize;
    let body_end = 4 + length;

    let crc_bytes = data
        .get(body_end..body_end + 2)
        .with_context(|| format!("Response truncated: header says {} payload bytes, frame has {}", length, data.len()))?;
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let calculated = calculate_crc(&data[..body_end]);
    if received != calculated {
        bail!("CRC mismatch: frame carries {:04x}, computed {:04x}", received, calculated);
    }

    if header[0] != PROTOCOL_VERSION {
        bail!("Device speaks protocol {}, host speaks {}", header[0], PROTOCOL_VERSION);
    }
    let resp_id = ResponseId::from_byte(header[1]).with_context(|| format!("Unknown response ID: {:#04x}", header[1]))?;

    Ok(Response {
        resp_id,
        payload: data[4..body_end].to_vec(),
    })
}

/// COBS decode a frame that still carries its zero delimiter.
pub fn cobs_decode(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoded = vec![0u8; data.len()];
    let len = corncobs::decode_buf(data, &mut decoded).map_err(|e| anyhow::anyhow!("COBS decode error: {:?}", e))?;
    decoded.truncate(len);
    Ok(decoded)
}
