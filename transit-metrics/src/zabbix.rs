//! Zabbix sender protocol.
//!
//! ```text
//! +--------+-------+---------------+---------------+------------------+
//! | "ZBXD" | 0x01  | data len (LE) | reserved (LE) | JSON payload     |
//! | 4 B    | 1 B   | u32           | u32           | data len bytes   |
//! +--------+-------+---------------+---------------+------------------+
//! ```
//!
//! Request: `{"request":"sender data","data":[{"host","key","value","clock"?}]}`.
//! Response: `{"response":"success","info":"processed: 2; failed: 0; total: 2; seconds spent: 0.000055"}`.
//!
//! Only uncompressed frames with 32-bit lengths are spoken.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use transit_common::{incoming, outgoing};

use crate::{Measurement, MetricsError, MetricsSink, PushSummary};

pub const SIGNATURE: &[u8; 4] = b"ZBXD";
pub const PROTOCOL_FLAG: u8 = 0x01;
pub const HEADER_LEN: usize = 13;
pub const DEFAULT_PORT: u16 = 10051;

/// Responses larger than this are treated as garbage.
const MAX_RESPONSE_LEN: usize = 1 << 20;

#[derive(Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: Vec<SenderItem<'a>>,
}

#[derive(Serialize)]
struct SenderItem<'a> {
    host: &'a str,
    key: &'a str,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    clock: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    response: String,
    #[serde(default)]
    info: String,
}

/// Zabbix item values travel as text.
#[must_use]
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.3}")
    }
}

/// Build a complete sender frame for `measurements`.
///
/// # Errors
///
/// Returns [`MetricsError::Protocol`] if the payload exceeds a 32-bit length.
pub fn encode(measurements: &[Measurement]) -> Result<Vec<u8>, MetricsError> {
    let request = SenderRequest {
        request: "sender data",
        data: measurements
            .iter()
            .map(|m| SenderItem {
                host: &m.host,
                key: &m.key,
                value: format_value(m.value),
                clock: m.clock,
            })
            .collect(),
    };

    let payload = serde_json::to_vec(&request)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| MetricsError::Protocol(format!("payload of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(SIGNATURE);
    frame.push(PROTOCOL_FLAG);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Validate a response header and return the payload length it announces.
///
/// # Errors
///
/// Returns [`MetricsError::Protocol`] on a bad signature, an unsupported
/// flag or an implausible length.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<usize, MetricsError> {
    if &header[..4] != SIGNATURE {
        return Err(MetricsError::Protocol(format!(
            "bad signature {:?}",
            String::from_utf8_lossy(&header[..4])
        )));
    }

    if header[4] != PROTOCOL_FLAG {
        return Err(MetricsError::Protocol(format!(
            "unsupported flags {:#04x}",
            header[4]
        )));
    }

    let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if len > MAX_RESPONSE_LEN {
        return Err(MetricsError::Protocol(format!("response of {len} bytes")));
    }

    Ok(len)
}

/// Parse `processed: N; failed: N; total: N; seconds spent: S`.
///
/// # Errors
///
/// Returns [`MetricsError::Protocol`] when a count is missing or not a number.
pub fn parse_info(info: &str) -> Result<PushSummary, MetricsError> {
    let mut processed = None;
    let mut failed = None;
    let mut total = None;

    for part in info.split(';') {
        let Some((name, value)) = part.split_once(':') else {
            continue;
        };
        let slot = match name.trim() {
            "processed" => &mut processed,
            "failed" => &mut failed,
            "total" => &mut total,
            _ => continue,
        };
        *slot = value.trim().parse::<u64>().ok();
    }

    match (processed, failed, total) {
        (Some(processed), Some(failed), Some(total)) => Ok(PushSummary {
            processed,
            failed,
            total,
        }),
        _ => Err(MetricsError::Protocol(format!("unparsable info {info:?}"))),
    }
}

/// Decode a response payload.
///
/// # Errors
///
/// Returns [`MetricsError::Rejected`] unless the server reported success.
pub fn decode_response(payload: &[u8]) -> Result<PushSummary, MetricsError> {
    let response: SenderResponse = serde_json::from_slice(payload)?;

    if response.response != "success" {
        return Err(MetricsError::Rejected(if response.info.is_empty() {
            response.response
        } else {
            response.info
        }));
    }

    parse_info(&response.info)
}

/// Pushes to a Zabbix server or proxy trapper port.
#[derive(Debug, Clone)]
pub struct ZabbixSink {
    address: String,
    timeout: Duration,
}

impl ZabbixSink {
    pub fn new(server: &str, port: u16, timeout: Duration) -> Self {
        Self {
            address: format!("{server}:{port}"),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, frame: &[u8]) -> Result<PushSummary, MetricsError> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(frame).await?;
        stream.flush().await?;

        let mut header = [0; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let len = decode_header(&header)?;

        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await?;

        decode_response(&payload)
    }
}

#[async_trait]
impl MetricsSink for ZabbixSink {
    async fn push(&self, measurements: &[Measurement]) -> Result<PushSummary, MetricsError> {
        let frame = encode(measurements)?;

        outgoing!(
            level = DEBUG,
            address = %self.address,
            items = measurements.len(),
            "Zabbix sender data"
        );

        let summary = tokio::time::timeout(self.timeout, self.exchange(&frame))
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout))??;

        incoming!(
            level = DEBUG,
            processed = summary.processed,
            failed = summary.failed,
            total = summary.total,
            "Zabbix sender response"
        );

        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "zabbix"
    }
}
