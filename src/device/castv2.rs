use anyhow::{anyhow, Context, Result};
use native_tls::{TlsConnector, TlsStream};
use prost::Message;
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub const CAST_PORT: u16 = 8009;
pub const SENDER_ID: &str = "sender-0";

const READ_POLL: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME_LEN: usize = 64 * 1024;
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// One decoded inbound frame with a JSON payload.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub source_id: String,
    pub namespace: String,
    pub payload: Value,
}

/// TLS connection to a cast receiver.
///
/// Reads poll with a short timeout so the owner can interleave writes;
/// `read_message` returns `Ok(None)` when nothing arrived in time.
pub struct CastConnection {
    stream: TlsStream<TcpStream>,
    request_id: u32,
}

impl CastConnection {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let sockaddr = addr
            .to_socket_addrs()
            .with_context(|| format!("Could not resolve {addr}"))?
            .next()
            .ok_or_else(|| anyhow!("No socket address for {addr}"))?;

        let tcp = TcpStream::connect_timeout(&sockaddr, timeout)
            .with_context(|| format!("TCP connect timeout to {addr}"))?;
        tcp.set_read_timeout(Some(READ_POLL))
            .with_context(|| "Failed to set read timeout")?;
        tcp.set_write_timeout(Some(WRITE_TIMEOUT))
            .with_context(|| "Failed to set write timeout")?;

        // Cast devices present self-signed certificates.
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .with_context(|| "Failed to build TLS connector")?
            .connect(host, tcp)
            .with_context(|| format!("TLS handshake failed for {host}"))?;

        Ok(Self {
            stream: tls,
            request_id: 1,
        })
    }

    pub fn next_request_id(&mut self) -> u32 {
        let id = self.request_id;
        self.request_id = self.request_id.wrapping_add(1).max(1);
        id
    }

    pub fn send_json(&mut self, destination_id: &str, namespace: &str, payload: &Value) -> Result<()> {
        let frame = encode_frame(SENDER_ID, destination_id, namespace, payload)?;
        self.stream
            .write_all(&frame)
            .with_context(|| format!("Failed to write cast frame on {namespace}"))?;
        self.stream
            .flush()
            .with_context(|| "Failed to flush cast frame")?;
        Ok(())
    }

    pub fn read_message(&mut self) -> Result<Option<Inbound>> {
        read_frame(&mut self.stream, FRAME_TIMEOUT)
    }
}

/// Read one frame. `Ok(None)` only when no byte of a new frame arrived
/// before the poll timeout; once a frame has started it is read to the end
/// or the read fails.
fn read_frame<R: Read>(reader: &mut R, frame_timeout: Duration) -> Result<Option<Inbound>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf, true, frame_timeout)? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("Cast frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload, false, frame_timeout)?;

    decode_frame(&payload)
}

/// Fill `buf`, retrying through read timeouts until `frame_timeout` has
/// passed. Returns false if `idle_ok` and nothing was read at all.
fn read_full<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    idle_ok: bool,
    frame_timeout: Duration,
) -> Result<bool> {
    let started = Instant::now();
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => anyhow::bail!("Cast connection closed by receiver"),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if is_timeout(&err) => {
                if filled == 0 && idle_ok {
                    return Ok(false);
                }
                if started.elapsed() >= frame_timeout {
                    anyhow::bail!(
                        "Timed out inside a cast frame after {filled} of {} bytes",
                        buf.len()
                    );
                }
            }
            Err(err) => return Err(err).with_context(|| "Failed to read cast frame"),
        }
    }
    Ok(true)
}

/// Length-prefixed protobuf frame carrying a JSON string payload.
pub fn encode_frame(
    source_id: &str,
    destination_id: &str,
    namespace: &str,
    payload: &Value,
) -> Result<Vec<u8>> {
    let payload_utf8 = serde_json::to_string(payload)
        .with_context(|| format!("Failed to serialize payload for namespace {namespace}"))?;

    let message = CastMessage {
        protocol_version: ProtocolVersion::Castv210 as i32,
        source_id: source_id.to_string(),
        destination_id: destination_id.to_string(),
        namespace: namespace.to_string(),
        payload_type: PayloadType::String as i32,
        payload_utf8: Some(payload_utf8),
        payload_binary: None,
    };

    let len = message.encoded_len();
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    message
        .encode(&mut frame)
        .with_context(|| "Failed to encode cast protobuf message")?;
    Ok(frame)
}

/// Decode a frame body. Binary and non-JSON payloads are skipped.
pub fn decode_frame(body: &[u8]) -> Result<Option<Inbound>> {
    let message =
        CastMessage::decode(body).with_context(|| "Failed to decode cast protobuf message")?;

    let Some(payload_str) = message.payload_utf8 else {
        return Ok(None);
    };
    let Ok(payload) = serde_json::from_str::<Value>(&payload_str) else {
        return Ok(None);
    };

    Ok(Some(Inbound {
        source_id: message.source_id,
        namespace: message.namespace,
        payload,
    }))
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum PayloadType {
    String = 0,
    Binary = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", tag = "1")]
    protocol_version: i32,
    #[prost(string, tag = "2")]
    source_id: String,
    #[prost(string, tag = "3")]
    destination_id: String,
    #[prost(string, tag = "4")]
    namespace: String,
    #[prost(enumeration = "PayloadType", tag = "5")]
    payload_type: i32,
    #[prost(string, optional, tag = "6")]
    payload_utf8: Option<String>,
    #[prost(bytes, optional, tag = "7")]
    payload_binary: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    #[test]
    fn frame_is_length_prefixed() {
        let frame = encode_frame(
            SENDER_ID,
            "receiver-0",
            "urn:x-cast:com.google.cast.receiver",
            &json!({"type": "GET_STATUS", "requestId": 1}),
        )
        .unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let inbound = decode_frame(&frame[4..]).unwrap().unwrap();
        assert_eq!(inbound.source_id, SENDER_ID);
        assert_eq!(inbound.payload["type"], "GET_STATUS");
    }

    /// Replays scripted reads; `None` is a read timeout.
    struct Scripted {
        steps: VecDeque<Option<Vec<u8>>>,
    }

    impl Scripted {
        fn new(steps: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Some(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.steps.push_front(Some(chunk.split_off(n)));
                    }
                    Ok(n)
                }
                Some(None) => Err(ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    fn ping_frame() -> Vec<u8> {
        encode_frame(
            "receiver-0",
            SENDER_ID,
            "urn:x-cast:com.google.cast.tp.heartbeat",
            &json!({"type": "PING"}),
        )
        .unwrap()
    }

    #[test]
    fn idle_poll_reads_nothing() {
        let mut reader = Scripted::new(vec![None]);
        assert!(read_frame(&mut reader, FRAME_TIMEOUT).unwrap().is_none());
    }

    #[test]
    fn timeout_inside_length_prefix_keeps_framing() {
        let frame = ping_frame();
        let mut reader = Scripted::new(vec![
            Some(frame[..2].to_vec()),
            None,
            Some(frame[2..7].to_vec()),
            None,
            Some(frame[7..].to_vec()),
        ]);

        let inbound = read_frame(&mut reader, FRAME_TIMEOUT).unwrap().unwrap();
        assert_eq!(inbound.payload["type"], "PING");
        assert!(reader.steps.is_empty());
    }

    #[test]
    fn stalled_frame_is_an_error() {
        let frame = ping_frame();
        let mut reader = Scripted::new(vec![Some(frame[..3].to_vec()), None]);
        assert!(read_frame(&mut reader, Duration::ZERO).is_err());
    }

    #[test]
    fn closed_stream_is_an_error() {
        let frame = ping_frame();
        let mut reader = Scripted::new(vec![Some(frame[..6].to_vec())]);
        let err = read_frame(&mut reader, FRAME_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn binary_payload_is_skipped() {
        let message = CastMessage {
            protocol_version: 0,
            source_id: "receiver-0".to_string(),
            destination_id: SENDER_ID.to_string(),
            namespace: "urn:x-cast:test".to_string(),
            payload_type: PayloadType::Binary as i32,
            payload_utf8: None,
            payload_binary: Some(vec![1, 2, 3]),
        };
        let body = message.encode_to_vec();
        assert!(decode_frame(&body).unwrap().is_none());
    }
}
