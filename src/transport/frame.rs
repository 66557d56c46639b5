//! Wire format for STRAND datagrams.
//!
//! Every datagram opens with a 32-bit session id. Id 0 is reserved for the
//! unauthenticated handshake exchange; any other id addresses an established
//! session and is followed by a 64-bit send counter and the AEAD ciphertext.
//!
//! Decrypted session payloads carry a small timing header followed by a run
//! of typed chunks (flow fragments, acks, pings, close notices).

use std::net::{IpAddr, SocketAddr};

use crate::core::constants::{
    CHUNK_ACK, CHUNK_DATA, CHUNK_FLOW_CLOSE, CHUNK_PING, CHUNK_PONG, CHUNK_SESSION_CLOSE,
    COOKIE_SIZE, HELLO_RANDOM_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE, TYPE_COOKIE, TYPE_COOKIE_ACK,
    TYPE_HELLO, TYPE_REDIRECT, TYPE_SESSION_OK,
};
use crate::core::error::FrameError;

/// Session id reserved for handshake traffic.
pub const HANDSHAKE_ID: u32 = 0;

/// A minimal big-endian cursor over received bytes.
///
/// Every read is length-checked; a short buffer surfaces as
/// [`FrameError::UnexpectedEof`] instead of a panic.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, FrameError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64, FrameError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < len {
            return Err(FrameError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let bytes = self.read_bytes(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        Ok(buf)
    }
}

/// Append big-endian fields to an outbound buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a big-endian u16.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian u32.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian u64.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Finish and take the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// DATAGRAM ENVELOPE
// =============================================================================

/// A parsed inbound datagram, before any decryption.
#[derive(Debug)]
pub enum Datagram<'a> {
    /// Unauthenticated handshake traffic (session id 0).
    Handshake(HandshakePacket<'a>),
    /// Traffic addressed to an established session.
    Session {
        /// Target session id.
        id: u32,
        /// Send counter, also the AEAD nonce material.
        counter: u64,
        /// Ciphertext with trailing authentication tag.
        ciphertext: &'a [u8],
    },
}

/// Split an inbound datagram into its envelope parts.
pub fn parse_datagram(data: &[u8]) -> Result<Datagram<'_>, FrameError> {
    let mut reader = Reader::new(data);
    let id = reader.read_u32()?;
    if id == HANDSHAKE_ID {
        return Ok(Datagram::Handshake(parse_handshake(&mut reader)?));
    }
    let counter = reader.read_u64()?;
    let ciphertext = reader.read_bytes(reader.remaining())?;
    Ok(Datagram::Session {
        id,
        counter,
        ciphertext,
    })
}

/// Build the envelope of an outbound session datagram.
pub fn encode_session_datagram(id: u32, counter: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut writer = Writer::with_capacity(12 + ciphertext.len());
    writer.write_u32(id).write_u64(counter).write_bytes(ciphertext);
    writer.into_bytes()
}

// =============================================================================
// HANDSHAKE PACKETS
// =============================================================================

/// An unauthenticated handshake datagram.
#[derive(Debug)]
pub enum HandshakePacket<'a> {
    /// First contact: opaque tag, requested URL, peer random bytes.
    Hello {
        /// Echoed verbatim in the response.
        tag: [u8; TAG_SIZE],
        /// Requested URL (path + query), UTF-8.
        url: &'a str,
        /// Peer-supplied randomness, mixed into key derivation.
        random: [u8; HELLO_RANDOM_SIZE],
    },
    /// Cookie follow-up: the issued cookie plus the peer's public key.
    CookieAck {
        /// The single-use cookie issued in the `Cookie` response.
        cookie: [u8; COOKIE_SIZE],
        /// Peer's X25519 public key.
        peer_public: [u8; PUBLIC_KEY_SIZE],
    },
}

fn parse_handshake<'a>(reader: &mut Reader<'a>) -> Result<HandshakePacket<'a>, FrameError> {
    let kind = reader.read_u8()?;
    match kind {
        TYPE_HELLO => {
            let tag = reader.read_array::<TAG_SIZE>()?;
            let url_len = usize::from(reader.read_u16()?);
            if url_len > reader.remaining() {
                return Err(FrameError::InvalidLength);
            }
            let url = std::str::from_utf8(reader.read_bytes(url_len)?)
                .map_err(|_| FrameError::Malformed("url is not utf-8"))?;
            let random = reader.read_array::<HELLO_RANDOM_SIZE>()?;
            Ok(HandshakePacket::Hello { tag, url, random })
        }
        TYPE_COOKIE_ACK => {
            let cookie = reader.read_array::<COOKIE_SIZE>()?;
            let peer_public = reader.read_array::<PUBLIC_KEY_SIZE>()?;
            Ok(HandshakePacket::CookieAck { cookie, peer_public })
        }
        other => Err(FrameError::UnknownType(other)),
    }
}

/// Build a first-contact datagram (client side, used in tests and by
/// server-originated sessions dialing a peer).
pub fn encode_hello(tag: &[u8; TAG_SIZE], url: &str, random: &[u8; HELLO_RANDOM_SIZE]) -> Vec<u8> {
    let mut writer = Writer::with_capacity(5 + TAG_SIZE + 2 + url.len() + HELLO_RANDOM_SIZE);
    writer
        .write_u32(HANDSHAKE_ID)
        .write_u8(TYPE_HELLO)
        .write_bytes(tag)
        .write_u16(url.len() as u16)
        .write_bytes(url.as_bytes())
        .write_bytes(random);
    writer.into_bytes()
}

/// Build a cookie follow-up datagram.
pub fn encode_cookie_ack(cookie: &[u8; COOKIE_SIZE], peer_public: &[u8; PUBLIC_KEY_SIZE]) -> Vec<u8> {
    let mut writer = Writer::with_capacity(5 + COOKIE_SIZE + PUBLIC_KEY_SIZE);
    writer
        .write_u32(HANDSHAKE_ID)
        .write_u8(TYPE_COOKIE_ACK)
        .write_bytes(cookie)
        .write_bytes(peer_public);
    writer.into_bytes()
}

/// Build the cookie response: echoed tag, cookie, server certificate.
pub fn encode_cookie_response(
    tag: &[u8; TAG_SIZE],
    cookie: &[u8; COOKIE_SIZE],
    certificate: &[u8; PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    let mut writer = Writer::with_capacity(5 + TAG_SIZE + 1 + COOKIE_SIZE + PUBLIC_KEY_SIZE);
    writer
        .write_u32(HANDSHAKE_ID)
        .write_u8(TYPE_COOKIE)
        .write_bytes(tag)
        .write_u8(COOKIE_SIZE as u8)
        .write_bytes(cookie)
        .write_bytes(certificate);
    writer.into_bytes()
}

/// Build the redirect response: echoed tag plus redirection addresses.
pub fn encode_redirect_response(tag: &[u8; TAG_SIZE], addresses: &[SocketAddr]) -> Vec<u8> {
    let mut writer = Writer::with_capacity(5 + TAG_SIZE + 1 + addresses.len() * 19);
    writer
        .write_u32(HANDSHAKE_ID)
        .write_u8(TYPE_REDIRECT)
        .write_bytes(tag)
        .write_u8(addresses.len() as u8);
    for address in addresses {
        write_address(&mut writer, address);
    }
    writer.into_bytes()
}

/// Build the session-commit acknowledgment.
pub fn encode_session_ok(session_id: u32) -> Vec<u8> {
    let mut writer = Writer::with_capacity(9);
    writer
        .write_u32(HANDSHAKE_ID)
        .write_u8(TYPE_SESSION_OK)
        .write_u32(session_id);
    writer.into_bytes()
}

fn write_address(writer: &mut Writer, address: &SocketAddr) {
    match address.ip() {
        IpAddr::V4(ip) => {
            writer.write_u8(4).write_bytes(&ip.octets());
        }
        IpAddr::V6(ip) => {
            writer.write_u8(6).write_bytes(&ip.octets());
        }
    }
    writer.write_u16(address.port());
}

/// Parse one address written by [`encode_redirect_response`].
pub fn read_address(reader: &mut Reader<'_>) -> Result<SocketAddr, FrameError> {
    let family = reader.read_u8()?;
    let ip: IpAddr = match family {
        4 => IpAddr::from(reader.read_array::<4>()?),
        6 => IpAddr::from(reader.read_array::<16>()?),
        other => return Err(FrameError::UnknownType(other)),
    };
    let port = reader.read_u16()?;
    Ok(SocketAddr::new(ip, port))
}

// =============================================================================
// SESSION PAYLOAD (plaintext, post-decrypt)
// =============================================================================

/// Timestamp-echo flag in the payload header.
const FLAG_HAS_ECHO: u8 = 0x01;

/// Timing header of a decrypted session payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Sender's 16-bit millisecond timestamp.
    pub timestamp: u16,
    /// Echo of the receiver's most recent timestamp, when known.
    pub echo: Option<u16>,
}

/// One typed chunk of a session payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Keepalive ping (control flow).
    Ping,
    /// Keepalive ping reply.
    Pong,
    /// Ordered data fragment on a flow.
    Data {
        /// Flow the fragment belongs to.
        flow_id: u32,
        /// Sender sequence number, starting at 0 per flow.
        sequence: u64,
        /// Fragment bytes.
        payload: Vec<u8>,
    },
    /// Cumulative acknowledgment: all fragments below `up_to` received.
    Ack {
        /// Acknowledged flow.
        flow_id: u32,
        /// One past the highest in-order sequence received.
        up_to: u64,
    },
    /// Peer closed one flow.
    FlowClose {
        /// The closed flow.
        flow_id: u32,
    },
    /// Peer is closing the whole session.
    SessionClose,
}

/// Decode a decrypted session payload into its header and chunks.
///
/// A truncated, unrecognized or inconsistently-sized chunk stops parsing
/// there; everything decoded before it is kept, so one malformed chunk
/// never poisons the whole datagram. There is no way to resync past a bad
/// chunk, so the remainder is discarded.
pub fn parse_payload(data: &[u8]) -> Result<(PayloadHeader, Vec<Chunk>), FrameError> {
    let mut reader = Reader::new(data);
    let flags = reader.read_u8()?;
    let timestamp = reader.read_u16()?;
    let echo_raw = reader.read_u16()?;
    let header = PayloadHeader {
        timestamp,
        echo: (flags & FLAG_HAS_ECHO != 0).then_some(echo_raw),
    };

    let mut chunks = Vec::new();
    while reader.remaining() > 0 {
        match parse_chunk(&mut reader) {
            Ok(chunk) => chunks.push(chunk),
            Err(_) => break,
        }
    }
    Ok((header, chunks))
}

fn parse_chunk(reader: &mut Reader<'_>) -> Result<Chunk, FrameError> {
    let kind = reader.read_u8()?;
    match kind {
        CHUNK_PING => Ok(Chunk::Ping),
        CHUNK_PONG => Ok(Chunk::Pong),
        CHUNK_DATA => {
            let flow_id = reader.read_u32()?;
            let sequence = reader.read_u64()?;
            let len = usize::from(reader.read_u16()?);
            if len > reader.remaining() {
                return Err(FrameError::InvalidLength);
            }
            Ok(Chunk::Data {
                flow_id,
                sequence,
                payload: reader.read_bytes(len)?.to_vec(),
            })
        }
        CHUNK_ACK => Ok(Chunk::Ack {
            flow_id: reader.read_u32()?,
            up_to: reader.read_u64()?,
        }),
        CHUNK_FLOW_CLOSE => Ok(Chunk::FlowClose {
            flow_id: reader.read_u32()?,
        }),
        CHUNK_SESSION_CLOSE => Ok(Chunk::SessionClose),
        other => Err(FrameError::UnknownType(other)),
    }
}

/// Encode a session payload from its header and chunks.
pub fn encode_payload(header: PayloadHeader, chunks: &[Chunk]) -> Vec<u8> {
    let mut writer = Writer::with_capacity(5 + chunks.len() * 16);
    writer
        .write_u8(if header.echo.is_some() { FLAG_HAS_ECHO } else { 0 })
        .write_u16(header.timestamp)
        .write_u16(header.echo.unwrap_or(0));
    for chunk in chunks {
        encode_chunk(&mut writer, chunk);
    }
    writer.into_bytes()
}

fn encode_chunk(writer: &mut Writer, chunk: &Chunk) {
    match chunk {
        Chunk::Ping => {
            writer.write_u8(CHUNK_PING);
        }
        Chunk::Pong => {
            writer.write_u8(CHUNK_PONG);
        }
        Chunk::Data {
            flow_id,
            sequence,
            payload,
        } => {
            writer
                .write_u8(CHUNK_DATA)
                .write_u32(*flow_id)
                .write_u64(*sequence)
                .write_u16(payload.len() as u16)
                .write_bytes(payload);
        }
        Chunk::Ack { flow_id, up_to } => {
            writer.write_u8(CHUNK_ACK).write_u32(*flow_id).write_u64(*up_to);
        }
        Chunk::FlowClose { flow_id } => {
            writer.write_u8(CHUNK_FLOW_CLOSE).write_u32(*flow_id);
        }
        Chunk::SessionClose => {
            writer.write_u8(CHUNK_SESSION_CLOSE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let tag = [0xAB; TAG_SIZE];
        let random = [0x11; HELLO_RANDOM_SIZE];
        let data = encode_hello(&tag, "strand://host/app?token=x", &random);

        match parse_datagram(&data).unwrap() {
            Datagram::Handshake(HandshakePacket::Hello {
                tag: t,
                url,
                random: r,
            }) => {
                assert_eq!(t, tag);
                assert_eq!(url, "strand://host/app?token=x");
                assert_eq!(r, random);
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_cookie_ack_roundtrip() {
        let cookie = [7u8; COOKIE_SIZE];
        let public = [9u8; PUBLIC_KEY_SIZE];
        let data = encode_cookie_ack(&cookie, &public);

        match parse_datagram(&data).unwrap() {
            Datagram::Handshake(HandshakePacket::CookieAck {
                cookie: c,
                peer_public,
            }) => {
                assert_eq!(c, cookie);
                assert_eq!(peer_public, public);
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_session_envelope_roundtrip() {
        let data = encode_session_datagram(42, 7, b"ciphertext");
        match parse_datagram(&data).unwrap() {
            Datagram::Session {
                id,
                counter,
                ciphertext,
            } => {
                assert_eq!(id, 42);
                assert_eq!(counter, 7);
                assert_eq!(ciphertext, b"ciphertext");
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_addresses() {
        let tag = [1u8; TAG_SIZE];
        let addrs: Vec<SocketAddr> =
            vec!["10.0.0.1:1935".parse().unwrap(), "[::1]:2000".parse().unwrap()];
        let data = encode_redirect_response(&tag, &addrs);

        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u32().unwrap(), HANDSHAKE_ID);
        assert_eq!(reader.read_u8().unwrap(), TYPE_REDIRECT);
        assert_eq!(reader.read_array::<TAG_SIZE>().unwrap(), tag);
        let count = reader.read_u8().unwrap();
        assert_eq!(count, 2);
        assert_eq!(read_address(&mut reader).unwrap(), addrs[0]);
        assert_eq!(read_address(&mut reader).unwrap(), addrs[1]);
    }

    #[test]
    fn test_payload_roundtrip() {
        let header = PayloadHeader {
            timestamp: 1234,
            echo: Some(900),
        };
        let chunks = vec![
            Chunk::Ping,
            Chunk::Data {
                flow_id: 3,
                sequence: 0,
                payload: b"frame".to_vec(),
            },
            Chunk::Ack { flow_id: 3, up_to: 5 },
            Chunk::FlowClose { flow_id: 9 },
        ];
        let data = encode_payload(header, &chunks);
        let (parsed_header, parsed_chunks) = parse_payload(&data).unwrap();
        assert_eq!(parsed_header, header);
        assert_eq!(parsed_chunks, chunks);
    }

    #[test]
    fn test_payload_without_echo() {
        let header = PayloadHeader {
            timestamp: 50,
            echo: None,
        };
        let data = encode_payload(header, &[]);
        let (parsed, chunks) = parse_payload(&data).unwrap();
        assert_eq!(parsed.echo, None);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_truncated_trailing_chunk_skipped() {
        let header = PayloadHeader {
            timestamp: 1,
            echo: None,
        };
        let mut data = encode_payload(
            header,
            &[Chunk::Data {
                flow_id: 1,
                sequence: 0,
                payload: b"ok".to_vec(),
            }],
        );
        // A truncated second chunk must not discard the first.
        data.push(CHUNK_DATA);
        data.push(0x00);
        let (_, chunks) = parse_payload(&data).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_unknown_chunk_type_keeps_prior_chunks() {
        let header = PayloadHeader {
            timestamp: 1,
            echo: None,
        };
        let expected = vec![
            Chunk::Ping,
            Chunk::Data {
                flow_id: 1,
                sequence: 0,
                payload: b"ok".to_vec(),
            },
        ];
        let mut data = encode_payload(header, &expected);
        // An unrecognized chunk type stops parsing without discarding what
        // came before it.
        data.push(0xEE);
        data.extend_from_slice(b"garbage");
        let (_, chunks) = parse_payload(&data).unwrap();
        assert_eq!(chunks, expected);
    }

    #[test]
    fn test_truncated_handshake_rejected() {
        let tag = [0u8; TAG_SIZE];
        let random = [0u8; HELLO_RANDOM_SIZE];
        let data = encode_hello(&tag, "strand://h/p", &random);
        assert!(matches!(
            parse_datagram(&data[..data.len() - 4]),
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_unknown_handshake_type() {
        let data = [0, 0, 0, 0, 0xFF];
        assert!(matches!(
            parse_datagram(&data),
            Err(FrameError::UnknownType(0xFF))
        ));
    }
}
