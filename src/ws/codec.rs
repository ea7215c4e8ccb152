//! WebSocket frame codec
//!
//! A from-scratch RFC 6455 implementation: streaming frame parsing with
//! continuation reassembly, masked-frame unmasking, frame builders for the
//! four message kinds the gateway ever sends, and handshake-key derivation.
//! Ported from `original_source/src/zerotermd/websocket.py`'s
//! `WebSocketBuffer` into the teacher's Rust idiom (see
//! `examples/kilroyjones-series_game_from_scratch/2_websocket/src/
//! websocket.rs` for the single-shot `parse_frame` this generalizes).

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::WsError;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default cap on unprocessed bytes held by a [`FrameDecoder`]. Exceeding it
/// is a fatal parse failure (spec: "a buffer hard-cap ... causes a fatal
/// parse failure that closes the connection").
pub const DEFAULT_MAX_BUFFERED: usize = 2 * 1024 * 1024;

/// The six opcodes this gateway understands. `Continuation` only ever shows
/// up mid-parse; callers of [`FrameDecoder::feed`] never see it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_raw(byte: u8) -> Option<Opcode> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn as_raw(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A complete, reassembled message handed to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Close(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Derives `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`
/// nonce: concatenate the RFC 6455 GUID, SHA-1, base64.
///
/// `derive_accept_key("dGhlIHNhbXBsZSBub25jZQ==") ==
/// "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="` is the worked example from the RFC.
pub fn derive_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Builds a single unmasked, unfragmented server frame.
fn build_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | opcode.as_raw());

    let len = payload.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len <= 0xFFFF {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

pub fn build_binary_frame(payload: &[u8]) -> Vec<u8> {
    build_frame(Opcode::Binary, payload)
}

pub fn build_pong_frame(payload: &[u8]) -> Vec<u8> {
    build_frame(Opcode::Pong, payload)
}

pub fn build_close_frame() -> Vec<u8> {
    build_frame(Opcode::Close, &[])
}

/// A single decoded frame header plus payload, before continuation
/// reassembly is applied.
struct RawFrame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// Streaming decoder: feed it arbitrary chunks off the socket, get back zero
/// or more complete, reassembled messages.
///
/// Fragmented TEXT/BINARY frames are buffered internally until the
/// FIN-marked continuation arrives; control frames are never fragmented and
/// pass straight through regardless of an in-progress continuation.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_buffered: usize,
    partial: Option<(Opcode, Vec<u8>)>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(DEFAULT_MAX_BUFFERED)
    }
}

impl FrameDecoder {
    pub fn new(max_buffered: usize) -> Self {
        FrameDecoder {
            buffer: Vec::new(),
            max_buffered,
            partial: None,
        }
    }

    /// Feeds another chunk of socket bytes in and drains every message that
    /// chunk completed. Returns `Err` only on a fatal, connection-ending
    /// condition (buffer overflow or malformed frame); the caller should send
    /// CLOSE and terminate the bridge.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>, WsError> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_buffered {
            return Err(WsError::BufferOverflow(self.max_buffered));
        }

        let mut messages = Vec::new();
        while let Some(frame) = self.next_frame()? {
            let RawFrame {
                fin,
                opcode,
                payload,
            } = frame;

            if opcode == Opcode::Continuation {
                if let Some((partial_opcode, mut partial_payload)) = self.partial.take() {
                    partial_payload.extend_from_slice(&payload);
                    if fin {
                        messages.push(Self::finish(partial_opcode, partial_payload));
                    } else {
                        self.partial = Some((partial_opcode, partial_payload));
                    }
                }
                continue;
            }

            if opcode.is_control() {
                messages.push(Self::finish(opcode, payload));
                continue;
            }

            if fin {
                messages.push(Self::finish(opcode, payload));
            } else {
                self.partial = Some((opcode, payload));
            }
        }
        Ok(messages)
    }

    fn finish(opcode: Opcode, payload: Vec<u8>) -> Message {
        match opcode {
            Opcode::Text => Message::Text(payload),
            Opcode::Binary => Message::Binary(payload),
            Opcode::Close => Message::Close(payload),
            Opcode::Ping => Message::Ping(payload),
            Opcode::Pong => Message::Pong(payload),
            Opcode::Continuation => unreachable!("continuation never reaches finish directly"),
        }
    }

    /// Pulls one complete frame off the front of the buffer, if one is fully
    /// present. Returns `Ok(None)` when more bytes are needed — not an error,
    /// just "incomplete".
    fn next_frame(&mut self) -> Result<Option<RawFrame>, WsError> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }
        let b1 = self.buffer[0];
        let b2 = self.buffer[1];
        let fin = b1 & 0x80 != 0;
        let opcode = Opcode::from_raw(b1 & 0x0F)
            .ok_or(WsError::Protocol("unrecognized opcode"))?;
        let masked = b2 & 0x80 != 0;
        let mut length = (b2 & 0x7F) as usize;
        let mut index = 2usize;

        if length == 126 {
            if self.buffer.len() < index + 2 {
                return Ok(None);
            }
            length = u16::from_be_bytes([self.buffer[index], self.buffer[index + 1]]) as usize;
            index += 2;
        } else if length == 127 {
            if self.buffer.len() < index + 8 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&self.buffer[index..index + 8]);
            length = u64::from_be_bytes(raw) as usize;
            index += 8;
        }

        let mask_key = if masked {
            if self.buffer.len() < index + 4 {
                return Ok(None);
            }
            let key = [
                self.buffer[index],
                self.buffer[index + 1],
                self.buffer[index + 2],
                self.buffer[index + 3],
            ];
            index += 4;
            Some(key)
        } else {
            None
        };

        if self.buffer.len() < index + length {
            return Ok(None);
        }

        let mut payload: Vec<u8> = self.buffer[index..index + length].to_vec();
        self.buffer.drain(0..index + length);

        if let Some(mask) = mask_key {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Some(RawFrame {
            fin,
            opcode,
            payload,
        }))
    }
}
