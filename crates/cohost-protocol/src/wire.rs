//! Wire format of the real-time data channel.
//!
//! Each frame is:
//!   [1 byte event][2 bytes big-endian payload length][payload]
//!
//! All integers are big-endian. Client-to-server events use codes 1..=7,
//! server-to-client events use codes 0x80 and above.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use cohost_types::InputIntent;

use crate::error::ProtocolError;

/// Size of the frame header.
pub const HEADER_LEN: usize = 3;

/// Client-to-server event codes.
pub mod op {
    pub const MOVE: u8 = 0x01;
    pub const SCROLL: u8 = 0x02;
    pub const KEY_DOWN: u8 = 0x03;
    pub const KEY_UP: u8 = 0x04;
    pub const BUTTON_DOWN: u8 = 0x05;
    pub const BUTTON_UP: u8 = 0x06;
    pub const PING: u8 = 0x07;

    pub const CURSOR_POSITION: u8 = 0x80;
    pub const CURSOR_IMAGE: u8 = 0x81;
    pub const PONG: u8 = 0x82;
}

/// A decoded client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Input(InputIntent),
    /// Latency ping carrying the client's millisecond timestamp.
    Ping { client_ts: u64 },
    /// Event code this server does not know. Ignored by the caller.
    Unknown { event: u8 },
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    CursorPosition {
        x: u16,
        y: u16,
    },
    CursorImage {
        width: u16,
        height: u16,
        x_hot: u16,
        y_hot: u16,
        /// PNG-encoded image.
        png: Bytes,
    },
    Pong {
        client_ts: u64,
        server_ts: u64,
    },
}

/// Decode one client frame.
///
/// A frame whose header or declared payload is cut short, or whose
/// payload is smaller than its event requires, is a decode error. Bytes
/// after the fixed payload are ignored.
pub fn decode_client_frame(data: &[u8]) -> Result<ClientFrame, ProtocolError> {
    let (event, mut payload) = split_frame(data)?;

    let frame = match event {
        op::MOVE => {
            need(event, payload, 4)?;
            ClientFrame::Input(InputIntent::Move {
                x: payload.get_i16(),
                y: payload.get_i16(),
            })
        }
        op::SCROLL => {
            need(event, payload, 4)?;
            ClientFrame::Input(InputIntent::Scroll {
                dx: payload.get_i16(),
                dy: payload.get_i16(),
            })
        }
        op::KEY_DOWN | op::KEY_UP | op::BUTTON_DOWN | op::BUTTON_UP => {
            need(event, payload, 4)?;
            let code = payload.get_u32();
            ClientFrame::Input(match event {
                op::KEY_DOWN => InputIntent::KeyDown(code),
                op::KEY_UP => InputIntent::KeyUp(code),
                op::BUTTON_DOWN => InputIntent::ButtonDown(code),
                _ => InputIntent::ButtonUp(code),
            })
        }
        op::PING => {
            need(event, payload, 8)?;
            ClientFrame::Ping {
                client_ts: payload.get_u64(),
            }
        }
        other => ClientFrame::Unknown { event: other },
    };

    Ok(frame)
}

/// Encode a client frame. Used by clients and tests.
#[must_use]
pub fn encode_client_frame(frame: &ClientFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 8);
    match frame {
        ClientFrame::Input(intent) => match *intent {
            InputIntent::Move { x, y } => {
                put_header(&mut buf, op::MOVE, 4);
                buf.put_i16(x);
                buf.put_i16(y);
            }
            InputIntent::Scroll { dx, dy } => {
                put_header(&mut buf, op::SCROLL, 4);
                buf.put_i16(dx);
                buf.put_i16(dy);
            }
            InputIntent::KeyDown(code) => put_code(&mut buf, op::KEY_DOWN, code),
            InputIntent::KeyUp(code) => put_code(&mut buf, op::KEY_UP, code),
            InputIntent::ButtonDown(code) => put_code(&mut buf, op::BUTTON_DOWN, code),
            InputIntent::ButtonUp(code) => put_code(&mut buf, op::BUTTON_UP, code),
        },
        ClientFrame::Ping { client_ts } => {
            put_header(&mut buf, op::PING, 8);
            buf.put_u64(*client_ts);
        }
        ClientFrame::Unknown { event } => put_header(&mut buf, *event, 0),
    }
    buf.freeze()
}

/// Encode a server frame.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<Bytes, ProtocolError> {
    let mut buf;
    match frame {
        ServerFrame::CursorPosition { x, y } => {
            buf = BytesMut::with_capacity(HEADER_LEN + 4);
            put_header(&mut buf, op::CURSOR_POSITION, 4);
            buf.put_u16(*x);
            buf.put_u16(*y);
        }
        ServerFrame::CursorImage {
            width,
            height,
            x_hot,
            y_hot,
            png,
        } => {
            let len = 8 + png.len();
            let len16 = u16::try_from(len).map_err(|_| ProtocolError::Oversized(len))?;
            buf = BytesMut::with_capacity(HEADER_LEN + len);
            put_header(&mut buf, op::CURSOR_IMAGE, len16);
            buf.put_u16(*width);
            buf.put_u16(*height);
            buf.put_u16(*x_hot);
            buf.put_u16(*y_hot);
            buf.put_slice(png);
        }
        ServerFrame::Pong {
            client_ts,
            server_ts,
        } => {
            buf = BytesMut::with_capacity(HEADER_LEN + 16);
            put_header(&mut buf, op::PONG, 16);
            buf.put_u64(*client_ts);
            buf.put_u64(*server_ts);
        }
    }
    Ok(buf.freeze())
}

/// Decode one server frame. Returns `None` for unknown event codes.
pub fn decode_server_frame(data: &[u8]) -> Result<Option<ServerFrame>, ProtocolError> {
    let (event, mut payload) = split_frame(data)?;

    let frame = match event {
        op::CURSOR_POSITION => {
            need(event, payload, 4)?;
            ServerFrame::CursorPosition {
                x: payload.get_u16(),
                y: payload.get_u16(),
            }
        }
        op::CURSOR_IMAGE => {
            need(event, payload, 8)?;
            ServerFrame::CursorImage {
                width: payload.get_u16(),
                height: payload.get_u16(),
                x_hot: payload.get_u16(),
                y_hot: payload.get_u16(),
                png: Bytes::copy_from_slice(payload),
            }
        }
        op::PONG => {
            need(event, payload, 16)?;
            ServerFrame::Pong {
                client_ts: payload.get_u64(),
                server_ts: payload.get_u64(),
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(frame))
}

/// Split a frame into its event code and declared payload.
fn split_frame(data: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            event: data.first().copied().unwrap_or(0),
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let mut header = &data[..HEADER_LEN];
    let event = header.get_u8();
    let len = usize::from(header.get_u16());

    let body = &data[HEADER_LEN..];
    if body.len() < len {
        return Err(ProtocolError::Truncated {
            event,
            needed: len,
            available: body.len(),
        });
    }

    Ok((event, &body[..len]))
}

fn need(event: u8, payload: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if payload.len() < needed {
        return Err(ProtocolError::Truncated {
            event,
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

fn put_header(buf: &mut BytesMut, event: u8, len: u16) {
    buf.put_u8(event);
    buf.put_u16(len);
}

fn put_code(buf: &mut BytesMut, event: u8, code: u32) {
    put_header(buf, event, 4);
    buf.put_u32(code);
}
