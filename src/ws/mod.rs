//! WebSocket wire protocol, implemented from scratch (C1).

pub mod codec;

pub use codec::{
    build_binary_frame, build_close_frame, build_pong_frame, derive_accept_key, FrameDecoder,
    Message, Opcode,
};
