//! Control-channel protocol
//!
//! Plain-text, newline-free messages with case-sensitive literals:
//! - inbound: `get_response`, `get_silence`, `start_recording`,
//!   `stop_recording`, `upload:START` / `upload:<data>` / `upload:DONE`,
//!   `preset:<name>`
//! - outbound: `Human: ..`, `AI: ..`, `playing: ..`, `image: ..`, `log: ..`,
//!   `uploaded: .. processed`

pub mod messages;
pub mod upload;

pub use messages::{Command, OutboundMessage, UploadCommand};
pub use upload::{UploadReassembler, UploadedImage};
