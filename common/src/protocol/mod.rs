//! Camera/host/motor serial protocol.
//!
//! Text lines are `\n`-terminated ASCII. Image payloads are carried as
//!
//! ```text
//! FRAME_START:<len>:<width>:<height>\n
//! CHUNK:<n>\n <n raw bytes> \n      (repeated)
//! FRAME_END\n
//! ```
//!
//! Chunk bodies are read by count and never scanned for delimiters, so image
//! bytes may contain anything, including `\n` and protocol keywords.

pub mod decode;
pub mod encode;

use crate::command::Command;
use crate::detect::DetectionResult;

pub use decode::{Decoder, FramingError};
pub use encode::{encode, encode_image, CHUNK_SIZE};

pub(crate) const CAMERA_READY: &[u8] = b"CAMERA_READY";
pub(crate) const OBJECT_DETECTED: &[u8] = b"OBJECT_DETECTED:";
pub(crate) const NO_OBJECT: &[u8] = b"NO_OBJECT";
pub(crate) const ERROR: &[u8] = b"ERROR:";
pub(crate) const FRAME_START: &[u8] = b"FRAME_START:";
pub(crate) const CHUNK: &[u8] = b"CHUNK:";
pub(crate) const FRAME_END: &[u8] = b"FRAME_END";
pub(crate) const EXECUTING: &[u8] = b"Executing:";

/// Every prefix the decoder recognises. Resynchronisation stops at these.
pub(crate) const PREFIXES: [&[u8]; 8] = [
    CAMERA_READY,
    OBJECT_DETECTED,
    NO_OBJECT,
    ERROR,
    FRAME_START,
    CHUNK,
    FRAME_END,
    EXECUTING,
];

/// A complete image received between `FRAME_START` and `FRAME_END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CameraReady,
    Detection(DetectionResult),
    Error(String),
    Image(ImagePayload),
    /// `Executing: <name>` from the motor controller.
    Ack(Command),
}
