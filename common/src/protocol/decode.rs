use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use super::{
    ImagePayload, Message, CAMERA_READY, CHUNK, ERROR, EXECUTING, FRAME_END, FRAME_START,
    NO_OBJECT, OBJECT_DETECTED, PREFIXES,
};
use crate::command::Command;
use crate::detect::{DetectionResult, ObjectRegion};

/// A text line longer than this without a newline is treated as garbage.
pub const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("line exceeds maximum length without a terminator ({len} bytes buffered)")]
    LineTooLong { len: usize },
    #[error("malformed protocol line: {line}")]
    Malformed { line: String },
    #[error("declared frame of {declared} bytes exceeds limit of {max}")]
    Oversized { declared: usize, max: usize },
    #[error("chunk of {len} bytes outside any frame")]
    UnexpectedChunk { len: usize },
    #[error("chunk of {chunk} bytes overflows frame: {received}/{declared} already received")]
    ChunkOverflow {
        declared: usize,
        received: usize,
        chunk: usize,
    },
    #[error("frame ended with {received} bytes, header declared {declared}")]
    LengthMismatch { declared: usize, received: usize },
    #[error("frame interrupted by a new header after {received}/{declared} bytes")]
    Truncated { declared: usize, received: usize },
    #[error("timed out waiting for frame data: {received}/{declared} bytes")]
    Timeout { declared: usize, received: usize },
}

enum State {
    /// Waiting for a complete text line.
    Line,
    /// Reading a chunk body by count.
    ChunkBody { remaining: usize, discard: bool },
    /// Consuming the newline that follows a chunk body.
    ChunkTrailer,
    /// Dropping bytes until a recognised prefix starts a line.
    /// `line_start` says whether the first buffered byte begins a line.
    Resync { line_start: bool },
}

struct PendingFrame {
    declared: usize,
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Declared length was over the limit; chunks are skipped.
    oversized: bool,
}

enum Scan {
    Found(usize),
    Partial(usize),
    Nothing,
}

/// Resumable protocol decoder.
///
/// Bytes are fed with [`Decoder::push`] in whatever pieces the link delivers;
/// [`Decoder::next_message`] yields each complete message or framing error as
/// soon as enough bytes are buffered. Lines and chunk bodies may be split
/// across any number of pushes.
pub struct Decoder {
    buffer: BytesMut,
    state: State,
    frame: Option<PendingFrame>,
    max_frame_bytes: usize,
}

impl Decoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Line,
            frame: None,
            max_frame_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// True while an image payload is open, i.e. more binary data is owed.
    pub fn is_mid_payload(&self) -> bool {
        self.frame.is_some() || matches!(self.state, State::ChunkBody { .. } | State::ChunkTrailer)
    }

    pub fn is_resyncing(&self) -> bool {
        matches!(self.state, State::Resync { .. })
    }

    /// Called by the reader when the link has been silent for the chunk
    /// timeout. Abandons any open payload and resynchronises.
    pub fn expire(&mut self) -> Option<FramingError> {
        if !self.is_mid_payload() {
            return None;
        }
        let (declared, received) = self
            .frame
            .take()
            .map(|f| (f.declared, f.data.len()))
            .unwrap_or((0, 0));
        self.buffer.clear();
        self.state = State::Resync { line_start: true };
        Some(FramingError::Timeout { declared, received })
    }

    pub fn next_message(&mut self) -> Option<Result<Message, FramingError>> {
        loop {
            match self.state {
                State::Line => {
                    let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                        if self.buffer.len() > MAX_LINE_LEN {
                            let len = self.buffer.len();
                            self.frame = None;
                            self.state = State::Resync { line_start: false };
                            return Some(Err(FramingError::LineTooLong { len }));
                        }
                        return None;
                    };
                    if pos > MAX_LINE_LEN {
                        self.buffer.advance(pos + 1);
                        self.frame = None;
                        self.state = State::Resync { line_start: true };
                        return Some(Err(FramingError::LineTooLong { len: pos }));
                    }
                    let line = self.buffer.split_to(pos + 1);
                    let line = trim_line(&line);
                    if let Some(result) = self.handle_line(line) {
                        return Some(result);
                    }
                }
                State::ChunkBody { remaining, discard } => {
                    if self.buffer.is_empty() {
                        return None;
                    }
                    let n = remaining.min(self.buffer.len());
                    let body = self.buffer.split_to(n);
                    if !discard {
                        if let Some(frame) = self.frame.as_mut() {
                            frame.data.extend_from_slice(&body);
                        }
                    }
                    let remaining = remaining - n;
                    if remaining > 0 {
                        self.state = State::ChunkBody { remaining, discard };
                        return None;
                    }
                    self.state = State::ChunkTrailer;
                }
                State::ChunkTrailer => match self.buffer.first() {
                    None => return None,
                    Some(b'\n') => {
                        self.buffer.advance(1);
                        self.state = State::Line;
                    }
                    Some(b'\r') => {
                        if self.buffer.len() < 2 {
                            return None;
                        }
                        let skip = if self.buffer[1] == b'\n' { 2 } else { 1 };
                        self.buffer.advance(skip);
                        self.state = State::Line;
                    }
                    Some(_) => self.state = State::Line,
                },
                State::Resync { line_start } => match scan_for_prefix(&self.buffer, line_start) {
                    Scan::Found(pos) => {
                        debug!(discarded = pos, "resynchronised on protocol prefix");
                        self.buffer.advance(pos);
                        self.state = State::Line;
                    }
                    Scan::Partial(pos) => {
                        self.buffer.advance(pos);
                        self.state = State::Resync { line_start: true };
                        return None;
                    }
                    Scan::Nothing => {
                        let line_start = self.buffer.last() == Some(&b'\n');
                        trace!(discarded = self.buffer.len(), "no prefix while resyncing");
                        self.buffer.clear();
                        self.state = State::Resync { line_start };
                        return None;
                    }
                },
            }
        }
    }

    fn handle_line(&mut self, line: &[u8]) -> Option<Result<Message, FramingError>> {
        if line.is_empty() {
            return None;
        }
        if line == CAMERA_READY {
            return Some(Ok(Message::CameraReady));
        }
        if line == NO_OBJECT {
            return Some(Ok(Message::Detection(DetectionResult::NoObject)));
        }
        if line == FRAME_END {
            return self.finish_frame();
        }
        if let Some(rest) = line.strip_prefix(OBJECT_DETECTED) {
            return Some(parse_detection(rest, line));
        }
        if let Some(rest) = line.strip_prefix(ERROR) {
            return Some(Ok(Message::Error(String::from_utf8_lossy(rest).into_owned())));
        }
        if let Some(rest) = line.strip_prefix(FRAME_START) {
            return self.start_frame(rest, line);
        }
        if let Some(rest) = line.strip_prefix(CHUNK) {
            return self.start_chunk(rest, line);
        }
        if let Some(rest) = line.strip_prefix(EXECUTING) {
            let name = String::from_utf8_lossy(rest);
            return match Command::from_display_name(&name) {
                Some(cmd) => Some(Ok(Message::Ack(cmd))),
                None => {
                    debug!(name = %name, "unknown acknowledgement, ignoring");
                    None
                }
            };
        }
        trace!(line = %String::from_utf8_lossy(line), "unrecognised line, ignoring");
        None
    }

    fn start_frame(&mut self, rest: &[u8], line: &[u8]) -> Option<Result<Message, FramingError>> {
        let fields = parse_fields::<3>(rest).and_then(|[declared, width, height]| {
            Some((
                usize::try_from(declared).ok()?,
                u32::try_from(width).ok()?,
                u32::try_from(height).ok()?,
            ))
        });
        let Some((declared, width, height)) = fields else {
            self.frame = None;
            return Some(Err(malformed(line)));
        };
        let oversized = declared > self.max_frame_bytes;

        let previous = self.frame.replace(PendingFrame {
            declared,
            width,
            height,
            data: if oversized {
                Vec::new()
            } else {
                Vec::with_capacity(declared)
            },
            oversized,
        });

        if oversized {
            return Some(Err(FramingError::Oversized {
                declared,
                max: self.max_frame_bytes,
            }));
        }
        match previous {
            Some(prev) if !prev.oversized => Some(Err(FramingError::Truncated {
                declared: prev.declared,
                received: prev.data.len(),
            })),
            _ => None,
        }
    }

    fn start_chunk(&mut self, rest: &[u8], line: &[u8]) -> Option<Result<Message, FramingError>> {
        let len = match parse_fields::<1>(rest) {
            Some([len]) if len as usize <= self.max_frame_bytes => len as usize,
            _ => {
                self.frame = None;
                self.state = State::Resync { line_start: true };
                return Some(Err(malformed(line)));
            }
        };

        let Some(frame) = self.frame.as_ref() else {
            self.state = State::ChunkBody {
                remaining: len,
                discard: true,
            };
            return Some(Err(FramingError::UnexpectedChunk { len }));
        };

        if !frame.oversized && frame.data.len() + len > frame.declared {
            let err = FramingError::ChunkOverflow {
                declared: frame.declared,
                received: frame.data.len(),
                chunk: len,
            };
            self.frame = None;
            self.state = State::Resync { line_start: false };
            return Some(Err(err));
        }

        self.state = if len == 0 {
            State::ChunkTrailer
        } else {
            State::ChunkBody {
                remaining: len,
                discard: frame.oversized,
            }
        };
        None
    }

    fn finish_frame(&mut self) -> Option<Result<Message, FramingError>> {
        let frame = match self.frame.take() {
            Some(frame) if !frame.oversized => frame,
            Some(_) => return None,
            None => {
                debug!("FRAME_END without FRAME_START, ignoring");
                return None;
            }
        };
        if frame.data.len() != frame.declared {
            return Some(Err(FramingError::LengthMismatch {
                declared: frame.declared,
                received: frame.data.len(),
            }));
        }
        Some(Ok(Message::Image(ImagePayload {
            data: frame.data,
            width: frame.width,
            height: frame.height,
        })))
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn malformed(line: &[u8]) -> FramingError {
    FramingError::Malformed {
        line: String::from_utf8_lossy(line).into_owned(),
    }
}

/// Parse exactly `N` colon-separated unsigned integers.
fn parse_fields<const N: usize>(rest: &[u8]) -> Option<[u64; N]> {
    let text = std::str::from_utf8(rest).ok()?;
    let mut out = [0u64; N];
    let mut parts = text.split(':');
    for slot in out.iter_mut() {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn parse_detection(rest: &[u8], line: &[u8]) -> Result<Message, FramingError> {
    let [x, y, width, height, changed] = parse_fields::<5>(rest).ok_or_else(|| malformed(line))?;
    let field = |v: u64| u32::try_from(v).map_err(|_| malformed(line));
    Ok(Message::Detection(DetectionResult::Object(ObjectRegion {
        x: field(x)?,
        y: field(y)?,
        width: field(width)?,
        height: field(height)?,
        changed_pixels: field(changed)?,
    })))
}

/// Find the first line start that begins with (or could still grow into) a
/// recognised prefix.
fn scan_for_prefix(buf: &[u8], line_start: bool) -> Scan {
    for pos in 0..buf.len() {
        let at_line_start = if pos == 0 {
            line_start
        } else {
            buf[pos - 1] == b'\n'
        };
        if !at_line_start {
            continue;
        }
        let rest = &buf[pos..];
        if PREFIXES.iter().any(|p| rest.starts_with(p)) {
            return Scan::Found(pos);
        }
        if PREFIXES.iter().any(|p| p.starts_with(rest)) {
            return Scan::Partial(pos);
        }
    }
    Scan::Nothing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode::{encode, encode_image, CHUNK_SIZE};

    const MAX: usize = 5 * 1024 * 1024;

    fn drain(decoder: &mut Decoder) -> Vec<Result<Message, FramingError>> {
        let mut out = Vec::new();
        while let Some(item) = decoder.next_message() {
            out.push(item);
        }
        out
    }

    fn decode_all(bytes: &[u8]) -> Vec<Result<Message, FramingError>> {
        let mut decoder = Decoder::new(MAX);
        decoder.push(bytes);
        drain(&mut decoder)
    }

    fn image(data: Vec<u8>) -> Message {
        Message::Image(ImagePayload {
            data,
            width: 320,
            height: 240,
        })
    }

    /// Payload bytes that look as much like protocol text as possible.
    fn hostile_payload(n: usize) -> Vec<u8> {
        let pattern = b"\nFRAME_END\n\r\nCHUNK:9\nNO_OBJECT\n\xFF\xD8\x00";
        pattern.iter().cycle().take(n).copied().collect()
    }

    #[test]
    fn image_round_trip_across_chunk_boundaries() {
        for n in [
            0,
            1,
            CHUNK_SIZE - 1,
            CHUNK_SIZE,
            CHUNK_SIZE + 1,
            3 * CHUNK_SIZE + 17,
        ] {
            let payload = hostile_payload(n);
            let wire = encode_image(&payload, 320, 240, CHUNK_SIZE);
            let decoded = decode_all(&wire);
            assert_eq!(decoded, vec![Ok(image(payload))], "n = {n}");
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let payload = hostile_payload(2 * CHUNK_SIZE + 5);
        let mut wire = encode(&Message::CameraReady);
        wire.extend(encode_image(&payload, 320, 240, CHUNK_SIZE));
        wire.extend_from_slice(b"OBJECT_DETECTED:85:120:24:24:36\r\n");

        let mut decoder = Decoder::new(MAX);
        let mut out = Vec::new();
        for byte in &wire {
            decoder.push(std::slice::from_ref(byte));
            out.extend(drain(&mut decoder));
        }

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Ok(Message::CameraReady));
        assert_eq!(out[1], Ok(image(payload)));
        assert_eq!(
            out[2],
            Ok(Message::Detection(DetectionResult::Object(ObjectRegion {
                x: 85,
                y: 120,
                width: 24,
                height: 24,
                changed_pixels: 36,
            })))
        );
    }

    #[test]
    fn status_lines_and_acks() {
        let out = decode_all(b"NO_OBJECT\nERROR:Camera capture failed\nExecuting: Move Right\n");
        assert_eq!(
            out,
            vec![
                Ok(Message::Detection(DetectionResult::NoObject)),
                Ok(Message::Error("Camera capture failed".into())),
                Ok(Message::Ack(Command::MoveRight)),
            ]
        );
    }

    #[test]
    fn unknown_lines_are_ignored() {
        let out = decode_all(b"rst:0x1 (POWERON_RESET)\nHELLO\n\nNO_OBJECT\nExecuting: Dance\n");
        assert_eq!(out, vec![Ok(Message::Detection(DetectionResult::NoObject))]);
    }

    #[test]
    fn malformed_detection_is_reported_without_resync() {
        let mut decoder = Decoder::new(MAX);
        decoder.push(b"OBJECT_DETECTED:1:2:x\nNO_OBJECT\n");
        let out = drain(&mut decoder);
        assert!(matches!(out[0], Err(FramingError::Malformed { .. })));
        assert_eq!(out[1], Ok(Message::Detection(DetectionResult::NoObject)));
        assert!(!decoder.is_resyncing());
    }

    #[test]
    fn frame_header_dimensions_must_fit_u32() {
        let mut decoder = Decoder::new(MAX);
        decoder.push(b"FRAME_START:1:4294967297:1\nCHUNK:1\nx\nFRAME_END\nNO_OBJECT\n");
        let out = drain(&mut decoder);
        assert!(matches!(out[0], Err(FramingError::Malformed { .. })));
        assert!(!out.iter().any(|item| matches!(item, Ok(Message::Image(_)))));
        assert_eq!(
            out.last(),
            Some(&Ok(Message::Detection(DetectionResult::NoObject)))
        );
    }

    #[test]
    fn short_frame_is_length_mismatch() {
        let out = decode_all(b"FRAME_START:10:2:2\nCHUNK:4\nabcd\nFRAME_END\nNO_OBJECT\n");
        assert_eq!(
            out,
            vec![
                Err(FramingError::LengthMismatch {
                    declared: 10,
                    received: 4
                }),
                Ok(Message::Detection(DetectionResult::NoObject)),
            ]
        );
    }

    #[test]
    fn overflowing_chunk_resyncs_on_next_line() {
        let out = decode_all(b"FRAME_START:3:2:2\nCHUNK:8\nFRAME_ENDxx\nNO_OBJECT\n");
        assert_eq!(
            out,
            vec![
                Err(FramingError::ChunkOverflow {
                    declared: 3,
                    received: 0,
                    chunk: 8
                }),
                Ok(Message::Detection(DetectionResult::NoObject)),
            ]
        );
    }

    #[test]
    fn chunk_outside_frame_is_skipped_by_count() {
        let out = decode_all(b"CHUNK:5\nNO_OB\nCAMERA_READY\n");
        assert_eq!(
            out,
            vec![
                Err(FramingError::UnexpectedChunk { len: 5 }),
                Ok(Message::CameraReady),
            ]
        );
    }

    #[test]
    fn new_header_truncates_open_frame() {
        let mut wire = b"FRAME_START:100:2:2\nCHUNK:3\nabc\n".to_vec();
        wire.extend(encode_image(b"xyz", 2, 2, CHUNK_SIZE));
        let out = decode_all(&wire);
        assert_eq!(
            out,
            vec![
                Err(FramingError::Truncated {
                    declared: 100,
                    received: 3
                }),
                Ok(Message::Image(ImagePayload {
                    data: b"xyz".to_vec(),
                    width: 2,
                    height: 2
                })),
            ]
        );
    }

    #[test]
    fn oversized_frame_is_skipped() {
        let mut decoder = Decoder::new(4);
        decoder.push(b"FRAME_START:6:2:3\nCHUNK:3\nabc\nCHUNK:3\ndef\nFRAME_END\nNO_OBJECT\n");
        assert_eq!(
            drain(&mut decoder),
            vec![
                Err(FramingError::Oversized { declared: 6, max: 4 }),
                Ok(Message::Detection(DetectionResult::NoObject)),
            ]
        );
    }

    #[test]
    fn timeout_mid_chunk_then_resync() {
        let mut decoder = Decoder::new(MAX);
        decoder.push(b"FRAME_START:2000:320:240\nCHUNK:1024\n");
        decoder.push(&[0xAA; 300]);
        assert!(drain(&mut decoder).is_empty());
        assert!(decoder.is_mid_payload());

        assert_eq!(
            decoder.expire(),
            Some(FramingError::Timeout {
                declared: 2000,
                received: 300
            })
        );
        assert!(!decoder.is_mid_payload());
        assert_eq!(decoder.expire(), None);

        // stale tail of the lost chunk, then a fresh line
        decoder.push(&[0xAA; 50]);
        decoder.push(b"\nNO_OBJECT\n");
        assert_eq!(
            drain(&mut decoder),
            vec![Ok(Message::Detection(DetectionResult::NoObject))]
        );
    }

    #[test]
    fn resync_ignores_prefixes_inside_binary_runs() {
        let mut decoder = Decoder::new(MAX);
        decoder.push(b"FRAME_START:2:1:1\nCHUNK:9\n");
        assert!(matches!(
            drain(&mut decoder)[0],
            Err(FramingError::ChunkOverflow { .. })
        ));
        // "FRAME_END" here is not at a line start, so it must not end the resync
        decoder.push(b"\xFF\xD8garbageFRAME_END");
        assert!(drain(&mut decoder).is_empty());
        assert!(decoder.is_resyncing());
        decoder.push(b"\nCAMERA_READY\n");
        assert_eq!(drain(&mut decoder), vec![Ok(Message::CameraReady)]);
    }

    #[test]
    fn resync_waits_on_partial_prefix() {
        let mut decoder = Decoder::new(MAX);
        decoder.push(&[b'z'; MAX_LINE_LEN + 10]);
        assert!(matches!(
            drain(&mut decoder)[..],
            [Err(FramingError::LineTooLong { .. })]
        ));
        decoder.push(b"\nNO_OB");
        assert!(drain(&mut decoder).is_empty());
        decoder.push(b"JECT\n");
        assert_eq!(
            drain(&mut decoder),
            vec![Ok(Message::Detection(DetectionResult::NoObject))]
        );
    }
}
