use super::decode::MAX_LINE_LEN;
use super::{ImagePayload, Message, ERROR};
use crate::detect::DetectionResult;

/// Bytes per `CHUNK` unit. Fixed, not negotiated.
pub const CHUNK_SIZE: usize = 1024;

/// Longest free-text tail in bytes, so `ERROR:<text>\n` fits one decoder line.
const MAX_ERROR_TEXT: usize = MAX_LINE_LEN - ERROR.len() - 1;

/// Serialize one message to its wire form.
pub fn encode(msg: &Message) -> Vec<u8> {
    match msg {
        Message::CameraReady => b"CAMERA_READY\n".to_vec(),
        Message::Detection(DetectionResult::NoObject) => b"NO_OBJECT\n".to_vec(),
        Message::Detection(DetectionResult::Object(r)) => format!(
            "OBJECT_DETECTED:{}:{}:{}:{}:{}\n",
            r.x, r.y, r.width, r.height, r.changed_pixels
        )
        .into_bytes(),
        Message::Error(text) => format!("ERROR:{}\n", sanitize(text)).into_bytes(),
        Message::Image(ImagePayload {
            data,
            width,
            height,
        }) => encode_image(data, *width, *height, CHUNK_SIZE),
        Message::Ack(cmd) => format!("Executing: {}\n", cmd.display_name()).into_bytes(),
    }
}

/// Frame an image payload: header, count-prefixed chunks, trailer.
pub fn encode_image(data: &[u8], width: u32, height: u32, chunk_size: usize) -> Vec<u8> {
    let chunk_size = chunk_size.max(1);
    let chunks = data.len().div_ceil(chunk_size);
    let mut buf = Vec::with_capacity(data.len() + 32 + chunks * 16);

    buf.extend_from_slice(format!("FRAME_START:{}:{}:{}\n", data.len(), width, height).as_bytes());
    for chunk in data.chunks(chunk_size) {
        buf.extend_from_slice(format!("CHUNK:{}\n", chunk.len()).as_bytes());
        buf.extend_from_slice(chunk);
        buf.push(b'\n');
    }
    buf.extend_from_slice(b"FRAME_END\n");
    buf
}

/// Keep free text on one line and within the decoder's line limit.
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_ERROR_TEXT));
    for c in text.chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if out.len() + c.len_utf8() > MAX_ERROR_TEXT {
            break;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::detect::ObjectRegion;

    #[test]
    fn text_lines() {
        assert_eq!(encode(&Message::CameraReady), b"CAMERA_READY\n");
        assert_eq!(
            encode(&Message::Detection(DetectionResult::NoObject)),
            b"NO_OBJECT\n"
        );
        let obj = DetectionResult::Object(ObjectRegion {
            x: 85,
            y: 120,
            width: 24,
            height: 24,
            changed_pixels: 36,
        });
        assert_eq!(
            encode(&Message::Detection(obj)),
            b"OBJECT_DETECTED:85:120:24:24:36\n"
        );
        assert_eq!(
            encode(&Message::Ack(Command::MoveLeft)),
            b"Executing: Move Left\n"
        );
    }

    #[test]
    fn error_text_stays_on_one_line() {
        let bytes = encode(&Message::Error("camera\ncapture failed\r".into()));
        assert_eq!(bytes, b"ERROR:camera capture failed \n");
        let long = encode(&Message::Error("x".repeat(1000)));
        assert_eq!(long.len(), MAX_LINE_LEN);
    }

    #[test]
    fn multibyte_error_text_is_cut_on_a_char_boundary() {
        let bytes = encode(&Message::Error("é".repeat(300)));
        assert!(bytes.len() <= MAX_LINE_LEN);

        let mut decoder = crate::protocol::Decoder::new(1024);
        decoder.push(&bytes);
        let Some(Ok(Message::Error(text))) = decoder.next_message() else {
            panic!("error line did not decode");
        };
        assert!(text.chars().all(|c| c == 'é'));
        assert_eq!(text.len(), MAX_ERROR_TEXT - MAX_ERROR_TEXT % 2);
        assert!(decoder.next_message().is_none());
    }

    #[test]
    fn image_layout() {
        let bytes = encode_image(b"abcde", 2, 2, 2);
        assert_eq!(
            bytes,
            b"FRAME_START:5:2:2\nCHUNK:2\nab\nCHUNK:2\ncd\nCHUNK:1\ne\nFRAME_END\n"
        );
    }

    #[test]
    fn empty_image_has_no_chunks() {
        assert_eq!(
            encode_image(&[], 320, 240, CHUNK_SIZE),
            b"FRAME_START:0:320:240\nFRAME_END\n"
        );
    }
}
