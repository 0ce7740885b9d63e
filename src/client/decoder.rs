use log::warn;
use crate::models::stream::{ StreamFrame, FRAME_PREFIX };

const FRAME_BOUNDARY: &[u8] = b"\n\n";
/// Upper bound on buffered bytes waiting for a frame boundary.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental decoder for the relay's frame stream.
///
/// Bytes are buffered until a blank-line boundary arrives, so frames split
/// across network chunks (or in the middle of a multi-byte character) decode
/// correctly. Frames that fail to parse are logged and skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_boundary(&self.buffer[start..]) {
            if let Some(frame) = decode_block(&self.buffer[start..start + pos]) {
                frames.push(frame);
            }
            start += pos + FRAME_BOUNDARY.len();
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_BUFFER_SIZE {
            warn!("Frame buffer exceeded {}KB without a boundary, dropping it", MAX_BUFFER_SIZE / 1024);
            self.buffer.clear();
        }
        frames
    }

    pub fn push_str(&mut self, s: &str) -> Vec<StreamFrame> {
        self.push(s.as_bytes())
    }

    /// Decodes whatever is left once the body has ended without a final boundary.
    pub fn finish(&mut self) -> Option<StreamFrame> {
        let rest = std::mem::take(&mut self.buffer);
        decode_block(&rest)
    }

    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn find_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(FRAME_BOUNDARY.len()).position(|w| w == FRAME_BOUNDARY)
}

fn decode_block(raw: &[u8]) -> Option<StreamFrame> {
    let block = String::from_utf8_lossy(raw);
    let line = block.trim();
    if line.is_empty() {
        return None;
    }

    let data = line.strip_prefix(FRAME_PREFIX).or_else(|| line.strip_prefix("data:"))?;
    match StreamFrame::decode_data(data) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Skipping malformed frame {:?}: {}", data, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_str("data: {\"content\":\"He").is_empty());
        assert!(decoder.has_remaining());
        let frames = decoder.push_str("l\"}\n\ndata: [DONE]\n\n");
        assert_eq!(frames, vec![StreamFrame::content("Hel"), StreamFrame::Done]);
        assert!(!decoder.has_remaining());
    }

    #[test]
    fn survives_split_multibyte_characters() {
        let bytes = "data: {\"content\":\"café\"}\n\n".as_bytes();
        let split = bytes.len() - 5;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![StreamFrame::content("café")]);
    }

    #[test]
    fn skips_malformed_frames() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push_str(
            "data: {\"content\":\"a\"}\n\ndata: {oops\n\n: comment\n\ndata: {\"content\":\"b\"}\n\n"
        );
        assert_eq!(frames, vec![StreamFrame::content("a"), StreamFrame::content("b")]);
    }

    #[test]
    fn error_frames_are_recognized() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push_str("data: {\"content\":\"\",\"error\":\"boom\"}\n\n");
        assert_eq!(frames, vec![StreamFrame::Error("boom".into())]);
    }

    #[test]
    fn large_chunks_of_complete_frames_decode_fully() {
        let mut payload = "data: {\"content\":\"0123456789abcdef0123456789abcdef0123456789\"}\n\n".repeat(20_000);
        payload.push_str("data: [DONE]\n\n");
        assert!(payload.len() > MAX_BUFFER_SIZE);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push_str(&payload);
        assert_eq!(frames.len(), 20_001);
        assert_eq!(frames.last(), Some(&StreamFrame::Done));
        assert!(!decoder.has_remaining());
    }

    #[test]
    fn oversized_unterminated_tail_is_dropped_after_draining() {
        let mut decoder = FrameDecoder::new();
        let mut payload = String::from("data: {\"content\":\"kept\"}\n\n");
        payload.push_str(&"x".repeat(MAX_BUFFER_SIZE + 1));
        assert_eq!(decoder.push_str(&payload), vec![StreamFrame::content("kept")]);
        assert!(!decoder.has_remaining());
    }

    #[test]
    fn finish_flushes_trailing_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_str("data: {\"content\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), Some(StreamFrame::content("tail")));
        assert_eq!(decoder.finish(), None);
    }
}
