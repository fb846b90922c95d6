//! Incremental frame reassembly over an unframed byte stream.

use crate::codec::{FRAME_TAG, HEADER_LEN};
use crate::error::{Result, SoundbarError};
use bytes::{Buf, Bytes, BytesMut};

/// Where the reassembler is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// Waiting for the 5-byte header
    AwaitHeader,
    /// Header consumed, waiting for this many ciphertext bytes
    AwaitBody(usize),
}

/// Stateful accumulator turning arbitrary read chunks into frame bodies
///
/// A single `feed` may yield zero, one or many frames. Surplus bytes are kept
/// for the next call.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    state: ReassemblyState,
}

impl FrameReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            state: ReassemblyState::AwaitHeader,
        }
    }

    /// Current state
    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Number of buffered bytes not yet emitted
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a frame is partially received
    pub fn is_mid_frame(&self) -> bool {
        self.state != ReassemblyState::AwaitHeader || !self.buffer.is_empty()
    }

    /// Feed a chunk and collect every frame it completes
    ///
    /// Fails with `Framing` when a header carries the wrong tag byte. The
    /// stream is unusable after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.state {
                ReassemblyState::AwaitHeader => {
                    if self.buffer.len() < HEADER_LEN {
                        break;
                    }
                    let tag = self.buffer[0];
                    if tag != FRAME_TAG {
                        return Err(SoundbarError::Framing(format!(
                            "unexpected tag byte 0x{:02X}",
                            tag
                        )));
                    }
                    self.buffer.advance(1);
                    let len = self.buffer.get_u32() as usize;
                    self.state = ReassemblyState::AwaitBody(len);
                }
                ReassemblyState::AwaitBody(len) => {
                    if self.buffer.len() < len {
                        break;
                    }
                    frames.push(self.buffer.split_to(len).freeze());
                    self.state = ReassemblyState::AwaitHeader;
                }
            }
        }

        Ok(frames)
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ReassemblyState::AwaitHeader;
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, frame};
    use crate::protocol::{Message, View};
    use proptest::prelude::*;

    fn two_frames() -> (Vec<u8>, Vec<Vec<u8>>) {
        let a = codec::encode(&Message::get(View::Equalizer)).unwrap();
        let b = codec::encode(&Message::get(View::Product)).unwrap();
        let bodies = vec![a[HEADER_LEN..].to_vec(), b[HEADER_LEN..].to_vec()];
        let mut stream = a;
        stream.extend_from_slice(&b);
        (stream, bodies)
    }

    #[test]
    fn test_two_frames_in_one_feed() {
        let (stream, bodies) = two_frames();
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.feed(&stream).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), bodies[0].as_slice());
        assert_eq!(frames[1].as_ref(), bodies[1].as_slice());
        assert!(!reassembler.is_mid_frame());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut reassembler = FrameReassembler::new();
        assert!(reassembler.feed(&[FRAME_TAG, 0, 0]).unwrap().is_empty());
        assert_eq!(reassembler.state(), ReassemblyState::AwaitHeader);
        assert!(reassembler.feed(&[0, 4]).unwrap().is_empty());
        assert_eq!(reassembler.state(), ReassemblyState::AwaitBody(4));
        let frames = reassembler.feed(&[1, 2, 3, 4]).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(&[1, 2, 3, 4])]);
    }

    #[test]
    fn test_truncated_body_emits_nothing() {
        let mut reassembler = FrameReassembler::new();
        let mut chunk = vec![FRAME_TAG, 0, 0, 0, 100];
        chunk.extend_from_slice(&[0u8; 40]);
        assert!(reassembler.feed(&chunk).unwrap().is_empty());
        assert_eq!(reassembler.state(), ReassemblyState::AwaitBody(100));
        assert_eq!(reassembler.buffered(), 40);
    }

    #[test]
    fn test_surplus_kept_for_next_frame() {
        let first = frame(&[9u8; 16]);
        let second = frame(&[7u8; 16]);
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second[..3]);

        let mut reassembler = FrameReassembler::new();
        assert_eq!(reassembler.feed(&chunk).unwrap().len(), 1);
        assert_eq!(reassembler.buffered(), 3);
        let frames = reassembler.feed(&second[3..]).unwrap();
        assert_eq!(frames[0].as_ref(), &[7u8; 16]);
    }

    #[test]
    fn test_bad_tag_is_framing_error() {
        let mut reassembler = FrameReassembler::new();
        let result = reassembler.feed(&[0x42, 0, 0, 0, 1, 0]);
        assert!(matches!(result, Err(SoundbarError::Framing(_))));
    }

    #[test]
    fn test_zero_length_frame() {
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.feed(&[FRAME_TAG, 0, 0, 0, 0]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let (stream, bodies) = two_frames();
        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(reassembler.feed(std::slice::from_ref(byte)).unwrap());
        }
        let frames: Vec<Vec<u8>> = frames.into_iter().map(|f| f.to_vec()).collect();
        assert_eq!(frames, bodies);
    }

    proptest! {
        #[test]
        fn test_split_boundaries_do_not_matter(
            bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..6),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let stream: Vec<u8> = bodies.iter().flat_map(|body| frame(body)).collect();

            let mut points: Vec<usize> = cuts.iter().map(|idx| idx.index(stream.len() + 1)).collect();
            points.push(0);
            points.push(stream.len());
            points.sort_unstable();
            points.dedup();

            let mut reassembler = FrameReassembler::new();
            let mut frames = Vec::new();
            for window in points.windows(2) {
                frames.extend(reassembler.feed(&stream[window[0]..window[1]]).unwrap());
            }

            let frames: Vec<Vec<u8>> = frames.into_iter().map(|f| f.to_vec()).collect();
            prop_assert_eq!(frames, bodies);
            prop_assert!(!reassembler.is_mid_frame());
        }
    }
}
