//! `$$`-terminated framing for the persistent stream channel.
//!
//! Stream reads arrive in arbitrary chunks; `FrameBuffer` accumulates them and
//! hands back complete payloads with the terminator stripped, including when
//! the terminator itself straddles two reads.

/// Two-byte terminator appended after every serialized message on a stream.
pub const FRAME_TERMINATOR: &[u8] = b"$$";

/// Upper bound on buffered bytes without a terminator before the buffer is reset.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Index before which no terminator can start.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload with the terminator.
    pub fn frame(mut payload: Vec<u8>) -> Vec<u8> {
        payload.extend_from_slice(FRAME_TERMINATOR);
        payload
    }

    /// Feed bytes from a stream read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_PENDING_BYTES && self.find_terminator().is_none() {
            tracing::warn!(
                pending = self.buf.len(),
                "Discarding oversized unterminated stream data"
            );
            self.buf.clear();
            self.scanned = 0;
        }
    }

    /// Pop the next complete payload, terminator stripped.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.find_terminator() {
            Some(at) => {
                let frame = self.buf[..at].to_vec();
                self.buf.drain(..at + FRAME_TERMINATOR.len());
                self.scanned = 0;
                Some(frame)
            }
            None => {
                // The last byte may be the first half of a split terminator.
                self.scanned = self.buf.len().saturating_sub(FRAME_TERMINATOR.len() - 1);
                None
            }
        }
    }

    /// Drain every complete payload currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn find_terminator(&self) -> Option<usize> {
        self.buf
            .get(self.scanned..)?
            .windows(FRAME_TERMINATOR.len())
            .position(|window| window == FRAME_TERMINATOR)
            .map(|offset| self.scanned + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode_frame, Message, Payload};
    use crate::models::{Action, ActionKind, ActionRecord, Arrival};

    fn two_messages() -> (Vec<Message>, Vec<u8>) {
        let messages = vec![
            Message::from_monitor(Payload::DispatchActions(vec![ActionRecord::new(
                1,
                Action::new(ActionKind::ArmAndTakeoff { alt: 5.0 }, 1).synced(),
            )])),
            Message::from_drone(Payload::ActionArrived(Arrival { cid: 1, step: 1 })),
        ];
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend(encode_frame(message).unwrap());
        }
        (messages, stream)
    }

    #[test]
    fn every_split_point_yields_both_messages() {
        let (messages, stream) = two_messages();

        for split in 0..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut decoded = Vec::new();

            buffer.extend(&stream[..split]);
            decoded.extend(buffer.drain_frames());
            buffer.extend(&stream[split..]);
            decoded.extend(buffer.drain_frames());

            let decoded: Vec<Message> = decoded.iter().map(|f| decode(f).unwrap()).collect();
            assert_eq!(decoded, messages, "split at {split}");
            assert_eq!(buffer.pending(), 0);
        }
    }

    #[test]
    fn byte_at_a_time_feed() {
        let (messages, stream) = two_messages();
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for byte in &stream {
            buffer.extend(std::slice::from_ref(byte));
            frames.extend(buffer.drain_frames());
        }
        assert_eq!(frames.len(), messages.len());
    }

    #[test]
    fn partial_frame_is_held() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"[1,2]$");
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.pending(), 6);
        buffer.extend(b"$[3]");
        assert_eq!(buffer.next_frame().as_deref(), Some(&b"[1,2]"[..]));
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.pending(), 3);
    }

    #[test]
    fn oversized_garbage_is_dropped() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&vec![b'x'; MAX_PENDING_BYTES + 1]);
        assert_eq!(buffer.pending(), 0);
    }
}
