// src/process/buffer.rs

//! Per-process output accumulator.
//!
//! Bytes arrive from the transport in arbitrary chunks. They are held as
//! *fresh* bytes until the poll step drains them into the *ready* text,
//! which the notifier hands out and clears on every flush.
//!
//! Ready text keeps arrival order across both streams, partial lines
//! included. The only thing ever held back is an incomplete UTF-8 sequence
//! at the end of a stream, so a multi-byte character split across two
//! transport reads is never mangled.

use std::mem;

use crate::types::{OutputChunk, OutputStream};

#[derive(Debug, Clone)]
struct RawChunk {
    stream: OutputStream,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct OutputBuffer {
    /// Bytes appended by channel callbacks since the last drain.
    fresh: Vec<RawChunk>,
    /// Start of a character whose remaining bytes have not arrived yet.
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
    /// Decoded text waiting for the next flush.
    ready: Vec<OutputChunk>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes produced on `stream`.
    pub fn append(&mut self, stream: OutputStream, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self.fresh.last_mut() {
            Some(last) if last.stream == stream => last.bytes.extend_from_slice(bytes),
            _ => self.fresh.push(RawChunk {
                stream,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// True if bytes arrived since the last drain.
    pub fn has_fresh(&self) -> bool {
        !self.fresh.is_empty()
    }

    /// True if anything at all is waiting to be flushed.
    pub fn has_unread(&self) -> bool {
        !self.ready.is_empty()
            || !self.fresh.is_empty()
            || !self.stdout_pending.is_empty()
            || !self.stderr_pending.is_empty()
    }

    /// Decode the fresh bytes into the ready text, in arrival order.
    pub fn drain(&mut self) {
        for chunk in mem::take(&mut self.fresh) {
            let pending = self.pending_mut(chunk.stream);
            pending.extend_from_slice(&chunk.bytes);

            let keep = incomplete_suffix_len(pending);
            let held = pending.split_off(pending.len() - keep);
            let complete = mem::replace(pending, held);
            if !complete.is_empty() {
                self.push_ready(chunk.stream, String::from_utf8_lossy(&complete).into_owned());
            }
        }
    }

    /// Take everything readable and clear the buffer.
    ///
    /// With `terminal == false` an incomplete UTF-8 sequence at the very end
    /// of a stream is kept back for the next flush; with `terminal == true`
    /// every remaining byte is decoded (lossily if need be).
    pub fn take(&mut self, terminal: bool) -> Vec<OutputChunk> {
        self.drain();

        if terminal {
            for stream in [OutputStream::Stdout, OutputStream::Stderr] {
                let held = mem::take(self.pending_mut(stream));
                if !held.is_empty() {
                    self.push_ready(stream, String::from_utf8_lossy(&held).into_owned());
                }
            }
        }

        mem::take(&mut self.ready)
    }

    fn pending_mut(&mut self, stream: OutputStream) -> &mut Vec<u8> {
        match stream {
            OutputStream::Stdout => &mut self.stdout_pending,
            OutputStream::Stderr => &mut self.stderr_pending,
        }
    }

    fn push_ready(&mut self, stream: OutputStream, text: String) {
        if text.is_empty() {
            return;
        }
        match self.ready.last_mut() {
            Some(last) if last.stream == stream => last.text.push_str(&text),
            _ => self.ready.push(OutputChunk { stream, text }),
        }
    }
}

/// Concatenate chunk texts into the untagged `lines` form.
pub fn join_chunks(chunks: &[OutputChunk]) -> String {
    chunks.iter().map(|c| c.text.as_str()).collect()
}

/// Length of a trailing, not-yet-complete UTF-8 sequence.
///
/// Only the last character is looked at; invalid bytes earlier on are left
/// to the lossy decoder.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    let floor = bytes.len().saturating_sub(3);
    for start in (floor..bytes.len()).rev() {
        let lead = bytes[start];
        if lead & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match lead {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        let tail = &bytes[start..];
        return match std::str::from_utf8(tail) {
            Err(e) if tail.len() < width && e.error_len().is_none() => tail.len(),
            _ => 0,
        };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(chunks: &[OutputChunk]) -> String {
        join_chunks(chunks)
    }

    #[test]
    fn drain_moves_partial_lines_too() {
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stdout, b"one\ntw");
        assert!(buf.has_fresh());

        buf.drain();
        assert!(!buf.has_fresh());
        assert!(buf.has_unread());
        assert_eq!(buf.ready, vec![OutputChunk {
            stream: OutputStream::Stdout,
            text: "one\ntw".into()
        }]);

        buf.append(OutputStream::Stdout, b"o\n");
        buf.drain();
        assert_eq!(text_of(&buf.take(false)), "one\ntwo\n");
        assert!(!buf.has_unread());
    }

    #[test]
    fn take_keeps_streams_tagged_and_ordered() {
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stdout, b"out\n");
        buf.append(OutputStream::Stderr, b"err\n");
        buf.append(OutputStream::Stdout, b"more\n");

        let chunks = buf.take(false);
        let streams: Vec<_> = chunks.iter().map(|c| c.stream).collect();
        assert_eq!(
            streams,
            vec![OutputStream::Stdout, OutputStream::Stderr, OutputStream::Stdout]
        );
        assert_eq!(text_of(&chunks), "out\nerr\nmore\n");
    }

    #[test]
    fn partial_line_is_not_reordered_behind_other_stream() {
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stdout, b"a");
        buf.drain();
        buf.append(OutputStream::Stderr, b"b\n");
        buf.drain();
        buf.append(OutputStream::Stdout, b"c\n");

        let chunks = buf.take(false);
        assert_eq!(text_of(&chunks), "ab\nc\n");
        assert_eq!(
            chunks,
            vec![
                OutputChunk { stream: OutputStream::Stdout, text: "a".into() },
                OutputChunk { stream: OutputStream::Stderr, text: "b\n".into() },
                OutputChunk { stream: OutputStream::Stdout, text: "c\n".into() },
            ]
        );
    }

    #[test]
    fn non_terminal_take_holds_back_split_character() {
        let snowman = "☃".as_bytes();
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stdout, b"a");
        buf.append(OutputStream::Stdout, &snowman[..1]);

        assert_eq!(text_of(&buf.take(false)), "a");
        assert!(buf.has_unread());

        buf.append(OutputStream::Stdout, &snowman[1..]);
        assert_eq!(text_of(&buf.take(false)), "☃");
        assert!(!buf.has_unread());
    }

    #[test]
    fn earlier_invalid_byte_does_not_break_split_character() {
        let snowman = "☃".as_bytes();
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stdout, &[0xFF, b'x']);
        buf.append(OutputStream::Stdout, &snowman[..2]);

        assert_eq!(text_of(&buf.take(false)), "\u{FFFD}x");

        buf.append(OutputStream::Stdout, &snowman[2..]);
        assert_eq!(text_of(&buf.take(false)), "☃");
    }

    #[test]
    fn incomplete_suffix_only_counts_a_real_prefix() {
        assert_eq!(incomplete_suffix_len(b"abc"), 0);
        assert_eq!(incomplete_suffix_len(&"😀".as_bytes()[..3]), 3);
        assert_eq!(incomplete_suffix_len("😀".as_bytes()), 0);
        assert_eq!(incomplete_suffix_len(&[b'a', 0xE2, 0x28]), 0);
        assert_eq!(incomplete_suffix_len(&[0x80, 0x80]), 0);
    }

    #[test]
    fn terminal_take_flushes_everything() {
        let mut buf = OutputBuffer::new();
        buf.append(OutputStream::Stderr, b"no newline");
        buf.append(OutputStream::Stderr, &"☃".as_bytes()[..1]);
        assert_eq!(text_of(&buf.take(true)), "no newline\u{FFFD}");
        assert!(buf.take(true).is_empty());
    }
}
