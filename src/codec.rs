//! Newline-delimited text frames.
//!
//! ```text
//! COMMAND args...\n
//! ```
//!
//! A frame longer than the limit is skipped up to its newline and surfaced
//! as [`FrameError::TooLarge`], so one bad frame does not cost the peer its
//! connection. Recoverable problems are yielded as items; only I/O errors
//! end the stream. The limit applies to inbound frames only.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

pub const DEFAULT_MAX_FRAME: usize = 8192;

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_frame: usize,
    /// Bytes already scanned for a newline, so a slow peer costs O(n).
    scanned: usize,
    /// Length of an oversized frame being skipped.
    discarding: Option<usize>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            scanned: 0,
            discarding: None,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_line(mut raw: BytesMut) -> Result<String, FrameError> {
    if raw.last() == Some(&b'\r') {
        raw.truncate(raw.len() - 1);
    }
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

impl Decoder for LineCodec {
    type Item = Result<String, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');

            if let Some(skipped) = self.discarding {
                match newline {
                    Some(offset) => {
                        let end = self.scanned + offset;
                        src.advance(end + 1);
                        self.scanned = 0;
                        self.discarding = None;
                        return Ok(Some(Err(FrameError::TooLarge {
                            len: skipped + end,
                            max: self.max_frame,
                        })));
                    }
                    None => {
                        let len = src.len();
                        src.advance(len);
                        self.scanned = 0;
                        self.discarding = Some(skipped + len);
                        return Ok(None);
                    }
                }
            }

            match newline {
                Some(offset) => {
                    let end = self.scanned + offset;
                    self.scanned = 0;
                    if end > self.max_frame {
                        src.advance(end + 1);
                        return Ok(Some(Err(FrameError::TooLarge {
                            len: end,
                            max: self.max_frame,
                        })));
                    }
                    let line = src.split_to(end);
                    src.advance(1);
                    return Ok(Some(to_line(line)));
                }
                None if src.len() > self.max_frame => {
                    // start skipping and look again in the same call
                    self.discarding = Some(0);
                    continue;
                }
                None => {
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len();
        src.clear();
        self.scanned = 0;
        Ok(Some(Err(FrameError::Truncated(len))))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.as_ref();
        if line.contains('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "outbound frame contains a newline",
            ));
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Result<String, FrameError>> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn splits_on_newline_and_strips_cr() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"CONNECT alice\r\nWHO\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![Ok("CONNECT alice".into()), Ok("WHO".into())]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"MSG ALL hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"lo there\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Ok("MSG ALL hello there".into()));
    }

    #[test]
    fn oversized_frame_is_skipped_and_stream_recovers() {
        let mut codec = LineCodec::with_max_frame(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef\nWHO\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![Err(FrameError::TooLarge { len: 16, max: 8 }), Ok("WHO".into())]
        );
    }

    #[test]
    fn oversized_frame_across_reads() {
        let mut codec = LineCodec::with_max_frame(4);
        let mut buf = BytesMut::from(&b"abcdefgh"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"ij\nID\n");
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![Err(FrameError::TooLarge { len: 10, max: 4 }), Ok("ID".into())]
        );
    }

    #[test]
    fn leftover_bytes_at_eof_are_truncated() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"LEA"[..]);
        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Err(FrameError::Truncated(3)));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n', b'I', b'D', b'\n'][..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![Err(FrameError::InvalidUtf8), Ok("ID".into())]);
    }

    #[test]
    fn encoder_terminates_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("KNOCK SUCCESS", &mut buf).unwrap();
        assert_eq!(&buf[..], b"KNOCK SUCCESS\n");
    }

    #[test]
    fn encoder_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.encode("a\nb", &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
