//! Chunked transfer coding.
//!
//! ```text
//! chunk   = size [ ";" ext ] CRLF data CRLF
//! last    = "0" [ ";" ext ] CRLF
//! body    = *chunk last *trailer CRLF
//! ```

use super::parser::HeaderBlock;
use super::{Headers, HttpError};

use bytes::BytesMut;

/// A chunk size never needs more hex digits than a `u64` holds.
const MAX_SIZE_DIGITS: usize = 16;

enum State {
    Size,
    /// Saw CR after the size or its extensions.
    SizeLf,
    Extension,
    Data(u64),
    DataCr,
    DataLf,
    Trailers(HeaderBlock),
    Done,
}

/// Incremental decoder for a chunked body.
pub(crate) struct ChunkDecoder {
    state: State,
    size: u64,
    digits: usize,
    trailers: Option<Headers>,
    max_trailers: usize,
    max_line: usize,
}

impl ChunkDecoder {
    pub(crate) fn new(max_trailers: usize, max_line: usize) -> Self {
        Self {
            state: State::Size,
            size: 0,
            digits: 0,
            trailers: None,
            max_trailers,
            max_line,
        }
    }

    /// The last chunk and the trailer block have been read.
    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    pub(crate) fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// Decodes from `input`, appending at most `limit` payload bytes to
    /// `out`. Returns the number of input bytes consumed; bytes after the
    /// end of the body are left alone.
    pub(crate) fn decode(
        &mut self,
        input: &[u8],
        out: &mut BytesMut,
        limit: usize,
    ) -> Result<usize, HttpError> {
        let mut consumed = 0;
        let mut produced = 0;

        while consumed < input.len() {
            match &mut self.state {
                State::Done => break,
                State::Data(remaining) => {
                    let room = limit - produced;
                    if room == 0 {
                        break;
                    }

                    let n = (input.len() - consumed)
                        .min(room)
                        .min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                    out.extend_from_slice(&input[consumed..consumed + n]);
                    consumed += n;
                    produced += n;

                    *remaining -= n as u64;
                    if *remaining == 0 {
                        self.state = State::DataCr;
                    }
                }
                State::Trailers(block) => {
                    let (n, done) = block.scan(&input[consumed..])?;
                    consumed += n;
                    if done {
                        self.trailers = Some(block.take_headers());
                        self.state = State::Done;
                    }
                }
                _ => {
                    self.step(input[consumed])?;
                    consumed += 1;
                }
            }
        }

        Ok(consumed)
    }

    fn step(&mut self, byte: u8) -> Result<(), HttpError> {
        match self.state {
            State::Size => match byte {
                b'\r' if self.digits > 0 => self.state = State::SizeLf,
                b'\n' if self.digits > 0 => self.end_size_line(),
                b';' | b' ' | b'\t' if self.digits > 0 => self.state = State::Extension,
                _ => {
                    let digit = char::from(byte)
                        .to_digit(16)
                        .ok_or(HttpError::BadChunk("invalid chunk size"))?;
                    if self.digits == MAX_SIZE_DIGITS {
                        return Err(HttpError::BadChunk("chunk size too large"));
                    }
                    self.size = (self.size << 4) | u64::from(digit);
                    self.digits += 1;
                }
            },
            // Extensions are ignored.
            State::Extension => match byte {
                b'\r' => self.state = State::SizeLf,
                b'\n' => self.end_size_line(),
                _ => {}
            },
            State::SizeLf => {
                if byte != b'\n' {
                    return Err(HttpError::BadChunk("bare CR after chunk size"));
                }
                self.end_size_line();
            }
            State::DataCr => match byte {
                b'\r' => self.state = State::DataLf,
                b'\n' => self.state = State::Size,
                _ => return Err(HttpError::BadChunk("chunk data not followed by CRLF")),
            },
            State::DataLf => {
                if byte != b'\n' {
                    return Err(HttpError::BadChunk("chunk data not followed by CRLF"));
                }
                self.state = State::Size;
            }
            State::Data(_) | State::Trailers(_) | State::Done => {}
        }

        Ok(())
    }

    fn end_size_line(&mut self) {
        let size = std::mem::take(&mut self.size);
        self.digits = 0;

        self.state = if size == 0 {
            State::Trailers(HeaderBlock::new(self.max_trailers, self.max_line))
        } else {
            State::Data(size)
        };
    }
}

/// Frames `data` as one chunk. An empty `data` writes nothing, since a
/// zero-length chunk would end the body.
pub(crate) fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    if data.is_empty() {
        return;
    }

    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Writes the terminating zero-length chunk with an empty trailer block.
pub(crate) fn encode_last(out: &mut BytesMut) {
    out.extend_from_slice(b"0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_in_pieces(input: &[u8], piece: usize) -> (Vec<u8>, ChunkDecoder) {
        let mut decoder = ChunkDecoder::new(8, 256);
        let mut out = BytesMut::new();

        for part in input.chunks(piece) {
            let consumed = decoder.decode(part, &mut out, usize::MAX).unwrap();
            assert_eq!(consumed, part.len());
        }

        (out.to_vec(), decoder)
    }

    #[test]
    fn decodes_extensions_and_trailers() {
        let input = b"5;name=value\r\nhello\r\n1A\r\nabcdefghijklmnopqrstuvwxyz\r\n0\r\nX-Checksum: 42\r\n\r\n";

        for piece in [1, 2, 7, input.len()] {
            let (body, decoder) = decode_in_pieces(input, piece);
            assert_eq!(body, b"helloabcdefghijklmnopqrstuvwxyz");
            assert!(decoder.is_done());
            assert_eq!(decoder.trailers().unwrap().get("x-checksum"), Some("42"));
        }
    }

    #[test]
    fn leaves_bytes_after_the_body() {
        let mut decoder = ChunkDecoder::new(8, 256);
        let mut out = BytesMut::new();
        let input = b"3\r\nabc\r\n0\r\n\r\nGET / HTTP/1.1\r\n";

        let consumed = decoder.decode(input, &mut out, usize::MAX).unwrap();
        assert_eq!(&input[consumed..], b"GET / HTTP/1.1\r\n");
        assert_eq!(&out[..], b"abc");
        assert!(decoder.is_done());
    }

    #[test]
    fn respects_the_output_limit() {
        let mut decoder = ChunkDecoder::new(8, 256);
        let mut out = BytesMut::new();
        let input = b"6\r\nabcdef\r\n0\r\n\r\n";

        let consumed = decoder.decode(input, &mut out, 4).unwrap();
        assert_eq!(&out[..], b"abcd");
        assert!(!decoder.is_done());

        let rest = decoder.decode(&input[consumed..], &mut out, 4).unwrap();
        assert_eq!(consumed + rest, input.len());
        assert_eq!(&out[..], b"abcdef");
        assert!(decoder.is_done());
    }

    #[test]
    fn rejects_bad_framing() {
        for input in [
            &b"x\r\n"[..],
            &b"\r\n"[..],
            &b"3\r\nabcX"[..],
            &b"3\rX"[..],
            &b"11111111111111111\r\n"[..],
        ] {
            let mut decoder = ChunkDecoder::new(8, 256);
            let err = decoder.decode(input, &mut BytesMut::new(), usize::MAX).unwrap_err();
            assert!(matches!(err, HttpError::BadChunk(_)), "{err:?}");
            assert_eq!(err.status(), None);
        }
    }

    #[test]
    fn round_trip_is_independent_of_write_boundaries() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        for split in [1, 3, 64, 999, 1000] {
            let mut encoded = BytesMut::new();
            for piece in payload.chunks(split) {
                encode_chunk(piece, &mut encoded);
            }
            encode_chunk(&[], &mut encoded);
            encode_last(&mut encoded);

            let (decoded, decoder) = decode_in_pieces(&encoded, 5);
            assert_eq!(decoded, payload);
            assert!(decoder.is_done());
        }
    }
}
