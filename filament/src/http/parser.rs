//! Streaming request-head parser.
//!
//! The parsers are pure: they are fed whatever bytes are buffered, report
//! how many they consumed and keep their position between calls, so a
//! line may arrive split at any byte.

use super::{Headers, HttpError, Method, Version};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineState {
    Text,
    /// Saw CR, the next byte must be LF.
    AwaitingLf,
}

/// Accumulates one CRLF-terminated line. A bare LF is accepted as a
/// terminator; a bare CR is not.
pub(crate) struct LineScanner {
    line: Vec<u8>,
    state: LineState,
    max: usize,
}

impl LineScanner {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            line: Vec::new(),
            state: LineState::Text,
            max,
        }
    }

    /// Returns the bytes consumed and the completed line, without its
    /// terminator, once one is found.
    pub(crate) fn scan(&mut self, input: &[u8]) -> Result<(usize, Option<Vec<u8>>), HttpError> {
        for (index, &byte) in input.iter().enumerate() {
            match self.state {
                LineState::Text => match byte {
                    b'\r' => self.state = LineState::AwaitingLf,
                    b'\n' => return Ok((index + 1, Some(self.take()))),
                    _ => {
                        if self.line.len() == self.max {
                            return Err(HttpError::LineTooLong(self.max));
                        }
                        self.line.push(byte);
                    }
                },
                LineState::AwaitingLf => {
                    if byte != b'\n' {
                        return Err(HttpError::Malformed("bare CR in line"));
                    }
                    return Ok((index + 1, Some(self.take())));
                }
            }
        }

        Ok((input.len(), None))
    }

    /// No byte of the current line has been seen.
    pub(crate) fn is_empty(&self) -> bool {
        self.line.is_empty() && self.state == LineState::Text
    }

    fn take(&mut self) -> Vec<u8> {
        self.state = LineState::Text;
        std::mem::take(&mut self.line)
    }
}

/// Header fields up to the blank line ending the block. Also parses
/// chunked-body trailers.
pub(crate) struct HeaderBlock {
    scanner: LineScanner,
    headers: Headers,
    max_fields: usize,
}

impl HeaderBlock {
    pub(crate) fn new(max_fields: usize, max_line: usize) -> Self {
        Self {
            scanner: LineScanner::new(max_line),
            headers: Headers::new(),
            max_fields,
        }
    }

    /// Returns the bytes consumed and whether the block has ended.
    pub(crate) fn scan(&mut self, input: &[u8]) -> Result<(usize, bool), HttpError> {
        let mut consumed = 0;

        while consumed < input.len() {
            let (n, line) = self.scanner.scan(&input[consumed..])?;
            consumed += n;

            let Some(line) = line else {
                break;
            };
            if line.is_empty() {
                return Ok((consumed, true));
            }
            self.field(&line)?;
        }

        Ok((consumed, false))
    }

    pub(crate) fn take_headers(&mut self) -> Headers {
        std::mem::take(&mut self.headers)
    }

    fn field(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| HttpError::Malformed("header is not valid UTF-8"))?;

        if line.starts_with([' ', '\t']) {
            if !self.headers.extend_last(line.trim()) {
                return Err(HttpError::Malformed("continuation line before any header"));
            }
            return Ok(());
        }

        let (name, value) = line
            .split_once(':')
            .ok_or(HttpError::Malformed("header line without a colon"))?;

        if name.is_empty() || !name.bytes().all(is_token) {
            return Err(HttpError::Malformed("invalid header name"));
        }
        if self.headers.len() == self.max_fields {
            return Err(HttpError::TooManyHeaders(self.max_fields));
        }

        self.headers.append(name, value.trim());
        Ok(())
    }
}

/// Request line and headers of one request.
#[derive(Clone, Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
}

/// Parses `request-line CRLF *(header CRLF) CRLF`.
pub(crate) struct RequestParser {
    scanner: LineScanner,
    line: Option<(Method, String, Version)>,
    block: HeaderBlock,
}

impl RequestParser {
    pub(crate) fn new(max_headers: usize, max_line: usize) -> Self {
        Self {
            scanner: LineScanner::new(max_line),
            line: None,
            block: HeaderBlock::new(max_headers, max_line),
        }
    }

    /// Nothing but blank lines has been seen so far.
    pub(crate) fn is_idle(&self) -> bool {
        self.line.is_none() && self.scanner.is_empty()
    }

    /// Returns the bytes consumed and, once the blank line after the
    /// headers has been read, the parsed head.
    pub(crate) fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<RequestHead>), HttpError> {
        let mut consumed = 0;

        while self.line.is_none() {
            let (n, line) = self.scanner.scan(&input[consumed..])?;
            consumed += n;

            match line {
                None => return Ok((consumed, None)),
                // Blank lines before the request line are skipped.
                Some(line) if line.is_empty() => continue,
                Some(line) => self.line = Some(parse_request_line(&line)?),
            }
        }

        let (n, done) = self.block.scan(&input[consumed..])?;
        consumed += n;
        if !done {
            return Ok((consumed, None));
        }

        match self.line.take() {
            Some((method, target, version)) => Ok((
                consumed,
                Some(RequestHead {
                    method,
                    target,
                    version,
                    headers: self.block.take_headers(),
                }),
            )),
            None => Err(HttpError::Malformed("missing request line")),
        }
    }
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), HttpError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| HttpError::Malformed("request line is not valid UTF-8"))?;

    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed("request line must have three parts"));
    };

    if method.is_empty() || !method.bytes().all(is_token) {
        return Err(HttpError::Malformed("invalid method"));
    }
    if target.is_empty() {
        return Err(HttpError::Malformed("empty request target"));
    }

    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        other if other.starts_with("HTTP/") => return Err(HttpError::Version(other.to_owned())),
        _ => return Err(HttpError::Malformed("invalid protocol version")),
    };

    Ok((Method::parse(method), target.to_owned(), version))
}

fn is_token(byte: u8) -> bool {
    byte.is_ascii_graphic() && !b"\"(),/:;<=>?@[\\]{}".contains(&byte)
}

/// How the request body is delimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Framing {
    Empty,
    Length(u64),
    Chunked,
}

/// `Transfer-Encoding: chunked` wins over `Content-Length`; neither
/// means no body.
pub(crate) fn framing(headers: &Headers) -> Result<Framing, HttpError> {
    if headers.contains("transfer-encoding") {
        let codings: Vec<&str> = headers
            .get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .collect();

        if let Some(coding) = codings.iter().find(|c| !c.eq_ignore_ascii_case("chunked")) {
            return Err(HttpError::UnsupportedCoding((*coding).to_owned()));
        }
        if codings.len() != 1 {
            return Err(HttpError::Malformed("chunked must be applied exactly once"));
        }
        return Ok(Framing::Chunked);
    }

    let mut length = None;
    for value in headers.get_all("content-length") {
        for item in value.split(',').map(str::trim) {
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HttpError::Malformed("invalid content length"));
            }
            let parsed: u64 = item
                .parse()
                .map_err(|_| HttpError::Malformed("invalid content length"))?;

            match length {
                Some(previous) if previous != parsed => {
                    return Err(HttpError::Malformed("conflicting content lengths"));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(match length {
        None | Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Status;

    fn parse(input: &[u8]) -> Result<RequestHead, HttpError> {
        let mut parser = RequestParser::new(100, 8192);
        let (consumed, head) = parser.feed(input)?;
        assert_eq!(consumed, input.len());
        Ok(head.expect("complete head"))
    }

    #[test]
    fn parses_a_request_split_at_every_byte() {
        let input = b"\r\n\r\nGET /index.html?q=1 HTTP/1.1\r\nHost: example\r\nAccept: */*\r\n\r\n";
        let mut parser = RequestParser::new(100, 8192);
        let mut head = None;

        for (index, byte) in input.iter().enumerate() {
            let (consumed, done) = parser.feed(std::slice::from_ref(byte)).unwrap();
            assert_eq!(consumed, 1);
            if done.is_some() {
                assert_eq!(index, input.len() - 1);
                head = done;
            }
        }

        let head = head.unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.target, "/index.html?q=1");
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.headers.get("host"), Some("example"));
        assert_eq!(head.headers.len(), 2);
    }

    #[test]
    fn stops_at_the_end_of_the_head() {
        let mut parser = RequestParser::new(100, 8192);
        let input = b"POST / HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello";
        let (consumed, head) = parser.feed(input).unwrap();

        assert_eq!(&input[consumed..], b"hello");
        assert_eq!(head.unwrap().version, Version::Http10);
    }

    #[test]
    fn blank_lines_keep_the_parser_idle() {
        let mut parser = RequestParser::new(100, 8192);
        parser.feed(b"\r\n\n").unwrap();
        assert!(parser.is_idle());

        parser.feed(b"GE").unwrap();
        assert!(!parser.is_idle());
    }

    #[test]
    fn continuation_lines_extend_the_previous_value() {
        let head = parse(b"GET / HTTP/1.1\r\nX-Long: one\r\n  two\r\n\tthree\r\n\r\n").unwrap();
        assert_eq!(head.headers.get("x-long"), Some("one two three"));
    }

    #[test]
    fn rejects_malformed_request_lines() {
        for input in [
            &b"GET /\r\n\r\n"[..],
            &b"GET  / HTTP/1.1\r\n\r\n"[..],
            &b"GET / HTTP/1.1 extra\r\n\r\n"[..],
            &b"GET / FTP/1.0\r\n\r\n"[..],
        ] {
            let err = parse(input).unwrap_err();
            assert!(matches!(err, HttpError::Malformed(_)), "{err:?}");
        }

        let err = parse(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::Version(_)));
    }

    #[test]
    fn rejects_bad_header_lines() {
        let err = parse(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::Malformed(_)));

        let err = parse(b"GET / HTTP/1.1\r\n folded\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::Malformed(_)));

        let err = parse(b"GET / HTTP/1.1\rHost: x\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::Malformed(_)));
    }

    #[test]
    fn enforces_header_limits() {
        let mut parser = RequestParser::new(2, 8192);
        let err = parser
            .feed(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, HttpError::TooManyHeaders(2)));

        let mut parser = RequestParser::new(100, 16);
        let err = parser
            .feed(b"GET / HTTP/1.1\r\nX-Header: far too long\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, HttpError::LineTooLong(16)));
        assert_eq!(err.status(), Some(Status::BAD_REQUEST));
    }

    #[test]
    fn chooses_body_framing() {
        let head = parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n")
            .unwrap();
        assert_eq!(framing(&head.headers).unwrap(), Framing::Chunked);

        let head = parse(b"POST / HTTP/1.1\r\nContent-Length: 42\r\n\r\n").unwrap();
        assert_eq!(framing(&head.headers).unwrap(), Framing::Length(42));

        let head = parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(framing(&head.headers).unwrap(), Framing::Empty);

        let head = parse(b"POST / HTTP/1.1\r\nContent-Length: 4x\r\n\r\n").unwrap();
        assert!(matches!(framing(&head.headers), Err(HttpError::Malformed(_))));

        let head = parse(b"POST / HTTP/1.1\r\nContent-Length: 4\r\nContent-Length: 5\r\n\r\n").unwrap();
        assert!(matches!(framing(&head.headers), Err(HttpError::Malformed(_))));

        let head = parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n").unwrap();
        let err = framing(&head.headers).unwrap_err();
        assert_eq!(err.status(), Some(Status::NOT_IMPLEMENTED));
    }
}
