/// Limits and identity of an [`HttpProtocol`](super::HttpProtocol).
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Value of the `Server` response header.
    pub server_name: String,

    /// Header fields accepted per request.
    pub max_headers: usize,

    /// Longest accepted request or header line, without its CRLF.
    pub max_header_line: usize,

    /// Trailer fields accepted after a chunked body.
    pub max_trailers: usize,

    /// Unread request body discarded to keep a connection reusable.
    /// Larger leftovers close the connection instead.
    pub max_drain: u64,
}

impl HttpConfig {
    pub fn new() -> Self {
        Self {
            server_name: "filament".to_owned(),
            max_headers: 100,
            max_header_line: 8192,
            max_trailers: 32,
            max_drain: 1024 * 1024,
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn max_headers(mut self, max: usize) -> Self {
        self.max_headers = max;
        self
    }

    pub fn max_header_line(mut self, max: usize) -> Self {
        self.max_header_line = max;
        self
    }

    pub fn max_trailers(mut self, max: usize) -> Self {
        self.max_trailers = max;
        self
    }

    pub fn max_drain(mut self, max: u64) -> Self {
        self.max_drain = max;
        self
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}
