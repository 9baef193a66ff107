/// Settings of an [`SmtpProtocol`](super::SmtpProtocol).
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    /// Name the server announces in its greeting and `HELO` reply.
    pub domain: String,

    /// Longest accepted command or message line, without its CRLF.
    pub max_line: usize,

    pub max_recipients: usize,

    /// Largest accepted message, after dot-unstuffing.
    pub max_message_size: usize,
}

impl SmtpConfig {
    /// Defaults: `localhost`, 998-byte lines, 100 recipients, 10 MiB.
    pub fn new() -> Self {
        Self {
            domain: "localhost".to_owned(),
            max_line: 998,
            max_recipients: 100,
            max_message_size: 10 * 1024 * 1024,
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn max_line(mut self, max: usize) -> Self {
        self.max_line = max;
        self
    }

    pub fn max_recipients(mut self, max: usize) -> Self {
        self.max_recipients = max;
        self
    }

    pub fn max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self::new()
    }
}
