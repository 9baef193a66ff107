use bytes::Bytes;
use std::fmt;

/// A numeric reply, one or more text lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// A multi-line reply; all but the last line are sent as `code-text`.
    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// 2xx and 3xx.
    pub fn is_positive(&self) -> bool {
        self.code < 400
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);

        if self.lines.is_empty() {
            return write!(f, "{}\r\n", self.code);
        }
        for (index, line) in self.lines.iter().enumerate() {
            let separator = if index == last { ' ' } else { '-' };
            write!(f, "{}{}{}\r\n", self.code, separator, line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn encodes_single_and_multiline_replies() {
        assert_eq!(Reply::ok().to_string(), "250 OK\r\n");

        let reply = Reply::multiline(
            250,
            vec!["mx.test".into(), "PIPELINING".into(), "SIZE 1024".into()],
        );
        assert_eq!(
            reply.to_string(),
            "250-mx.test\r\n250-PIPELINING\r\n250 SIZE 1024\r\n"
        );
    }
}
