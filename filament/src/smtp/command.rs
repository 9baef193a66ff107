use super::Reply;

use thiserror::Error;

/// One parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// `MAIL FROM:<path> [SIZE=n]`; the null path `<>` is allowed.
    Mail {
        reverse_path: String,
        size: Option<u64>,
    },
    Rcpt {
        forward_path: String,
    },
    Data,
    Rset,
    Noop,
    Quit,
}

/// A command line that could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,

    #[error("unrecognized command `{0}`")]
    Unrecognized(String),

    #[error("syntax error in parameters: {0}")]
    Syntax(&'static str),
}

impl CommandError {
    pub fn reply(&self) -> Reply {
        match self {
            CommandError::Empty => Reply::new(500, "Syntax error, command unrecognized"),
            CommandError::Unrecognized(_) => Reply::new(502, "Command not implemented"),
            CommandError::Syntax(detail) => {
                Reply::new(501, format!("Syntax error in parameters: {detail}"))
            }
        }
    }
}

impl Command {
    /// Parses a line without its CRLF. Keywords are case-insensitive.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim_end();
        let (keyword, rest) = match line.split_once(' ') {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };

        if keyword.is_empty() {
            return Err(CommandError::Empty);
        }

        match keyword.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Command::Helo(domain(rest)?)),
            "EHLO" => Ok(Command::Ehlo(domain(rest)?)),
            "MAIL" => {
                let (reverse_path, params) = path_argument(rest, "FROM:")?;
                Ok(Command::Mail {
                    reverse_path,
                    size: size_param(params)?,
                })
            }
            "RCPT" => {
                let (forward_path, _) = path_argument(rest, "TO:")?;
                if forward_path.is_empty() {
                    return Err(CommandError::Syntax("empty forward path"));
                }
                Ok(Command::Rcpt { forward_path })
            }
            "DATA" => no_argument(rest, Command::Data),
            "RSET" => no_argument(rest, Command::Rset),
            "QUIT" => no_argument(rest, Command::Quit),
            // NOOP may carry a string, which is ignored.
            "NOOP" => Ok(Command::Noop),
            _ => Err(CommandError::Unrecognized(keyword.to_owned())),
        }
    }
}

fn domain(rest: &str) -> Result<String, CommandError> {
    match rest.split_whitespace().next() {
        Some(domain) => Ok(domain.to_owned()),
        None => Err(CommandError::Syntax("missing domain")),
    }
}

fn no_argument(rest: &str, command: Command) -> Result<Command, CommandError> {
    if !rest.is_empty() {
        return Err(CommandError::Syntax("unexpected argument"));
    }
    Ok(command)
}

/// Splits `FROM:<path> params` into the path and the parameter text.
fn path_argument<'a>(rest: &'a str, prefix: &str) -> Result<(String, &'a str), CommandError> {
    let matches = rest
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
    if !matches {
        return Err(CommandError::Syntax("expected FROM:<path> or TO:<path>"));
    }

    let rest = rest[prefix.len()..].trim_start();
    let (path, params) = rest
        .strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .ok_or(CommandError::Syntax("path must be enclosed in angle brackets"))?;

    if path.contains(['<', ' ']) {
        return Err(CommandError::Syntax("invalid path"));
    }

    Ok((path.to_owned(), params.trim()))
}

fn size_param(params: &str) -> Result<Option<u64>, CommandError> {
    for param in params.split_whitespace() {
        if let Some((key, value)) = param.split_once('=') {
            if key.eq_ignore_ascii_case("SIZE") {
                return value
                    .parse()
                    .map(Some)
                    .map_err(|_| CommandError::Syntax("invalid SIZE"));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Command::parse("helo client.test"), Ok(Command::Helo("client.test".into())));
        assert_eq!(Command::parse("EhLo client.test"), Ok(Command::Ehlo("client.test".into())));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("NOOP anything"), Ok(Command::Noop));
    }

    #[test]
    fn parses_mail_and_rcpt_paths() {
        assert_eq!(
            Command::parse("MAIL FROM:<alice@example.org> SIZE=2048"),
            Ok(Command::Mail {
                reverse_path: "alice@example.org".into(),
                size: Some(2048),
            })
        );
        assert_eq!(
            Command::parse("mail from: <>"),
            Ok(Command::Mail {
                reverse_path: String::new(),
                size: None,
            })
        );
        assert_eq!(
            Command::parse("RCPT TO:<a@b>"),
            Ok(Command::Rcpt {
                forward_path: "a@b".into(),
            })
        );
    }

    #[test]
    fn reports_syntax_errors_as_501() {
        for line in [
            "HELO",
            "MAIL alice@example.org",
            "MAIL FROM:alice@example.org",
            "MAIL FROM:<alice@example.org> SIZE=big",
            "RCPT TO:<>",
            "DATA now",
        ] {
            let err = Command::parse(line).unwrap_err();
            assert_eq!(err.reply().code(), 501, "{line}");
        }
    }

    #[test]
    fn unknown_keywords_are_502() {
        let err = Command::parse("VRFY postmaster").unwrap_err();
        assert_eq!(err, CommandError::Unrecognized("VRFY".into()));
        assert_eq!(err.reply().code(), 502);

        assert_eq!(Command::parse("").unwrap_err().reply().code(), 500);
    }
}
