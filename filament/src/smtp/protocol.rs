use super::{Command, Envelope, MailSink, Reply, SmtpConfig};
use crate::error::Error;
use crate::server::{
    Disposition, ExchangeState, Protocol, ServerConnection, Source, Transaction, write_to,
};

use bytes::BytesMut;
use std::sync::Arc;

use tracing::{debug, trace};

/// State of one SMTP connection: the client's name and the open mail
/// transaction.
#[derive(Debug, Default)]
pub struct SmtpSession {
    helo: Option<String>,
    reverse_path: Option<String>,
    recipients: Vec<String>,
}

impl SmtpSession {
    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    pub fn reverse_path(&self) -> Option<&str> {
        self.reverse_path.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Forgets the mail transaction. The `HELO` name is kept.
    fn reset(&mut self) {
        self.reverse_path = None;
        self.recipients.clear();
    }
}

/// SMTP receiver on top of the generic [`Server`](crate::server::Server).
///
/// Each exchange is one command line and its reply; a `DATA` exchange
/// also carries the message. Accepted messages go to the [`MailSink`].
pub struct SmtpProtocol<S> {
    sink: S,
    config: SmtpConfig,
}

impl<S: MailSink> SmtpProtocol<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, SmtpConfig::new())
    }

    pub fn with_config(sink: S, config: SmtpConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    async fn execute(
        &self,
        session: &mut SmtpSession,
        command: Command,
        transaction: &mut Transaction<'_>,
    ) -> Result<(Reply, Disposition), Error> {
        let reply = match command {
            Command::Helo(domain) => {
                session.reset();
                session.helo = Some(domain);
                Reply::new(250, self.config.domain.clone())
            }
            Command::Ehlo(domain) => {
                let greeting = format!("{} greets {}", self.config.domain, domain);
                session.reset();
                session.helo = Some(domain);
                Reply::multiline(
                    250,
                    vec![
                        greeting,
                        "PIPELINING".to_owned(),
                        format!("SIZE {}", self.config.max_message_size),
                    ],
                )
            }
            Command::Mail { reverse_path, size } => {
                if session.reverse_path.is_some() {
                    Reply::new(503, "Bad sequence of commands: sender already specified")
                } else if size.is_some_and(|size| size > self.config.max_message_size as u64) {
                    Reply::new(552, "Message size exceeds fixed maximum message size")
                } else {
                    session.reverse_path = Some(reverse_path);
                    Reply::ok()
                }
            }
            Command::Rcpt { forward_path } => {
                if session.reverse_path.is_none() {
                    Reply::new(503, "Bad sequence of commands: MAIL required first")
                } else if session.recipients.len() >= self.config.max_recipients {
                    Reply::new(452, "Too many recipients")
                } else {
                    session.recipients.push(forward_path);
                    Reply::ok()
                }
            }
            Command::Data => {
                if session.reverse_path.is_none() {
                    Reply::new(503, "Bad sequence of commands: MAIL required first")
                } else if session.recipients.is_empty() {
                    Reply::new(503, "Bad sequence of commands: RCPT required first")
                } else {
                    self.receive(session, transaction).await?
                }
            }
            Command::Rset => {
                session.reset();
                Reply::ok()
            }
            Command::Noop => Reply::ok(),
            Command::Quit => {
                transaction.connection().mark_not_reusable();
                session.reset();
                let reply = Reply::new(221, format!("{} closing connection", self.config.domain));
                return Ok((reply, Disposition::Close));
            }
        };

        Ok((reply, Disposition::Reuse))
    }

    /// Collects a message up to the lone `.` line and hands it to the
    /// sink. Ends the mail transaction whatever the outcome.
    async fn receive(
        &self,
        session: &mut SmtpSession,
        transaction: &mut Transaction<'_>,
    ) -> Result<Reply, Error> {
        let go_ahead = Reply::new(354, "End data with <CR><LF>.<CR><LF>");
        if !transaction.write(go_ahead.to_bytes()).await {
            return Err(Error::Closed);
        }

        let mut data = BytesMut::new();
        let mut oversized = false;

        loop {
            let line = transaction.read_line(self.config.max_line).await?;
            transaction.commit();

            if line.as_ref() == b"." {
                break;
            }

            let line = line.strip_prefix(b".").unwrap_or(&line);
            if data.len() + line.len() + 2 > self.config.max_message_size {
                oversized = true;
            } else {
                data.extend_from_slice(line);
                data.extend_from_slice(b"\r\n");
            }
        }

        let envelope = Envelope {
            helo: session.helo.clone(),
            reverse_path: session.reverse_path.take().unwrap_or_default(),
            recipients: std::mem::take(&mut session.recipients),
            data: data.freeze(),
        };
        session.reset();

        if oversized {
            debug!(id = transaction.connection().id(), "message too large");
            return Ok(Reply::new(552, "Message size exceeds fixed maximum message size"));
        }

        trace!(
            id = transaction.connection().id(),
            bytes = envelope.data.len(),
            recipients = envelope.recipients.len(),
            "message received"
        );

        Ok(match self.sink.deliver(envelope).await {
            Ok(()) => Reply::new(250, "OK: message accepted"),
            Err(reply) => reply,
        })
    }
}

impl<S: MailSink> Protocol for SmtpProtocol<S> {
    type Session = SmtpSession;

    fn session(&self, _connection: &Arc<ServerConnection>) -> SmtpSession {
        SmtpSession::default()
    }

    async fn greet(&self, _session: &mut SmtpSession, source: &mut Source) -> Disposition {
        let greeting = Reply::new(220, format!("{} ESMTP ready", self.config.domain));

        if source.write(greeting.to_bytes()).await {
            Disposition::Reuse
        } else {
            Disposition::Abort
        }
    }

    async fn exchange(
        &self,
        session: &mut SmtpSession,
        source: &mut Source,
        exchange: &Arc<ExchangeState>,
    ) -> Disposition {
        let mut transaction = source.transaction();
        let id = transaction.connection().id();

        let line = match transaction.read_line(self.config.max_line).await {
            Ok(line) => line,
            Err(Error::Protocol(_)) => {
                transaction.connection().mark_not_reusable();
                let responder = Responder::new(exchange.clone());
                if responder.send(&Reply::new(500, "Line too long")).await {
                    return Disposition::Close;
                }
                return Disposition::Abort;
            }
            Err(_) => return Disposition::Close,
        };
        transaction.commit();
        exchange.dispatch();

        let responder = Responder::new(exchange.clone());
        let line = String::from_utf8_lossy(&line).into_owned();
        trace!(id, command = %line, "smtp command");

        let (reply, disposition) = match Command::parse(&line) {
            Ok(command) => match self.execute(session, command, &mut transaction).await {
                Ok(step) => step,
                Err(Error::Protocol(_)) => (Reply::new(500, "Line too long"), Disposition::Close),
                Err(_) => return Disposition::Abort,
            },
            Err(err) => {
                debug!(id, error = %err, "rejecting command");
                (err.reply(), Disposition::Reuse)
            }
        };

        if disposition == Disposition::Close {
            transaction.connection().mark_not_reusable();
        }
        if !responder.send(&reply).await {
            return Disposition::Abort;
        }

        disposition
    }
}

/// Sends the final reply of one exchange.
///
/// A sent reply completes the exchange. Dropping the responder without
/// sending aborts it, and with it the connection.
struct Responder {
    exchange: Arc<ExchangeState>,
}

impl Responder {
    fn new(exchange: Arc<ExchangeState>) -> Self {
        Self { exchange }
    }

    async fn send(self, reply: &Reply) -> bool {
        if !self.exchange.begin_response() {
            return false;
        }
        if !write_to(self.exchange.connection(), reply.to_bytes()).await {
            self.exchange.abort();
            return false;
        }

        self.exchange.complete();
        true
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.exchange.is_complete() {
            self.exchange.abort();
        }
    }
}
