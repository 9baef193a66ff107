mod common;

use common::{client, eventually, read_line, runtime};
use filament::Runtime;
use filament::net::Listener;
use filament::server::{Server, ServerConfig, server_listen_on};
use filament::smtp::{Envelope, MailSink, Reply, SmtpConfig, SmtpProtocol};

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Mailbox {
    delivered: Arc<Mutex<Vec<Envelope>>>,
}

impl MailSink for Mailbox {
    async fn deliver(&self, envelope: Envelope) -> Result<(), Reply> {
        if envelope.recipients.iter().any(|r| r == "full@example.org") {
            return Err(Reply::new(452, "Mailbox full"));
        }

        self.delivered.lock().unwrap().push(envelope);
        Ok(())
    }
}

struct Session {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Session {
    fn open(listener: &Listener) -> Self {
        let stream = client(listener.local_addr());
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let greeting = read_line(&mut reader);
        assert!(greeting.starts_with("220 mx.test"), "{greeting}");

        Self { stream, reader }
    }

    fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\r\n").unwrap();
    }

    /// Reads one possibly multi-line reply.
    fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();

        loop {
            let line = read_line(&mut self.reader);
            let code = line[..3].parse().unwrap();
            let last = line.as_bytes()[3] == b' ';
            lines.push(line[4..].to_owned());

            if last {
                return (code, lines);
            }
        }
    }

    fn command(&mut self, line: &str) -> (u16, Vec<String>) {
        self.send(line);
        self.reply()
    }
}

struct Fixture {
    listener: Listener,
    mailbox: Mailbox,
    server: Server<SmtpProtocol<Mailbox>>,
    _runtime: Runtime,
}

fn start() -> Fixture {
    let runtime = runtime();
    let mailbox = Mailbox::default();
    let protocol = SmtpProtocol::with_config(mailbox.clone(), SmtpConfig::new().domain("mx.test"));
    let server = Server::new(runtime.handle(), protocol, ServerConfig::new());
    let listener = server_listen_on(&server, "127.0.0.1:0".parse().unwrap()).unwrap();

    Fixture {
        listener,
        mailbox,
        server,
        _runtime: runtime,
    }
}

#[test]
fn test_rcpt_before_mail_is_a_bad_sequence() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    let (code, text) = session.command("RCPT TO:<a@b>");
    assert_eq!(code, 503);
    assert!(text[0].contains("MAIL"), "{text:?}");

    // The session carries on.
    assert_eq!(session.command("NOOP").0, 250);
}

#[test]
fn test_full_mail_transaction() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    let (code, lines) = session.command("EHLO client.test");
    assert_eq!(code, 250);
    assert_eq!(lines[0], "mx.test greets client.test");
    assert!(lines.contains(&"PIPELINING".to_owned()));
    assert!(lines.iter().any(|l| l.starts_with("SIZE ")));

    assert_eq!(session.command("MAIL FROM:<alice@example.org>").0, 250);
    assert_eq!(session.command("rcpt to:<bob@example.org>").0, 250);
    assert_eq!(session.command("RCPT TO:<carol@example.org>").0, 250);
    assert_eq!(session.command("DATA").0, 354);

    session.send("Subject: hi\r\n\r\n..leading dot\r\nbody\r\n.");
    assert_eq!(session.reply().0, 250);

    {
        let delivered = fixture.mailbox.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);

        let envelope = &delivered[0];
        assert_eq!(envelope.helo.as_deref(), Some("client.test"));
        assert_eq!(envelope.reverse_path, "alice@example.org");
        assert_eq!(envelope.recipients, vec!["bob@example.org", "carol@example.org"]);
        assert_eq!(&envelope.data[..], b"Subject: hi\r\n\r\n.leading dot\r\nbody\r\n");
    }

    // The transaction is over: a new one needs MAIL again.
    assert_eq!(session.command("RCPT TO:<bob@example.org>").0, 503);

    let (code, _) = session.command("QUIT");
    assert_eq!(code, 221);

    let mut rest = Vec::new();
    assert_eq!(session.reader.read_to_end(&mut rest).unwrap_or(0), 0);
}

#[test]
fn test_command_errors() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    assert_eq!(session.command("VRFY postmaster").0, 502);
    assert_eq!(session.command("MAIL FROM:alice").0, 501);
    assert_eq!(session.command("DATA").0, 503);

    assert_eq!(session.command("MAIL FROM:<>").0, 250);
    assert_eq!(session.command("MAIL FROM:<again@example.org>").0, 503);
    assert_eq!(session.command("DATA").0, 503);

    assert_eq!(session.command("RSET").0, 250);
    assert_eq!(session.command("RCPT TO:<bob@example.org>").0, 503);
}

#[test]
fn test_sink_rejection_is_relayed() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    assert_eq!(session.command("HELO client.test").0, 250);
    assert_eq!(session.command("MAIL FROM:<alice@example.org>").0, 250);
    assert_eq!(session.command("RCPT TO:<full@example.org>").0, 250);
    assert_eq!(session.command("DATA").0, 354);

    session.send("hello\r\n.");
    assert_eq!(session.reply().0, 452);
    assert!(fixture.mailbox.delivered.lock().unwrap().is_empty());
}

#[test]
fn test_pipelined_commands() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    session.send("HELO c\r\nMAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nNOOP");

    for _ in 0..4 {
        assert_eq!(session.reply().0, 250);
    }
}

#[test]
fn test_each_reply_completes_its_exchange() {
    let fixture = start();
    let mut session = Session::open(&fixture.listener);

    for _ in 0..3 {
        assert_eq!(session.command("NOOP").0, 250);
    }
    assert_eq!(session.command("BOGUS").0, 502);
    assert_eq!(session.command("NOOP").0, 250);
    assert_eq!(fixture.server.connection_count(), 1);

    assert_eq!(session.command("QUIT").0, 221);
    assert!(eventually(|| fixture.server.connection_count() == 0));
}
