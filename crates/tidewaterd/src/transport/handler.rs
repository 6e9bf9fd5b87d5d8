//! Connection handlers for the client and backend listeners.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::rc::Rc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{LISTENER_TARGET, Session};
use crate::query::{Grammar, PropertyTable};
use crate::registry::InstanceRegistry;

/// Future driving one accepted connection on the reactor thread.
pub type ConnectionFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Handles accepted connections.
pub trait ConnectionHandler {
    /// Builds the future serving `stream`. Implementations should avoid
    /// panicking.
    fn handle(&self, stream: TcpStream, session: Rc<Session>) -> ConnectionFuture;
}

const MAX_STATEMENT_BYTES: u64 = 64 * 1024;

/// Line-oriented client handler.
///
/// `use <database>` binds the session to an instance. Other statements are
/// classified by the grammar; `show` answers from the property table.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    registry: Rc<InstanceRegistry>,
    grammar: Rc<Grammar>,
    properties: Rc<PropertyTable>,
}

impl ClientHandler {
    /// Handler answering from the given tables.
    #[must_use]
    pub const fn new(
        registry: Rc<InstanceRegistry>,
        grammar: Rc<Grammar>,
        properties: Rc<PropertyTable>,
    ) -> Self {
        Self {
            registry,
            grammar,
            properties,
        }
    }

    /// Reply line for one statement.
    pub fn respond(&self, statement: &str, session: &Session) -> String {
        let mut words = statement.split_whitespace();
        let Some(first) = words.next() else {
            return "error empty statement".to_owned();
        };
        if first.eq_ignore_ascii_case("use") {
            return self.use_database(words.next(), session);
        }
        let Some(keyword) = self.grammar.classify(statement) else {
            return format!("error unknown statement '{first}'");
        };
        if session.database().is_none() {
            return "error no database selected".to_owned();
        }
        if keyword == "show" {
            return self.show(words.collect(), session);
        }
        format!("ok {keyword}")
    }

    fn use_database(&self, requested: Option<&str>, session: &Session) -> String {
        let Some(name) = requested else {
            return "error missing database name".to_owned();
        };
        let leased = self
            .registry
            .find(name)
            .and_then(|handle| self.registry.lease(handle));
        match leased {
            Some(lease) => {
                session.bind(lease);
                "ok use".to_owned()
            }
            None => format!("error unknown database '{name}'"),
        }
    }

    fn show(&self, mut names: Vec<&str>, session: &Session) -> String {
        if names.is_empty() {
            names = self.properties.names().collect();
        }
        let mut rendered = Vec::with_capacity(names.len());
        for raw in names {
            let name = raw.trim_end_matches(',');
            let Some(property) = self.properties.get(name) else {
                return format!("error unknown property '{name}'");
            };
            match session.with_lease(|lease| lease.with(property)).flatten() {
                Some(value) => rendered.push(format!("{name}={value}")),
                None => return "error database is no longer available".to_owned(),
            }
        }
        format!("ok show {}", rendered.join(" "))
    }
}

impl ConnectionHandler for ClientHandler {
    fn handle(&self, stream: TcpStream, session: Rc<Session>) -> ConnectionFuture {
        let handler = self.clone();
        Box::pin(async move {
            if let Err(error) = handler.serve(stream, &session).await {
                warn!(
                    target: LISTENER_TARGET,
                    peer = %session.peer(),
                    error = %error,
                    "client connection error"
                );
            }
        })
    }
}

impl ClientHandler {
    async fn serve(&self, stream: TcpStream, session: &Session) -> io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let mut line = Vec::new();
            let read = (&mut reader)
                .take(MAX_STATEMENT_BYTES + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                debug!(target: LISTENER_TARGET, peer = %session.peer(), "client disconnected");
                return Ok(());
            }
            if line.last() != Some(&b'\n') && u64::try_from(read).unwrap_or(u64::MAX) > MAX_STATEMENT_BYTES {
                write_half.write_all(b"error statement too long\n").await?;
                return Ok(());
            }
            let text = String::from_utf8_lossy(&line);
            let statement = text.trim();
            if statement.is_empty() {
                continue;
            }
            let mut reply = self.respond(statement, session);
            reply.push('\n');
            write_half.write_all(reply.as_bytes()).await?;
        }
    }
}

/// Inter-node handler: consumes frames until the peer disconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendHandler;

impl ConnectionHandler for BackendHandler {
    fn handle(&self, mut stream: TcpStream, session: Rc<Session>) -> ConnectionFuture {
        Box::pin(async move {
            let mut chunk = [0_u8; 4096];
            let mut total = 0_usize;
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(read) => total += read,
                    Err(error) => {
                        warn!(
                            target: LISTENER_TARGET,
                            peer = %session.peer(),
                            error = %error,
                            "backend connection error"
                        );
                        break;
                    }
                }
            }
            debug!(
                target: LISTENER_TARGET,
                peer = %session.peer(),
                bytes = total,
                "backend peer disconnected"
            );
        })
    }
}
