//! Control port client.
//!
//! Talks the controller's line-based text protocol over TCP. The session is
//! shared by every master in the process, so requests are serialized behind
//! a mutex; a descriptor fetch holds the session for its whole
//! subscribe-and-wait window. Event subscriptions run on a dedicated
//! connection so they never contend with request traffic.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fmt::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::descriptor::router_status::{parse_router_status_entries, RouterStatusEntry};
use crate::descriptor::{parse_descriptor, HiddenServiceDescriptor};

/// Event kinds the client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StatusGeneral,
    HsDescContent,
}

impl EventKind {
    fn wire_name(self) -> &'static str {
        match self {
            EventKind::StatusGeneral => "STATUS_GENERAL",
            EventKind::HsDescContent => "HS_DESC_CONTENT",
        }
    }
}

/// An asynchronous event delivered by the controller.
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub kind: EventKind,
    pub payload: String,
}

/// The capability set the balancing core needs from a controller.
#[async_trait]
pub trait ControlClient: Send + Sync + 'static {
    /// Fetches the descriptor of a hidden service, waiting until the
    /// controller delivers its content or the deadline passes.
    async fn fetch_descriptor(
        &self,
        address: &str,
        hsdir_hint: Option<&str>,
        deadline: Instant,
    ) -> Result<HiddenServiceDescriptor>;

    /// Posts a signed descriptor. With no target fingerprints the
    /// controller broadcasts it to the responsible directories itself.
    async fn post_descriptor(
        &self,
        descriptor: &str,
        hsdirs: &[String],
        address: Option<&str>,
    ) -> Result<()>;

    /// Returns the current router status listing.
    async fn fetch_router_status(&self) -> Result<Vec<RouterStatusEntry>>;

    /// Subscribes to asynchronous controller events.
    async fn subscribe(&self, kinds: &[EventKind]) -> Result<mpsc::Receiver<ControlEvent>>;
}

/// A concrete control port client.
pub struct Controller {
    address: String,
    password: String,
    session: Mutex<Session>,
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Controller {
    /// Connects to the control port and authenticates.
    pub async fn connect(address: &str, password: &str) -> Result<Self> {
        let session = Session::dial(address, password).await?;

        Ok(Self {
            address: address.to_string(),
            password: password.to_string(),
            session: Mutex::new(session),
        })
    }
}

impl Session {
    async fn dial(address: &str, password: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("failed to connect to controller at {address}"))?;
        let (read_half, write_half) = stream.into_split();

        let mut session = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        // with a hashed control password the controller expects the
        // password bytes hex encoded; an empty password tries null auth
        let auth = if password.is_empty() {
            "AUTHENTICATE\r\n".to_string()
        } else {
            format!(
                "AUTHENTICATE {}\r\n",
                data_encoding::HEXLOWER.encode(password.as_bytes())
            )
        };
        session
            .send_command(&auth)
            .await
            .context("authentication error")?;

        Ok(session)
    }

    /// Reads one protocol line, normalising CRLF to LF.
    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            bail!("controller closed the connection");
        }

        if line.ends_with("\r\n") {
            line.truncate(line.len() - 2);
            line.push('\n');
        }

        Ok(line)
    }

    /// Sends a command and collects the reply up to its final status line.
    /// Data blocks (`250+key=` ... `.`) are included without the dot line.
    async fn send_command(&mut self, cmd: &str) -> Result<String> {
        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.flush().await?;

        let mut response = String::new();
        let mut in_data_block = false;

        loop {
            let line = self.read_line().await?;

            if line.starts_with("250+") {
                in_data_block = true;
                response.push_str(&line);
                continue;
            }

            if in_data_block {
                if line.trim_end() == "." {
                    in_data_block = false;
                    continue;
                }
                response.push_str(&line);
                continue;
            }

            if line.starts_with("250 ") {
                break;
            }

            if is_error_line(&line) {
                bail!("controller error: {}", line.trim_end());
            }

            response.push_str(&line);
        }

        Ok(response)
    }

    /// Waits for the next non-empty HS_DESC_CONTENT event and returns its
    /// descriptor body.
    async fn wait_for_descriptor_content(&mut self) -> Result<String> {
        loop {
            let line = self.read_line().await?;
            if !line.starts_with("650+HS_DESC_CONTENT") {
                continue;
            }

            let mut body = String::new();
            loop {
                let data = self.read_line().await?;
                let trimmed = data.trim_end_matches('\n');
                if trimmed == "." {
                    break;
                }
                body.push_str(trimmed);
                body.push('\n');
            }

            // an empty payload means the fetch failed on that directory;
            // keep waiting for a useful event
            if body.trim().is_empty() {
                debug!("discarding empty descriptor content event");
                continue;
            }

            return Ok(body);
        }
    }
}

fn is_error_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'5'
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
}

#[async_trait]
impl ControlClient for Controller {
    async fn fetch_descriptor(
        &self,
        address: &str,
        hsdir_hint: Option<&str>,
        deadline: Instant,
    ) -> Result<HiddenServiceDescriptor> {
        let address = address.trim_end_matches(".onion");

        let mut session = self.session.lock().await;
        session.send_command("SETEVENTS HS_DESC_CONTENT\r\n").await?;

        let fetch = match hsdir_hint {
            Some(server) if !server.is_empty() => format!("HSFETCH {address} SERVER={server}\r\n"),
            _ => format!("HSFETCH {address}\r\n"),
        };
        if let Err(e) = session.send_command(&fetch).await {
            let _ = session.send_command("SETEVENTS\r\n").await;
            return Err(e);
        }

        let result = timeout_at(deadline, session.wait_for_descriptor_content()).await;
        let _ = session.send_command("SETEVENTS\r\n").await;
        drop(session);

        let raw = match result {
            Ok(content) => content?,
            Err(_) => bail!("timed out waiting for descriptor content for {address}"),
        };

        parse_descriptor(&raw)
    }

    async fn post_descriptor(
        &self,
        descriptor: &str,
        hsdirs: &[String],
        address: Option<&str>,
    ) -> Result<()> {
        let mut cmd = String::from("+HSPOST");
        for fingerprint in hsdirs {
            let _ = write!(cmd, " SERVER={fingerprint}");
        }
        if let Some(addr) = address {
            if !addr.is_empty() {
                let _ = write!(cmd, " HSADDRESS={}", addr.trim_end_matches(".onion"));
            }
        }
        cmd.push_str("\r\n");

        // the protocol wants CRLF line endings and a dot terminator
        let body = descriptor.replace('\n', "\r\n");
        cmd.push_str(body.trim_end_matches("\r\n"));
        cmd.push_str("\r\n.\r\n");

        let mut session = self.session.lock().await;
        session.send_command(&cmd).await?;

        Ok(())
    }

    async fn fetch_router_status(&self) -> Result<Vec<RouterStatusEntry>> {
        let mut session = self.session.lock().await;
        let response = session.send_command("GETINFO ns/all\r\n").await?;
        drop(session);

        parse_router_status_entries(&response).context("error parsing router status entries")
    }

    async fn subscribe(&self, kinds: &[EventKind]) -> Result<mpsc::Receiver<ControlEvent>> {
        let mut session = Session::dial(&self.address, &self.password).await?;

        let mut cmd = String::from("SETEVENTS");
        for kind in kinds {
            let _ = write!(cmd, " {}", kind.wire_name());
        }
        cmd.push_str("\r\n");
        session.send_command(&cmd).await?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                let line = match session.read_line().await {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("event connection closed: {e:#}");
                        break;
                    }
                };

                let line = line.trim_end();
                let Some(rest) = line
                    .strip_prefix("650 ")
                    .or_else(|| line.strip_prefix("650+"))
                else {
                    continue;
                };

                let kind = if rest.starts_with("STATUS_GENERAL") {
                    EventKind::StatusGeneral
                } else if rest.starts_with("HS_DESC_CONTENT") {
                    EventKind::HsDescContent
                } else {
                    continue;
                };

                if tx
                    .send(ControlEvent {
                        kind,
                        payload: rest.to_string(),
                    })
                    .await
                    .is_err()
                {
                    debug!("event subscriber dropped, ending listener");
                    break;
                }
            }
        });

        Ok(rx)
    }
}
