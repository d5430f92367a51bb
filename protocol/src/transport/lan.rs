use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{write_backup, Mediator, NetworkMode, PollOptions};
use crate::error::TransportError;
use crate::message::{Envelope, MessageContext, WorkResult};

/// Which side of the grid a relay peer is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Client,
    Worker,
}

/// One newline-delimited JSON frame on a relay connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on every connection
    Hello { role: PeerRole, session: String, name: String },
    Deliver { envelope: Envelope },
    Bye,
}

/// Write one frame followed by a newline
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame. `Ok(None)` at end of stream.
pub async fn read_frame<R>(lines: &mut Lines<R>) -> Result<Option<Frame>, TransportError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match lines.next_line().await? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
        }
    }
}

/// LAN-mode mediator: one persistent TCP connection to the relay.
///
/// A background task reads frames into a queue; `get_message` takes from
/// that queue in arrival order and ignores the context argument.
pub struct LanMediator {
    addr: String,
    role: PeerRole,
    session: String,
    name: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    backup_dir: Option<PathBuf>,
}

impl LanMediator {
    pub fn new(addr: &str, role: PeerRole, session: &str, name: &str) -> Self {
        Self {
            addr: addr.to_string(),
            role,
            session: session.to_string(),
            name: name.to_string(),
            writer: Mutex::new(None),
            inbound: Mutex::new(None),
            reader: std::sync::Mutex::new(None),
            backup_dir: None,
        }
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    fn abort_reader(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Mediator for LanMediator {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Lan
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        let hello = Frame::Hello {
            role: self.role,
            session: self.session.clone(),
            name: self.name.clone(),
        };
        write_frame(&mut write_half, &hello).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let addr = self.addr.clone();
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match read_frame(&mut lines).await {
                    Ok(Some(Frame::Deliver { envelope })) => {
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(Some(Frame::Bye)) | Ok(None) => {
                        tracing::info!(relay = %addr, "Relay closed the connection");
                        break;
                    }
                    Ok(Some(other)) => tracing::warn!(frame = ?other, "Unexpected frame from relay"),
                    Err(e) => {
                        tracing::warn!(relay = %addr, error = %e, "Relay read failed");
                        break;
                    }
                }
            }
        });

        self.abort_reader();
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
        *self.writer.lock().await = Some(write_half);
        *self.inbound.lock().await = Some(rx);

        tracing::info!(relay = %self.addr, role = ?self.role, session = %self.session, "Connected to relay");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // best effort: the relay may already be gone
            let _ = write_frame(&mut writer, &Frame::Bye).await;
            let _ = writer.shutdown().await;
        }
        self.abort_reader();
        self.inbound.lock().await.take();
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        write_frame(writer, &Frame::Deliver { envelope }).await
    }

    async fn get_message(
        &self,
        _context: &MessageContext,
        poll: &PollOptions,
    ) -> Result<Option<Envelope>, TransportError> {
        let mut guard = self.inbound.lock().await;
        let rx = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let received = match poll.max_wait {
            Some(wait) => match tokio::time::timeout(wait, rx.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(None),
            },
            None => rx.recv().await,
        };
        received.map(Some).ok_or(TransportError::Closed)
    }

    async fn stop(&self) {
        if let Err(e) = self.disconnect().await {
            tracing::debug!(error = %e, "Disconnect during stop failed");
        }
    }

    async fn backup_result(
        &self,
        result: &WorkResult,
        sub_dir: &str,
        title: &str,
    ) -> Result<(), TransportError> {
        if let Some(dir) = &self.backup_dir {
            write_backup(dir, result, sub_dir, title).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WorkRequest;
    use crate::params::GridParams;
    use crate::types::Population;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_roundtrip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let hello = read_frame(&mut lines).await.unwrap().unwrap();
            // echo every delivered envelope back
            while let Some(Frame::Deliver { envelope }) = read_frame(&mut lines).await.unwrap() {
                write_frame(&mut write_half, &Frame::Deliver { envelope }).await.unwrap();
            }
            hello
        });

        let mediator = LanMediator::new(&addr, PeerRole::Client, "lan", "c1");
        mediator.connect().await.unwrap();
        let req = WorkRequest::template("lan", "sphere", GridParams::default())
            .fragment(0, 0, Population::default());
        mediator.send(Envelope::request(req.clone())).await.unwrap();

        let poll = PollOptions::wait(Duration::from_secs(5), Duration::from_millis(10));
        let echoed = mediator.get_message(&MessageContext::results("lan"), &poll).await.unwrap();
        assert_eq!(echoed.map(|e| e.message.id().to_string()), Some(req.id));

        mediator.stop().await;
        let hello = server.await.unwrap();
        assert_eq!(
            hello,
            Frame::Hello { role: PeerRole::Client, session: "lan".into(), name: "c1".into() }
        );
    }

    #[tokio::test]
    async fn test_get_message_times_out_with_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mediator = LanMediator::new(&addr, PeerRole::Worker, "lan", "w1");
        mediator.connect().await.unwrap();
        let poll = PollOptions::wait(Duration::from_millis(100), Duration::from_millis(10));
        let got = mediator.get_message(&MessageContext::requests("lan"), &poll).await.unwrap();
        assert!(got.is_none());
        mediator.stop().await;
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mediator = LanMediator::new("127.0.0.1:1", PeerRole::Client, "s", "c");
        let req = WorkRequest::template("s", "sphere", GridParams::default());
        let err = mediator.send(Envelope::request(req)).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
