//! Gateway client for harnesses
//!
//! Connects, authenticates, and turns the frame stream into
//! request/response calls: `interact` resolves when the `Reply` with the
//! matching id arrives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lfg_core::{Interaction, Reply};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Frame;

/// Replies slower than this are abandoned
const REPLY_TIMEOUT_SECS: u64 = 30;

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Reply>>>>;

enum ClientCommand {
    Send(Frame),
    Disconnect,
}

pub struct GatewayClient {
    cmd_tx: mpsc::Sender<ClientCommand>,
    pending: Pending,
    connected: watch::Receiver<bool>,
    reply_timeout: Duration,
}

impl GatewayClient {
    /// Connect and authenticate. Fails with `Error::Rejected` on a bad token.
    pub async fn connect(addr: SocketAddr, token: String) -> Result<Self> {
        info!(addr = %addr, "Connecting to gateway");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(&mut writer, &Frame::Hello { token }).await?;
        match read_frame(&mut reader).await? {
            Frame::Welcome => {}
            Frame::Rejected { reason } => return Err(Error::Rejected(reason)),
            other => {
                return Err(Error::Protocol(format!(
                    "Expected Welcome, got {:?}",
                    other
                )))
            }
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (connected_tx, connected) = watch::channel(true);

        tokio::spawn(connection_task(
            reader,
            writer,
            pending.clone(),
            cmd_rx,
            connected_tx,
        ));

        Ok(Self {
            cmd_tx,
            pending,
            connected,
            reply_timeout: Duration::from_secs(REPLY_TIMEOUT_SECS),
        })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Deliver an interaction and wait for its reply
    pub async fn interact(&self, interaction: &Interaction) -> Result<Reply> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let frame = Frame::Interaction {
            id,
            interaction: interaction.clone(),
        };
        if self.cmd_tx.send(ClientCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped: the connection ended first
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(self.reply_timeout.as_secs()))
            }
        }
    }

    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Resolves once the connection has ended
    pub async fn closed(&self) {
        let mut connected = self.connected.clone();
        // An error means the task is gone, which is closed as well
        let _ = connected.wait_for(|up| !*up).await;
    }
}

async fn connection_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    pending: Pending,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    connected_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(Frame::Reply { id, reply }) => {
                        match pending.lock().await.remove(&id) {
                            Some(waiter) => {
                                let _ = waiter.send(reply);
                            }
                            None => debug!(id = %id, "Reply for abandoned interaction"),
                        }
                    }
                    Ok(Frame::ServerShutdown) => {
                        info!("Gateway shutting down");
                        break;
                    }
                    Ok(other) => debug!(frame = ?other, "Ignoring unexpected frame"),
                    Err(Error::ConnectionClosed) => {
                        debug!("Gateway closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(frame)) => {
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
        }
    }

    // New sends fail from here on; waiting callers see their sender dropped
    drop(cmd_rx);
    pending.lock().await.clear();
    let _ = connected_tx.send(false);
    info!("Disconnected from gateway");
}
