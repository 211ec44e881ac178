//! Interaction gateway server
//!
//! The bot runs this server; harnesses that own the platform connection
//! connect, authenticate with the shared token, and forward interactions.
//! Every interaction goes through one dispatcher task, so handling is
//! serialized across all connections. Replies return to the connection the
//! interaction arrived on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use lfg_core::{Interaction, Reply, Router};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Frame;

/// Maximum number of simultaneously connected harnesses
const MAX_CONNECTIONS: usize = 8;

/// Interactions waiting for the dispatcher
const QUEUE_DEPTH: usize = 256;

/// Whatever answers interactions arriving through the gateway
#[async_trait]
pub trait InteractionHandler: Send + Sync + 'static {
    async fn handle(&self, interaction: &Interaction) -> Reply;
}

#[async_trait]
impl InteractionHandler for Router {
    async fn handle(&self, interaction: &Interaction) -> Reply {
        Router::handle(self, interaction).await
    }
}

struct Job {
    id: Uuid,
    interaction: Interaction,
    reply_to: mpsc::Sender<Frame>,
}

struct ServerState {
    token: String,
    connections: HashMap<Uuid, SocketAddr>,
}

pub struct GatewayServer {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayServer {
    /// Bind and start serving. Port 0 picks a free port.
    pub async fn start(
        bind: SocketAddr,
        token: String,
        handler: Arc<dyn InteractionHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Gateway listening");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            token,
            connections: HashMap::new(),
        }));

        let (job_tx, job_rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(dispatcher_task(handler, job_rx, shutdown_tx.subscribe()));
        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            job_tx,
            shutdown_tx.clone(),
        ));

        Ok(Self {
            addr,
            state,
            shutdown_tx,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Peer addresses of authenticated harnesses
    pub async fn harnesses(&self) -> Vec<SocketAddr> {
        self.state.read().await.connections.values().copied().collect()
    }

    /// Stop accepting, tell every harness, and drop all connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Gateway shutdown initiated");
    }
}

async fn dispatcher_task(
    handler: Arc<dyn InteractionHandler>,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            job = job_rx.recv() => job,
            _ = shutdown_rx.recv() => None,
        };
        let Some(job) = job else {
            debug!("Dispatcher shutting down");
            break;
        };

        let reply = handler.handle(&job.interaction).await;
        if job
            .reply_to
            .send(Frame::Reply { id: job.id, reply })
            .await
            .is_err()
        {
            debug!(id = %job.id, "Connection gone before reply");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            job_tx.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (conn_id, tx, rx) = match handshake(&mut reader, &state, addr).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            let reason = match e {
                Error::Rejected(reason) => reason,
                other => other.to_string(),
            };
            let _ = write_frame(&mut writer, &Frame::Rejected { reason }).await;
            return;
        }
    };

    if let Err(e) = write_frame(&mut writer, &Frame::Welcome).await {
        warn!(addr = %addr, error = %e, "Could not welcome harness");
        state.write().await.connections.remove(&conn_id);
        return;
    }
    info!(addr = %addr, connection = %conn_id, "Harness connected");

    let writer_handle = tokio::spawn(writer_task(writer, rx));

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(frame) => {
                        if !handle_frame(frame, &tx, &job_tx).await {
                            break;
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(connection = %conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(connection = %conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = tx.send(Frame::ServerShutdown).await;
                break;
            }
        }
    }

    state.write().await.connections.remove(&conn_id);
    // Let queued replies and the shutdown notice drain before the socket drops
    drop(tx);
    if let Err(e) = writer_handle.await {
        debug!(error = %e, "Writer task ended abnormally");
    }

    info!(connection = %conn_id, "Harness disconnected");
}

/// First frame must be `Hello` with the shared token
async fn handshake(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<ServerState>>,
    addr: SocketAddr,
) -> Result<(Uuid, mpsc::Sender<Frame>, mpsc::Receiver<Frame>)> {
    match read_frame(reader).await? {
        Frame::Hello { token } => {
            let mut s = state.write().await;
            if token != s.token {
                return Err(Error::Rejected("Invalid token".into()));
            }
            if s.connections.len() >= MAX_CONNECTIONS {
                return Err(Error::Rejected("Gateway full".into()));
            }

            let conn_id = Uuid::new_v4();
            let (tx, rx) = mpsc::channel(64);
            s.connections.insert(conn_id, addr);
            Ok((conn_id, tx, rx))
        }
        _ => Err(Error::Protocol("Expected Hello".into())),
    }
}

/// Returns false when the connection should end
async fn handle_frame(frame: Frame, tx: &mpsc::Sender<Frame>, job_tx: &mpsc::Sender<Job>) -> bool {
    match frame {
        Frame::Interaction { id, interaction } => {
            let job = Job {
                id,
                interaction,
                reply_to: tx.clone(),
            };
            if job_tx.send(job).await.is_err() {
                warn!(id = %id, "Dispatcher stopped; dropping interaction");
                return false;
            }
            true
        }
        Frame::Ping => {
            let _ = tx.send(Frame::Pong).await;
            true
        }
        other => {
            debug!(frame = ?other, "Ignoring unexpected frame");
            true
        }
    }
}

async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer").field("addr", &self.addr).finish()
    }
}
