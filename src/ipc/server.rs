//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! session events to subscribed clients. Commands are forwarded to the
//! session controller; status reads the latest published snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{Event, StateEvent};
use crate::session::SessionSnapshot;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler needs
struct Shared {
    start_time: Instant,
    /// Inbound channel of the session controller
    commands: mpsc::UnboundedSender<Event>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notify: broadcast::Sender<StateEvent>,
}

type Writer = Arc<Mutex<OwnedWriteHalf>>;

impl Server {
    pub fn new(
        socket_path: &Path,
        commands: mpsc::UnboundedSender<Event>,
        snapshots: watch::Receiver<SessionSnapshot>,
        notify: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared: Arc::new(Shared {
                start_time: Instant::now(),
                commands,
                snapshots,
                notify,
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: Writer = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = Self::serve_requests(&mut reader, &writer, &shared, &mut forwarder).await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        result
    }

    async fn serve_requests(
        reader: &mut OwnedReadHalf,
        writer: &Writer,
        shared: &Shared,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        loop {
            let Some(body) = read_frame(reader).await? else {
                debug!("client disconnected");
                return Ok(());
            };

            let mut subscription = None;
            let response = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => {
                    debug!(?request, "received request");
                    if request == Request::Subscribe && forwarder.is_none() {
                        // Buffer from now on; forwarding starts after the reply
                        subscription = Some(shared.notify.subscribe());
                    }
                    Self::process_request(request, shared)
                }
                Err(e) => {
                    warn!(?e, "failed to parse request");
                    Response::error("bad_request", e.to_string())
                }
            };

            write_frame(&mut *writer.lock().await, &response).await?;

            if let Some(events) = subscription {
                *forwarder = Some(tokio::spawn(forward_events(events, Arc::clone(writer))));
                debug!("client subscribed to notifications");
            }
        }
    }

    /// Process a request and return a response
    fn process_request(request: Request, shared: &Shared) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let session = shared.snapshots.borrow().clone();
                Response::Status(DaemonStatus::new(shared.start_time.elapsed().as_secs(), session))
            }

            Request::Subscribe => Response::Subscribed,

            command => match command.into_command() {
                Some(command) => {
                    info!(?command, "command via IPC");
                    match shared.commands.send(Event::Command(command)) {
                        Ok(()) => Response::Accepted,
                        Err(_) => Response::error("unavailable", "session controller stopped"),
                    }
                }
                None => Response::error("bad_request", "unsupported request"),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Push session events to one subscribed client until it goes away
async fn forward_events(mut events: broadcast::Receiver<StateEvent>, writer: Writer) {
    loop {
        let note = match events.recv().await {
            Ok(event) => Notification::Event { event },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagged");
                Notification::Lagged { skipped }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Err(e) = write_frame(&mut *writer.lock().await, &note).await {
            debug!(?e, "subscriber write failed");
            break;
        }
    }
}

/// Read one length-prefixed frame. `None` on clean EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("message too large: {len} bytes");
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

/// Read and decode one frame
pub async fn read_message<R: AsyncRead + Unpin, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    match read_frame(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body).context("failed to decode message")?)),
        None => Ok(None),
    }
}
