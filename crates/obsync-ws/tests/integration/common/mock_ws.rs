//! In-process WebSocket peer for the transport tests.
//!
//! Accepts any number of clients on a loopback port, records the text
//! frames they send and answers pings. Tests can broadcast frames to all
//! clients or force every client to be closed.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    Close,
}

#[derive(Default)]
struct Observed {
    frames: Mutex<Vec<String>>,
    accepted: AtomicU32,
    pings: AtomicU32,
}

pub struct MockWsServer {
    addr: SocketAddr,
    stop: CancellationToken,
    commands: broadcast::Sender<ServerCommand>,
    observed: Arc<Observed>,
}

impl MockWsServer {
    /// Bind `127.0.0.1:0` and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let observed = Arc::new(Observed::default());
        let (commands, _) = broadcast::channel(64);
        let stop = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            observed.clone(),
            commands.clone(),
            stop.clone(),
        ));

        Self {
            addr,
            stop,
            commands,
            observed,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Handshakes completed so far, including closed clients.
    pub async fn connection_count(&self) -> u32 {
        self.observed.accepted.load(Ordering::SeqCst)
    }

    pub async fn ping_count(&self) -> u32 {
        self.observed.pings.load(Ordering::SeqCst)
    }

    /// Every text frame received from any client, in arrival order.
    pub async fn received_messages(&self) -> Vec<String> {
        self.observed.frames.lock().await.clone()
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Send(text.into()));
    }

    pub fn disconnect_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    pub async fn shutdown(self) {
        self.stop.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    observed: Arc<Observed>,
    commands: broadcast::Sender<ServerCommand>,
    stop: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        if let Ok((stream, _)) = accepted {
            tokio::spawn(serve_client(
                stream,
                observed.clone(),
                commands.subscribe(),
                stop.child_token(),
            ));
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    observed: Arc<Observed>,
    mut commands: broadcast::Receiver<ServerCommand>,
    stop: CancellationToken,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    observed.accepted.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut incoming) = ws.split();

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => observed.frames.lock().await.push(text),
                Some(Ok(Message::Ping(payload))) => {
                    observed.pings.fetch_add(1, Ordering::SeqCst);
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    let _ = sink.send(Message::Text(text)).await;
                }
                Ok(ServerCommand::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
