use crate::error::TransportError;
use crate::models::websocket::{ InboundFrame, OutboundFrame };
use crate::transport::{ ConnectionState, Transport, TransportEvent };
use futures::{ SinkExt, StreamExt };
use log::{ info, warn, error, debug };
use tokio::sync::{ mpsc, watch };
use tokio_tungstenite::{ connect_async, tungstenite::protocol::Message };
use url::Url;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

enum Outgoing {
    Frame(OutboundFrame),
    Close,
}

pub struct WsTransport {
    endpoint: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    state: watch::Receiver<ConnectionState>,
}

impl WsTransport {
    /// Validates `endpoint` and starts connecting in the background. Every
    /// inbound frame and state transition is forwarded to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<E>(endpoint: &str, events: mpsc::UnboundedSender<E>) -> Result<Self, TransportError>
        where E: From<TransportEvent> + Send + 'static
    {
        let url = Url::parse(endpoint)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let endpoint = url.to_string();

        tokio::spawn(run_connection(endpoint.clone(), outgoing_rx, state_tx, events));

        Ok(Self {
            endpoint,
            outgoing: outgoing_tx,
            state: state_rx,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Waits until the connection leaves `Connecting`.
    pub async fn wait_ready(&self) -> ConnectionState {
        let mut state = self.state.clone();
        let ready = match state.wait_for(|s| *s != ConnectionState::Connecting).await {
            Ok(current) => *current,
            Err(_) => ConnectionState::Closed,
        };
        ready
    }
}

impl Transport for WsTransport {
    fn send(&self, frame: OutboundFrame) {
        let state = self.state();
        if state != ConnectionState::Open {
            warn!("Dropping outbound frame {:?}: transport is {}", frame, state);
            return;
        }
        if self.outgoing.send(Outgoing::Frame(frame)).is_err() {
            warn!("Dropping outbound frame: {}", TransportError::Closed);
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

fn publish<E>(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<E>,
    next: ConnectionState
)
    where E: From<TransportEvent>
{
    state.send_replace(next);
    if events.send(TransportEvent::StateChanged(next).into()).is_err() {
        debug!("State change to {} had no listener", next);
    }
}

async fn run_connection<E>(
    endpoint: String,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<E>
)
    where E: From<TransportEvent> + Send + 'static
{
    publish(&state, &events, ConnectionState::Connecting);

    let ws = match connect_async(endpoint.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!("{}", TransportError::Connect(e));
            publish(&state, &events, ConnectionState::Errored);
            return;
        }
    };
    info!("WebSocket connected: {}", endpoint);
    publish(&state, &events, ConnectionState::Open);

    let (mut tx, mut rx) = ws.split();

    let final_state = loop {
        tokio::select! {
            next_out = outgoing.recv() => {
                match next_out {
                    Some(Outgoing::Frame(frame)) => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode outbound frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = tx.send(Message::Text(json)).await {
                            error!("Error sending frame to {}: {}", endpoint, e);
                            break ConnectionState::Errored;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        info!("Closing WebSocket connection to {}", endpoint);
                        let _ = tx.send(Message::Close(None)).await;
                        break ConnectionState::Closed;
                    }
                }
            }
            next_in = rx.next() => {
                match next_in {
                    Some(Ok(message)) => {
                        if message.len() > MAX_MESSAGE_SIZE {
                            warn!(
                                "Message from {} exceeds size limit ({} > {}), skipping",
                                endpoint,
                                message.len(),
                                MAX_MESSAGE_SIZE
                            );
                            continue;
                        }

                        match message {
                            Message::Text(text) => {
                                match serde_json::from_str::<InboundFrame>(&text) {
                                    Ok(frame) => {
                                        if events.send(TransportEvent::Frame(frame).into()).is_err() {
                                            info!("Session listener gone, closing {}", endpoint);
                                            let _ = tx.send(Message::Close(None)).await;
                                            break ConnectionState::Closed;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse frame from {}: {}", endpoint, e);
                                    }
                                }
                            }
                            Message::Close(_) => {
                                info!("Received close frame from {}", endpoint);
                                break ConnectionState::Closed;
                            }
                            Message::Ping(ping_data) => {
                                if tx.send(Message::Pong(ping_data)).await.is_err() {
                                    error!("Failed to send pong to {}", endpoint);
                                    break ConnectionState::Errored;
                                }
                            }
                            Message::Pong(_) => {}
                            Message::Binary(_) => {
                                warn!("Ignoring binary message from {}", endpoint);
                            }
                            Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        match e {
                            | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::AlreadyClosed => {
                                info!("WebSocket connection closed for {}", endpoint);
                                break ConnectionState::Closed;
                            }
                            tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                                io_err.kind() == std::io::ErrorKind::ConnectionReset
                            => {
                                warn!("WebSocket connection reset by {}", endpoint);
                                break ConnectionState::Errored;
                            }
                            _ => {
                                error!("Error receiving message from {}: {}", endpoint, e);
                                break ConnectionState::Errored;
                            }
                        }
                    }
                    None => break ConnectionState::Closed,
                }
            }
        }
    };

    publish(&state, &events, final_state);
}
