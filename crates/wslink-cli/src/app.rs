//! Interactive session: stdin commands in, JSON event lines out.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wslink_telemetry::{Metrics, MetricsObserver};
use wslink_ws::{
    ConnectionState, EventKind, Payload, TransportChannel, TungsteniteTransport, WebSocket,
    WsEvent,
};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain line, sent as a text message.
    Text(String),
    /// `/bin <hex>`
    Binary(Vec<u8>),
    /// `/close`
    Close,
    /// `/connect`
    Connect,
    /// `/quit`
    Quit,
}

pub fn parse_command(line: &str) -> AppResult<Command> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    match trimmed.split_once(' ') {
        Some(("/bin", hex_data)) => hex::decode(hex_data.trim())
            .map(Command::Binary)
            .map_err(|e| AppError::Command(format!("/bin expects hex bytes: {e}"))),
        _ => match trimmed {
            "/bin" => Err(AppError::Command("/bin expects hex bytes".to_string())),
            "/close" => Ok(Command::Close),
            "/connect" => Ok(Command::Connect),
            "/quit" => Ok(Command::Quit),
            text => Ok(Command::Text(text.to_string())),
        },
    }
}

pub struct Application {
    config: AppConfig,
    ws: WebSocket,
}

impl Application {
    /// Build a client over the real network transport.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let transport = TungsteniteTransport::new()?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn TransportChannel>,
    ) -> AppResult<Self> {
        config.validate()?;
        let ws = WebSocket::new(config.connection_config(), transport)?;
        ws.subscribe(MetricsObserver.callback());
        Ok(Self { config, ws })
    }

    pub fn websocket(&self) -> &WebSocket {
        &self.ws
    }

    /// Apply one command. Returns `false` when the session should end.
    pub fn execute(&self, command: Command) -> AppResult<bool> {
        match command {
            Command::Text(text) => self.send(Payload::Text(text))?,
            Command::Binary(data) => self.send(Payload::Binary(data))?,
            Command::Close => self.ws.close(),
            Command::Connect => {
                if self.ws.reconnect_exhausted() {
                    self.ws.reset_reconnect();
                }
                self.ws.connect(&self.config.connection.address)?;
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn send(&self, payload: Payload) -> AppResult<()> {
        self.ws.send_with(payload, |result| {
            Metrics::send_settled(result.is_ok());
            if let Err(e) = result {
                warn!(error = %e, "Send failed");
            }
        })?;
        Ok(())
    }

    /// Connect, then pump stdin until `/quit`, end of input or Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let (_, mut events) = self.ws.subscribe_channel();
        let mut out = std::io::stdout();

        info!(address = %self.config.connection.address, "Starting session");
        self.ws.connect(&self.config.connection.address)?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                Some(event) = events.recv() => write_event(&mut out, &event)?,
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    let keep_going = match parse_command(&line).and_then(|c| self.execute(c)) {
                        Ok(keep_going) => keep_going,
                        Err(e) => {
                            warn!(error = %e, "Command rejected");
                            true
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, closing");
                    break;
                }
            }
        }

        self.shutdown(&mut events, &mut out).await
    }

    /// Close the connection and print every event up to the final close.
    async fn shutdown(
        &self,
        events: &mut mpsc::UnboundedReceiver<WsEvent>,
        out: &mut impl Write,
    ) -> AppResult<()> {
        // Everything already queued happened before this close.
        while let Ok(event) = events.try_recv() {
            write_event(out, &event)?;
        }
        self.ws.close();
        if self.ws.ready_state() == ConnectionState::Closed {
            while let Ok(event) = events.try_recv() {
                write_event(out, &event)?;
            }
            return Ok(());
        }

        // The controller forces Closed after close_timeout_ms.
        let grace = self.config.connection_config().close_timeout() + Duration::from_secs(1);
        let closed = tokio::time::timeout(grace, async {
            while let Some(event) = events.recv().await {
                write_event(out, &event)?;
                if event.kind() == EventKind::Close {
                    break;
                }
            }
            Ok::<(), AppError>(())
        })
        .await;
        match closed {
            Ok(result) => result,
            Err(_) => {
                warn!("Connection did not close in time");
                Ok(())
            }
        }
    }
}

/// One JSON line per event.
fn write_event(out: &mut impl Write, event: &WsEvent) -> AppResult<()> {
    let line = serde_json::to_string(event)?;
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}
