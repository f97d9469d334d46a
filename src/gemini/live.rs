//! Gemini Live WebSocket transport

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{RealtimeInputMessage, ServerMessage, setup_message};
use crate::live::{LinkEvent, LiveConnector, LiveLink, OutboundFrame};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered inbound events per connection
const INBOUND_BUFFER: usize = 256;

/// Connects to the Gemini `BidiGenerateContent` endpoint
pub struct GeminiLiveConnector {
    ws_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
    system_instruction: String,
}

impl GeminiLiveConnector {
    #[must_use]
    pub fn new(
        ws_url: String,
        api_key: SecretString,
        model: String,
        voice: String,
        system_instruction: String,
    ) -> Self {
        Self {
            ws_url,
            api_key,
            model,
            voice,
            system_instruction,
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| Error::Config(format!("invalid live endpoint {}: {e}", self.ws_url)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<LinkEvent>)> {
        let url = self.endpoint()?;

        tracing::debug!(
            model = %self.model,
            host = url.host_str().unwrap_or_default(),
            "connecting to live endpoint"
        );
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let setup = serde_json::to_string(&setup_message(
            &self.model,
            &self.voice,
            &self.system_instruction,
        ))?;
        write
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        await_setup_complete(&mut read).await?;
        tracing::debug!("live setup complete");

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_loop(read, tx));

        Ok((Box::new(GeminiLiveLink { write, reader }), rx))
    }
}

/// Wait for `setupComplete`, failing on anything else
async fn await_setup_complete(read: &mut SplitStream<WsStream>) -> Result<()> {
    loop {
        let message = match read.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(Error::ConnectionFailed(e.to_string())),
            None => {
                return Err(Error::ConnectionFailed(
                    "connection closed during setup".to_string(),
                ));
            }
        };

        let payload = match message {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.to_vec(),
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(Error::ConnectionFailed(format!(
                    "server closed during setup: {reason}"
                )));
            }
            _ => continue,
        };

        let parsed: ServerMessage = serde_json::from_slice(&payload)
            .map_err(|e| Error::ConnectionFailed(format!("unexpected setup reply: {e}")))?;
        if parsed.is_setup_complete() {
            return Ok(());
        }
        return Err(Error::ConnectionFailed(
            "server did not acknowledge setup".to_string(),
        ));
    }
}

/// Translate server frames into link events until the socket ends
async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<LinkEvent>) {
    let terminal = loop {
        let payload = match read.next().await {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Close(frame))) => {
                break LinkEvent::Closed(frame.map(|f| f.reason.to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break LinkEvent::Failed(e.to_string()),
            None => break LinkEvent::Closed(None),
        };

        let message: ServerMessage = match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable server message");
                continue;
            }
        };

        if message.go_away.is_some() {
            tracing::info!("server announced go-away");
        }

        for event in message.into_events() {
            if tx.send(LinkEvent::Inbound(event)).await.is_err() {
                return;
            }
        }
    };

    let _ = tx.send(terminal).await;
}

/// Outbound half of a Gemini Live connection
struct GeminiLiveLink {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl LiveLink for GeminiLiveLink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let body = serde_json::to_string(&RealtimeInputMessage::from(frame))?;
        self.write
            .send(Message::Text(body.into()))
            .await
            .map_err(|e| Error::TransportSendFailure(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.abort();
        let result = self.write.close().await;
        result.map_err(|e| Error::ConnectionFailed(e.to_string()))
    }
}

impl Drop for GeminiLiveLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
