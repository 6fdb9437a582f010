//! WebSocket connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use crate::{
    Connector, Frame, Link, LinkCommand, LinkPeer, TransportError, protocol::redact_url,
};

/// Connects to the sessions endpoint over `ws://` or `wss://`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: redact_url(url).to_owned(),
                reason: e.to_string(),
            })?;

        let (link, peer) = Link::pair();
        tokio::spawn(bridge(socket, peer));
        Ok(link)
    }
}

/// Pump frames between a websocket and a link until either side ends.
pub async fn bridge<S>(socket: WebSocketStream<S>, peer: LinkPeer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();
    let LinkPeer {
        mut commands,
        frames,
    } = peer;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = sender.send(Message::Text(text.into())).await {
                        tracing::warn!("WebSocket send failed: {e}");
                        break;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = sender.close().await;
                    break;
                }
            },
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {e}");
                        break;
                    }
                };
                if frames.send(Frame::Text(text)).is_err() {
                    break;
                }
            }
        }
    }

    let _ = frames.send(Frame::Closed);
}
