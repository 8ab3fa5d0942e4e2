use crate::{
    detection::FrameResponse,
    frame::{FrameError, FrameOutcome, FrameProcessor},
    server::SharedState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;

#[instrument(skip(ws, state))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.processor, peer))
}

/// One session: receive a frame, answer it, repeat until the transport goes away.
/// Frame-level failures never end the loop.
async fn handle_socket(mut socket: WebSocket, processor: Arc<FrameProcessor>, peer: SocketAddr) {
    tracing::info!("Client {} connected", peer);

    while let Some(message) = socket.recv().await {
        let outcome = match message {
            Ok(Message::Text(text)) => processor.process(text.as_str()).await,
            Ok(Message::Binary(_)) => FrameOutcome::Failed(FrameError::NotText),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("Receive error from {}: {}", peer, e);
                break;
            }
        };

        let Some(reply) = into_reply(outcome, peer) else {
            continue;
        };

        if let Err(e) = socket.send(Message::Text(reply.into())).await {
            tracing::warn!("Failed to send response to {}: {}", peer, e);
            break;
        }
    }

    tracing::info!("Client {} disconnected", peer);
}

fn into_reply(outcome: FrameOutcome, peer: SocketAddr) -> Option<String> {
    let response = match outcome {
        FrameOutcome::Detected(detections) => FrameResponse::Detections { detections },
        // TODO: clients waiting for one reply per frame desync here; needs a protocol-level "dropped" message.
        FrameOutcome::Dropped => return None,
        FrameOutcome::Failed(e) => {
            tracing::error!("Error processing frame from {}: {}", peer, e);
            FrameResponse::error(e)
        }
    };

    match serde_json::to_string(&response) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize response for {}: {}", peer, e);
            serde_json::to_string(&FrameResponse::error(e)).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;

    fn peer() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    #[test]
    fn test_reply_for_each_outcome() {
        let detected = FrameOutcome::Detected(vec![Detection {
            bbox: [0.0, 0.0, 1.0, 1.0],
            conf: 0.5,
            class_name: "cat".to_string(),
        }]);
        assert_eq!(
            into_reply(detected, peer()).unwrap(),
            r#"{"detections":[{"bbox":[0.0,0.0,1.0,1.0],"conf":0.5,"class":"cat"}]}"#
        );

        assert!(into_reply(FrameOutcome::Dropped, peer()).is_none());

        let failed = FrameOutcome::Failed(FrameError::MissingSeparator);
        assert_eq!(
            into_reply(failed, peer()).unwrap(),
            r#"{"error":"Frame has no ',' separator"}"#
        );
    }
}
