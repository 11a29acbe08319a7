use crate::error::ProxyError;
use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{COOKIE, ORIGIN, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use proxy_core::{decode_socket_target, resolve, Scheme};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use url::Url;

/// `GET /__hm/ws/:encoded?hmtarget=…&hmtype=2`
pub async fn socket_bridge(
    ws: WebSocketUpgrade,
    Path(encoded): Path<String>,
    RawQuery(query): RawQuery,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let proxy_host = crate::handlers::proxy_host(&headers, &state.config);
    let target = resolve(query.as_deref(), None, &proxy_host)?;
    if !target.mode.is_spa() {
        return Err(ProxyError::BadRequest(
            "websocket bridging requires hmtype=2".to_string(),
        ));
    }
    let upstream = decode_socket_target(&encoded)
        .map_err(|err| ProxyError::BadRequest(err.to_string()))?;

    let origin_scheme = if upstream.scheme() == "wss" {
        Scheme::Https
    } else {
        Scheme::Http
    };
    let forwarded = UpstreamHeaders {
        origin: format!("{origin_scheme}://{}", target.host),
        cookie: headers.get(COOKIE).cloned(),
        user_agent: headers.get(USER_AGENT).cloned(),
    };

    tracing::info!(target_host = %target.host, upstream = %upstream, "bridging websocket");
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = bridge_websocket(socket, upstream, forwarded).await {
            tracing::warn!(error = %err, "websocket bridge error");
        }
    }))
}

struct UpstreamHeaders {
    origin: String,
    cookie: Option<HeaderValue>,
    user_agent: Option<HeaderValue>,
}

async fn bridge_websocket(
    socket: WebSocket,
    target: Url,
    forwarded: UpstreamHeaders,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut request = target.as_str().into_client_request()?;
    if let Ok(origin) = HeaderValue::from_str(&forwarded.origin) {
        request.headers_mut().insert(ORIGIN, origin);
    }
    if let Some(cookie) = forwarded.cookie {
        request.headers_mut().insert(COOKIE, cookie);
    }
    if let Some(user_agent) = forwarded.user_agent {
        request.headers_mut().insert(USER_AGENT, user_agent);
    }

    let (upstream, _) = connect_async(request).await?;
    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(msg) = client_rx.next().await {
            let Ok(msg) = msg else {
                break;
            };
            let closing = matches!(msg, Message::Close(_));
            if upstream_tx.send(to_upstream_message(msg)).await.is_err() || closing {
                break;
            }
        }
    };

    let to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            let Ok(msg) = msg else {
                break;
            };
            let Some(translated) = to_client_message(msg) else {
                continue;
            };
            let closing = matches!(translated, Message::Close(_));
            if client_tx.send(translated).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        _ = to_upstream => tracing::debug!("client side closed"),
        _ = to_client => tracing::debug!("upstream side closed"),
    }
    Ok(())
}

fn to_upstream_message(msg: Message) -> UpstreamMessage {
    match msg {
        Message::Text(text) => UpstreamMessage::Text(text),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|close| UpstreamCloseFrame {
            code: CloseCode::from(close.code),
            reason: close.reason,
        })),
    }
}

fn to_client_message(msg: UpstreamMessage) -> Option<Message> {
    let translated = match msg {
        UpstreamMessage::Text(text) => Message::Text(text),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(data) => Message::Ping(data),
        UpstreamMessage::Pong(data) => Message::Pong(data),
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|close| CloseFrame {
            code: close.code.into(),
            reason: close.reason,
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(translated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_keep_code_and_reason() {
        let upstream = to_upstream_message(Message::Close(Some(CloseFrame {
            code: 4001,
            reason: "bye".into(),
        })));
        let UpstreamMessage::Close(Some(frame)) = upstream else {
            panic!("expected close frame");
        };
        assert_eq!(u16::from(frame.code), 4001);
        assert_eq!(frame.reason, "bye");

        let back = to_client_message(UpstreamMessage::Close(Some(frame))).unwrap();
        assert!(matches!(back, Message::Close(Some(CloseFrame { code: 4001, .. }))));
    }

    #[test]
    fn data_messages_pass_through() {
        assert_eq!(
            to_upstream_message(Message::Text("hi".into())),
            UpstreamMessage::Text("hi".into())
        );
        assert!(matches!(
            to_client_message(UpstreamMessage::Binary(vec![1, 2])),
            Some(Message::Binary(data)) if data == [1, 2]
        ));
    }
}
