use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use grid_protocol::{Envelope, MessageContext};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::models::*;
use crate::state::AppState;
use crate::storage;

/// Largest envelope the mailbox accepts
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/mailbox/{module}/{kind}/{id}", post(put_message).get(take_message))
        .route("/api/status", get(status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == state.auth_token => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn persist(state: &AppState) {
    if let Err(e) = storage::save_state(state).await {
        tracing::warn!("Failed to persist mailboxes: {e:#}");
    }
}

async fn put_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((module, kind, id)): Path<(String, String, String)>,
    Json(envelope): Json<Envelope>,
) -> Result<(StatusCode, Json<PutResponse>), StatusCode> {
    check_auth(&state, &headers)?;
    let context = MessageContext::new(module, kind, id);
    if envelope.context != context {
        tracing::warn!(path = %context, envelope = %envelope.context, "Envelope addressed to another mailbox");
        return Err(StatusCode::BAD_REQUEST);
    }
    let message_id = envelope.message.id().to_string();
    let pending = state.put(&context, envelope).await;
    tracing::debug!(mailbox = %context, id = %message_id, pending = pending, "Envelope stored");
    persist(&state).await;
    Ok((StatusCode::ACCEPTED, Json(PutResponse { mailbox: context.key(), pending })))
}

async fn take_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((module, kind, id)): Path<(String, String, String)>,
    Query(query): Query<TakeQuery>,
) -> Result<Response, StatusCode> {
    check_auth(&state, &headers)?;
    let context = MessageContext::new(module, kind, id);
    match state.take(&context, query.remove).await {
        Some(envelope) => {
            if query.remove {
                persist(&state).await;
            }
            Ok(Json(envelope).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, StatusCode> {
    check_auth(&state, &headers)?;
    let mailboxes = state
        .mailboxes
        .read()
        .await
        .iter()
        .map(|(key, queue)| MailboxStatus { mailbox: key.clone(), pending: queue.len() })
        .collect();
    Ok(Json(StatusResponse {
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        mailboxes,
        relay: state.relay.status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Relay;
    use grid_protocol::transport::{HttpStore, MessageStore};
    use grid_protocol::{GridParams, Population, TransportError, WorkRequest};

    async fn serve(data_dir: &std::path::Path) -> (String, Arc<AppState>) {
        let state = AppState::new("secret".into(), data_dir.to_string_lossy().to_string(), Relay::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, state)
    }

    fn envelope(session: &str) -> Envelope {
        let request = WorkRequest::template(session, "sphere", GridParams::default()).fragment(0, 0, Population::default());
        Envelope::request(request)
    }

    #[tokio::test]
    async fn test_put_then_take_is_fifo_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (url, state) = serve(dir.path()).await;
        let store = HttpStore::new(&url, "secret");
        let context = MessageContext::requests("s");

        let first = envelope("s");
        let second = envelope("s");
        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();
        assert!(state.mailbox_file().exists());

        let peeked = store.take(&context, false).await.unwrap().unwrap();
        assert_eq!(peeked.message.id(), first.message.id());
        assert_eq!(store.take(&context, true).await.unwrap().unwrap().message.id(), first.message.id());
        assert_eq!(store.take(&context, true).await.unwrap().unwrap().message.id(), second.message.id());
    }

    #[tokio::test]
    async fn test_empty_mailbox_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _state) = serve(dir.path()).await;
        let store = HttpStore::new(&url, "secret");
        assert!(store.take(&MessageContext::results("nobody"), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _state) = serve(dir.path()).await;
        let store = HttpStore::new(&url, "guess");
        let err = store.put(&envelope("s")).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(401)));
    }

    #[tokio::test]
    async fn test_misaddressed_envelope_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _state) = serve(dir.path()).await;
        let resp = reqwest::Client::new()
            .post(format!("{url}/api/mailbox/grid/request/other"))
            .bearer_auth("secret")
            .json(&envelope("s"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_session_with_slash_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _state) = serve(dir.path()).await;
        let store = HttpStore::new(&url, "secret");
        let sent = envelope("lab/run 1");
        store.put(&sent).await.unwrap();

        let back = store.take(&MessageContext::requests("lab/run 1"), true).await.unwrap().unwrap();
        assert_eq!(back.message.id(), sent.message.id());
    }

    #[tokio::test]
    async fn test_wrong_base_path_is_an_error_not_an_empty_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _state) = serve(dir.path()).await;
        let store = HttpStore::new(&format!("{url}/nope"), "secret");
        let err = store.take(&MessageContext::results("s"), true).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(404)));
    }
}
