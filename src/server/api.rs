use crate::cli::Args;
use crate::models::api::{ ChatApiRequest, ConversationNameResponse, ErrorBody, StatusResponse };
use crate::models::chat::SessionContext;
use crate::relay::{
    validate_messages,
    FrameStream,
    Relay,
    RelayError,
    DEFAULT_CONVERSATION_NAME,
    INVALID_MESSAGES,
};
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, State },
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::StreamExt;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn };

#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    has_api_key: bool,
    provider: String,
}

impl AppState {
    pub fn new(relay: Relay, has_api_key: bool, provider: impl Into<String>) -> Self {
        Self {
            relay: Arc::new(relay),
            has_api_key,
            provider: provider.into(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/conversation-name", post(conversation_name_handler))
        .route("/api/status", get(status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    addr: &str,
    state: AppState,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = build_router(state);

    match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;
            info!("Starting HTTPS server on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        }
        (true, _, _) => {
            return Err("TLS is enabled but --tls-cert-path or --tls-key-path is missing".into());
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
            })?;
            info!("Starting HTTP server on: http://{}", addr);
            axum::serve(listener, app.into_make_service()).await?;
        }
    }

    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn relay_error_response(err: RelayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.to_string())
}

/// Parses the shared request body. Bodies that are not JSON, or whose
/// `messages` is not a list, count as a missing list.
fn parse_request(payload: Result<Json<ChatApiRequest>, JsonRejection>) -> Result<ChatApiRequest, RelayError> {
    match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            Err(RelayError::InvalidRequest(INVALID_MESSAGES.to_string()))
        }
    }
}

fn session_for(request: &ChatApiRequest) -> SessionContext {
    let anonymous = SessionContext::anonymous();
    SessionContext::new(
        request.session_id.clone().unwrap_or(anonymous.session_id),
        request.user_id.clone().unwrap_or(anonymous.user_id)
    )
}

fn event_stream(frames: FrameStream) -> Response {
    let body = Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(frame.encode())));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    ).into_response()
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatApiRequest>, JsonRejection>
) -> Response {
    let request = match parse_request(payload) {
        Ok(request) => request,
        Err(e) => return relay_error_response(e),
    };
    let session = session_for(&request);
    let messages = match validate_messages(request.messages) {
        Ok(messages) => messages,
        Err(e) => return relay_error_response(e),
    };

    match state.relay.open(&session, messages).await {
        Ok(frames) => event_stream(frames),
        Err(e) => relay_error_response(e),
    }
}

async fn conversation_name_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatApiRequest>, JsonRejection>
) -> Response {
    let messages = match parse_request(payload).and_then(|request| validate_messages(request.messages)) {
        Ok(messages) => messages,
        Err(e) => return relay_error_response(e),
    };

    match state.relay.name_conversation(messages).await {
        Ok(name) => Json(ConversationNameResponse { name, error: None }).into_response(),
        Err(RelayError::Upstream(message)) =>
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ConversationNameResponse {
                    name: DEFAULT_CONVERSATION_NAME.to_string(),
                    error: Some(message),
                }),
            ).into_response(),
        Err(e) => relay_error_response(e),
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        has_api_key: state.has_api_key,
        using_mock: state.relay.using_mock(),
        provider: state.provider.clone(),
    })
}
