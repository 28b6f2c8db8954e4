use crate::cli::Args;
use crate::error::{ ErrorKind, MessagingError };
use crate::models::{ Cursor, Target };
use crate::server::auth::SessionSigner;
use crate::server::service::MessagingService;
use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ FromRequestParts, Path, Query, State },
    response::{ IntoResponse, Response },
    http::{ header::AUTHORIZATION, request::Parts, StatusCode },
};
use serde::Deserialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error, warn };

#[derive(Clone)]
pub struct AppState {
    pub service: MessagingService,
    pub signer: SessionSigner,
}

pub struct ApiError(pub MessagingError);

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (MessagingError::Unauthenticated(_), _) => StatusCode::UNAUTHORIZED,
            (_, ErrorKind::Authorization) => StatusCode::FORBIDDEN,
            (MessagingError::UnknownUser(_) | MessagingError::UnknownGroup(_), _) =>
                StatusCode::NOT_FOUND,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Transient | ErrorKind::Channel) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

/// Authenticated caller, taken from `Authorization: Bearer <session token>`.
pub struct Viewer(pub String);

impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| MessagingError::Unauthenticated("missing bearer token".into()))?;
        Ok(Viewer(state.signer.verify(token.trim())?))
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Direct,
    Group,
}

impl TargetKind {
    fn target(self, id: String) -> Target {
        match self {
            TargetKind::Direct => Target::Direct(id),
            TargetKind::Group => Target::Group(id),
        }
    }
}

#[derive(Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/conversations", get(list_conversations))
        .route("/api/groups/{group_id}", get(get_group))
        .route("/api/messages/{kind}/{id}", get(page_messages).post(send_message))
        .route("/api/messages/{kind}/{id}/read", post(mark_read))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    state: AppState,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(state);

    match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            tokio::spawn(async move {
                let result = axum_server
                    ::bind_rustls(addr, tls_config)
                    .serve(app.into_make_service()).await;
                if let Err(e) = result {
                    error!("HTTPS server error: {}", e);
                }
            });
            info!("HTTPS server started with TLS enabled");
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            });
            info!("HTTP server started");
        }
    }

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_conversations(
    State(state): State<AppState>,
    Viewer(viewer): Viewer
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_conversations(&viewer).await?))
}

async fn get_group(
    State(state): State<AppState>,
    Viewer(_viewer): Viewer,
    Path(group_id): Path<String>
) -> Result<impl IntoResponse, ApiError> {
    let group = state.service
        .group(&group_id).await?
        .ok_or_else(|| MessagingError::UnknownGroup(group_id.clone()))?;
    Ok(Json(group))
}

async fn page_messages(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path((kind, id)): Path<(TargetKind, String)>,
    Query(query): Query<PageQuery>
) -> Result<impl IntoResponse, ApiError> {
    let cursor = query.cursor.map(Cursor::from);
    let page = state.service.page(&viewer, &kind.target(id), cursor.as_ref(), query.limit).await?;
    Ok(Json(page))
}

async fn send_message(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path((kind, id)): Path<(TargetKind, String)>,
    Json(body): Json<SendRequest>
) -> Result<impl IntoResponse, ApiError> {
    let message = state.service.send(&viewer, &kind.target(id), &body.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path((kind, id)): Path<(TargetKind, String)>
) -> Result<impl IntoResponse, ApiError> {
    state.service.mark_read(&viewer, &kind.target(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
