//! Web server for the stage UI and warp API
//!
//! The browser is the render target: it reports container and content sizes
//! and pointer events, and applies the `matrix3d` transform it reads back.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::content::{ContentKind, ContentSource};
use crate::geometry::{Point, Size};
use crate::layout::LayoutError;
use crate::stage::{PointerEvent, PointerKind, StageError, StageEvent, StageHandle, StageReply};
use crate::warp::{ButtonMask, WarpError};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared application state
pub struct AppState {
    /// Configuration, as loaded at startup
    pub config: Arc<RwLock<Config>>,
    /// Sender side of the stage thread
    stage: StageHandle,
    /// What is being warped
    content: Arc<dyn ContentSource>,
}

impl AppState {
    pub fn new(config: Arc<RwLock<Config>>, stage: StageHandle, content: Arc<dyn ContentSource>) -> Self {
        Self {
            config,
            stage,
            content,
        }
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Static files and UI
        .route("/", get(index_handler))
        .route("/static/*path", get(static_handler))
        // Warp state
        .route("/api/warp", get(get_warp))
        .route("/api/warp/stream", get(warp_stream))
        // Render target callbacks
        .route("/api/stage/resize", post(stage_resized))
        .route("/api/content/size", post(content_resized))
        .route("/api/pointer", post(pointer_event))
        // Quad editing
        .route("/api/warp/rotate", post(rotate))
        .route("/api/warp/flip-horizontal", post(flip_horizontal))
        .route("/api/warp/flip-vertical", post(flip_vertical))
        .route("/api/warp/refit", post(refit))
        .route("/api/warp/save", post(save_layout))
        .route("/api/warp/load", post(load_layout))
        // Content and system info
        .route("/api/content/polygons", get(get_polygons))
        .route("/api/info", get(get_info))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the main index page
async fn index_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
    }
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn error_status(err: &StageError) -> StatusCode {
    match err {
        StageError::Warp(WarpError::Degenerate(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        StageError::Warp(WarpError::PointTransform(_)) => StatusCode::CONFLICT,
        StageError::Layout(LayoutError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        StageError::Layout(_) => StatusCode::BAD_REQUEST,
        StageError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Turn a stage reply into JSON (snapshot) or a status plus message
fn reply_response(reply: StageReply) -> Response {
    match reply {
        Ok(snapshot) => Json(&*snapshot).into_response(),
        Err(e) => {
            let status = error_status(&e);
            tracing::debug!("Request rejected ({}): {}", status, e);
            (status, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Get the current warp state
async fn get_warp(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.stage.snapshot();
    Json(&*snapshot).into_response()
}

/// Server-sent events carrying each new warp state
async fn warp_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use tokio_stream::StreamExt;

    let mut last_generation = None;
    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(100),
    ))
    .filter_map(move |_| {
        let snapshot = state.stage.snapshot();
        if last_generation == Some(snapshot.generation) {
            return None;
        }
        last_generation = Some(snapshot.generation);
        Some(Event::default().event("warp").json_data(&*snapshot))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct SizeRequest {
    width: f64,
    height: f64,
}

/// The stage container was laid out at a new size
async fn stage_resized(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SizeRequest>,
) -> Response {
    let size = Size::new(req.width, req.height);
    reply_response(state.stage.send(StageEvent::ContainerResized(size)).await)
}

/// The content reported its natural size (e.g. video metadata loaded)
async fn content_resized(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SizeRequest>,
) -> Response {
    let size = Size::new(req.width, req.height);
    reply_response(state.stage.send(StageEvent::ContentSizeChanged(size)).await)
}

#[derive(Debug, Deserialize)]
struct PointerRequest {
    kind: PointerKind,
    x: f64,
    y: f64,
    /// DOM `buttons` bitmask
    #[serde(default)]
    buttons: u32,
}

/// Pointer event in stage coordinates
async fn pointer_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PointerRequest>,
) -> Response {
    let event = PointerEvent {
        kind: req.kind,
        point: Point::new(req.x, req.y),
        buttons: ButtonMask::from_bits(req.buttons),
    };
    reply_response(state.stage.send(StageEvent::Pointer(event)).await)
}

#[derive(Debug, Deserialize)]
struct RotateRequest {
    shift: i32,
}

async fn rotate(State(state): State<Arc<AppState>>, Json(req): Json<RotateRequest>) -> Response {
    reply_response(state.stage.send(StageEvent::Rotate(req.shift)).await)
}

async fn flip_horizontal(State(state): State<Arc<AppState>>) -> Response {
    reply_response(state.stage.send(StageEvent::FlipHorizontal).await)
}

async fn flip_vertical(State(state): State<Arc<AppState>>) -> Response {
    reply_response(state.stage.send(StageEvent::FlipVertical).await)
}

/// Reset both quads to the default fit
async fn refit(State(state): State<Arc<AppState>>) -> Response {
    reply_response(state.stage.send(StageEvent::Refit).await)
}

/// Save the current quads to the layout file
async fn save_layout(State(state): State<Arc<AppState>>) -> Response {
    reply_response(state.stage.send(StageEvent::SaveLayout).await)
}

/// Apply the quads stored in the layout file
async fn load_layout(State(state): State<Arc<AppState>>) -> Response {
    reply_response(state.stage.send(StageEvent::LoadLayout).await)
}

/// Polygon outline of vector content
async fn get_polygons(State(state): State<Arc<AppState>>) -> Response {
    match state.content.outline() {
        Some(vector) => Json(vector).into_response(),
        None => (StatusCode::NOT_FOUND, "Content has no polygons").into_response(),
    }
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    content_kind: ContentKind,
    content: Size,
    stage: Size,
    layout_path: String,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let config = state.config.read();
    let snapshot = state.stage.snapshot();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        content_kind: state.content.kind(),
        content: snapshot.content,
        stage: snapshot.stage,
        layout_path: config.layout.path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{VectorContent, VideoContent};
    use crate::stage::{self, Stage};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(content: Arc<dyn ContentSource>) -> Router {
        let mut config = Config::default();
        config.layout.path =
            std::env::temp_dir().join(format!("warpstage-server-{}.json", std::process::id()));
        let stage = Stage::new(
            content.natural_size(),
            config.stage.size(),
            config.layout.path.clone(),
            false,
        );
        let (handle, _join) = stage::spawn(stage);
        let state = AppState::new(Arc::new(RwLock::new(config)), handle, content);
        router(Arc::new(state))
    }

    fn app() -> Router {
        app_with(Arc::new(VideoContent::new(640, 480)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_get_warp_initial_state() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/warp", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generation"], 0);
        assert_eq!(body["transform"].as_array().unwrap().len(), 16);
        assert_eq!(body["content_corners"][2], json!({ "x": 640.0, "y": 480.0 }));
    }

    #[tokio::test]
    async fn test_drag_through_api() {
        let app = app();
        let press = json!({ "kind": "press", "x": 415.0, "y": 275.0, "buttons": 1 });
        let (status, body) = send(&app, "POST", "/api/pointer", Some(press)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dragging"], 2);

        let drag = json!({ "kind": "move", "x": 380.0, "y": 250.0, "buttons": 1 });
        let (status, body) = send(&app, "POST", "/api/pointer", Some(drag)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view_corners"][2], json!({ "x": 380.0, "y": 250.0 }));

        let release = json!({ "kind": "release", "x": 380.0, "y": 250.0 });
        let (_, body) = send(&app, "POST", "/api/pointer", Some(release)).await;
        assert_eq!(body["dragging"], Value::Null);
    }

    #[tokio::test]
    async fn test_degenerate_drag_is_unprocessable() {
        let app = app();
        let press = json!({ "kind": "press", "x": 0.0, "y": 280.0, "buttons": 1 });
        send(&app, "POST", "/api/pointer", Some(press)).await;

        // Corner 3 onto the line between corners 0 and 2
        let drag = json!({ "kind": "move", "x": 210.0, "y": 140.0, "buttons": 1 });
        let (status, body) = send(&app, "POST", "/api/pointer", Some(drag)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("collinear"));
    }

    #[tokio::test]
    async fn test_resize_and_rotate() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/stage/resize",
            Some(json!({ "width": 800.0, "height": 600.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stage"], json!({ "width": 800.0, "height": 600.0 }));

        let (status, body) = send(&app, "POST", "/api/warp/rotate", Some(json!({ "shift": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content_corners"][0], json!({ "x": 0.0, "y": 480.0 }));
    }

    #[tokio::test]
    async fn test_generations_increase_across_replies() {
        let app = app();
        let (_, first) = send(&app, "POST", "/api/warp/flip-horizontal", None).await;
        let (_, second) = send(&app, "POST", "/api/warp/refit", None).await;
        let (_, current) = send(&app, "GET", "/api/warp", None).await;

        let first = first["generation"].as_u64().unwrap();
        let second = second["generation"].as_u64().unwrap();
        assert!(second > first);
        assert_eq!(current["generation"].as_u64().unwrap(), second);
    }

    #[tokio::test]
    async fn test_client_script_is_embedded() {
        let request = Request::builder().uri("/static/app.js").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .contains("javascript"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let script = String::from_utf8(bytes.to_vec()).unwrap();
        // Pointer positions are relative to the padding box, and stale snapshots are dropped
        assert!(script.contains("stage.clientLeft"));
        assert!(script.contains("warp.generation <= lastGeneration"));
    }

    #[tokio::test]
    async fn test_load_missing_layout_fails() {
        let app = app();
        let (status, _) = send(&app, "POST", "/api/warp/load", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_polygons_only_for_vector_content() {
        let (status, _) = send(&app(), "GET", "/api/content/polygons", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let vector = VectorContent::new(vec![vec![
            Point::new(0.0, 0.0),
            Point::new(40.0, 0.0),
            Point::new(40.0, 30.0),
        ]])
        .unwrap();
        let app = app_with(Arc::new(vector));
        let (status, body) = send(&app, "GET", "/api/content/polygons", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["polygons"][0].as_array().unwrap().len(), 4);

        let (_, info) = send(&app, "GET", "/api/info", None).await;
        assert_eq!(info["content_kind"], "vector");
        assert_eq!(info["content"], json!({ "width": 40.0, "height": 30.0 }));
    }
}
