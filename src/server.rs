use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{
        header::{CACHE_CONTROL, ORIGIN},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::{
    config::ScanConfig,
    scanner,
    sink::{self, ResultSink, SharedSink, SinkError},
    types::ScanRequest,
};

pub const DEFAULT_BIND: &str = "127.0.0.1:13334";

/// Which browser origins may open the scan WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// Origins of the UI served by this process on `port`.
    pub fn local(port: u16) -> Self {
        OriginPolicy::AllowList(vec![
            format!("http://localhost:{port}"),
            format!("http://127.0.0.1:{port}"),
        ])
    }

    /// Add more allowed origins. No effect on [`OriginPolicy::Any`].
    pub fn with_extra(self, extra: impl IntoIterator<Item = String>) -> Self {
        match self {
            OriginPolicy::Any => OriginPolicy::Any,
            OriginPolicy::AllowList(mut list) => {
                list.extend(extra);
                OriginPolicy::AllowList(list)
            }
        }
    }

    /// Requests without an `Origin` header come from non-browser clients and are allowed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => true,
            (OriginPolicy::AllowList(list), Some(o)) => {
                let o = o.trim_end_matches('/');
                list.iter().any(|allowed| allowed.trim_end_matches('/').eq_ignore_ascii_case(o))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub static_dir: PathBuf,
    pub origins: OriginPolicy,
    pub scan: ScanConfig,
}

#[derive(Clone)]
pub struct AppState {
    scan: Arc<ScanConfig>,
    origins: Arc<OriginPolicy>,
}

/// Bind `config.bind` and serve until `shutdown` fires.
pub async fn spawn_server(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    serve(listener, config, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, static_dir = %config.static_dir.display(), "serving UI");
    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

pub fn router(config: ServerConfig) -> Router {
    let state = AppState {
        scan: Arc::new(config.scan),
        origins: Arc::new(config.origins),
    };

    let static_svc = ServeDir::new(config.static_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .fallback_service(static_svc)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::if_not_present(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                )),
        )
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(app): State<AppState>,
) -> Response {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !app.origins.allows(origin) {
        tracing::warn!(?origin, "rejected websocket origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// Frame type of a request; its replies go out the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

type WsWriter = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Writes one request's scan messages on a WebSocket that may carry other scans.
/// The writer lock is per connection, so frames from concurrent scans never interleave.
pub struct WsSink {
    writer: WsWriter,
    frame: FrameKind,
}

impl ResultSink for WsSink {
    async fn deliver(&mut self, message: Vec<u8>) -> Result<(), SinkError> {
        let message = match self.frame {
            FrameKind::Text => {
                let text =
                    String::from_utf8(message).map_err(|e| SinkError::Transport(e.to_string()))?;
                Message::Text(text.into())
            }
            FrameKind::Binary => Message::Binary(message.into()),
        };
        self.writer
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

/// Read requests until the peer goes away. Every request runs as its own scan
/// and writes through this connection's writer. Scans outlive the connection
/// and simply stop delivering.
async fn handle_socket(socket: WebSocket, app: AppState) {
    let (tx, mut rx) = socket.split();
    let writer: WsWriter = Arc::new(Mutex::new(tx));

    while let Some(msg) = rx.next().await {
        let (parsed, frame) = match msg {
            Ok(Message::Text(text)) => (
                serde_json::from_str::<ScanRequest>(text.as_str()),
                FrameKind::Text,
            ),
            Ok(Message::Binary(bin)) => {
                (serde_json::from_slice::<ScanRequest>(&bin), FrameKind::Binary)
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed");
                break;
            }
        };
        match parsed {
            Ok(request) => {
                let config = app.scan.clone();
                let sink: SharedSink<WsSink> = sink::shared(WsSink {
                    writer: writer.clone(),
                    frame,
                });
                tokio::spawn(async move {
                    scanner::run_scan(request, &config, sink).await;
                });
            }
            Err(e) => tracing::warn!(error = %e, "ignoring malformed scan request"),
        }
    }
    tracing::debug!("websocket closed");
}

/// Open `url` in the platform browser. Failures are only logged.
pub fn open_browser(url: &str) {
    use std::process::Command;

    let spawned = if cfg!(target_os = "windows") {
        Command::new("rundll32")
            .args(["url.dll,FileProtocolHandler", url])
            .spawn()
    } else if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };
    if let Err(e) = spawned {
        tracing::warn!(%url, error = %e, "failed to open browser");
    }
}
