//! Local HTTP + WebSocket server so browser overlays can subscribe to state.
//!
//! Three surfaces on one port:
//! - WebSocket upgrade on any path: persistent push subscription via the hub.
//! - `GET /api/current`: point-in-time state for clients that cannot hold a
//!   socket open or need a resync after an outage.
//! - `GET /assets/<file>`: avatar images out of the configured assets
//!   directory.
//!
//! Bind failure is the only fatal path. Per-client failures disconnect that
//! client and nothing else.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::hub::BroadcastHub;
use crate::protocol::CurrentState;
use crate::state::StateStore;

/// Errors raised while bringing the server up or serving requests.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
    #[error("server terminated: {0}")]
    Serve(#[from] hyper::Error),
}

/// Everything a request handler needs, shared across connections.
struct ServerContext {
    store: Arc<StateStore>,
    hub: Arc<BroadcastHub>,
    assets_dir: PathBuf,
}

/// Handle to a running server. Dropping it without calling
/// [`ServerHandle::shutdown`] leaves the server running until the task is
/// aborted.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// The address actually bound, which differs from the requested one when
    /// port 0 was asked for.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the serve loop to finish.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!("server task did not shut down cleanly: {join_err}");
                Ok(())
            }
        }
    }
}

/// Bind and start serving in a background task.
pub fn start(
    addr: SocketAddr,
    store: Arc<StateStore>,
    hub: Arc<BroadcastHub>,
    assets_dir: PathBuf,
) -> Result<ServerHandle, ServerError> {
    let context = Arc::new(ServerContext {
        store,
        hub,
        assets_dir,
    });

    let make_svc = make_service_fn(move |_conn| {
        let context = context.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let context = context.clone();
                async move { Ok::<_, Infallible>(handle_request(req, context).await) }
            }))
        }
    });

    let builder = Server::try_bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;
    let server = builder.serve(make_svc);
    let bound = server.local_addr();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });

    let task = tokio::spawn(async move { graceful.await.map_err(ServerError::Serve) });

    info!("overlay server listening on http://{bound}");
    Ok(ServerHandle {
        addr: bound,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

async fn handle_request(mut req: Request<Body>, context: Arc<ServerContext>) -> Response<Body> {
    if hyper_tungstenite::is_upgrade_request(&req) {
        return match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                let hub = context.hub.clone();
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => serve_overlay_socket(ws, hub).await,
                        Err(err) => debug!("websocket handshake failed: {err}"),
                    }
                });
                response
            }
            Err(err) => {
                warn!("rejecting malformed upgrade request: {err}");
                simple_response(StatusCode::BAD_REQUEST, "invalid websocket upgrade")
            }
        };
    }

    let path = req.uri().path().to_string();
    match (req.method(), path.as_str()) {
        (&Method::GET, "/api/current") => current_state_response(&context.store),
        (&Method::GET, p) if p.starts_with("/assets/") => {
            serve_asset(&context.assets_dir, &p["/assets/".len()..]).await
        }
        _ => simple_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// One overlay subscriber for the lifetime of its socket.
async fn serve_overlay_socket(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    hub: Arc<BroadcastHub>,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = hub.connect(tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if ws_sender
                .send(hyper_tungstenite::tungstenite::Message::Text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Overlays only listen; inbound frames are drained so pings and closes
    // are observed.
    loop {
        tokio::select! {
            message = ws_receiver.next() => match message {
                Some(Ok(hyper_tungstenite::tungstenite::Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("overlay {client_id} socket error: {err}");
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    hub.disconnect(client_id);
    send_task.abort();
}

fn current_state_response(store: &StateStore) -> Response<Body> {
    let (state, transition) = store.snapshot();
    let current = CurrentState::new(state, transition);
    match serde_json::to_string(&current) {
        Ok(json) => json_response(StatusCode::OK, json),
        Err(err) => {
            warn!("could not encode current state: {err}");
            simple_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failure")
        }
    }
}

async fn serve_asset(assets_dir: &Path, name: &str) -> Response<Body> {
    let Some(file_name) = sanitize_asset_name(name) else {
        return simple_response(StatusCode::NOT_FOUND, "not found");
    };
    let path = assets_dir.join(file_name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            if let Ok(value) = content_type_for(&path).parse() {
                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(err) => {
            debug!("asset {} unavailable: {err}", path.display());
            simple_response(StatusCode::NOT_FOUND, "not found")
        }
    }
}

/// Accept only a plain file name. Anything with a path separator or a parent
/// component stays inside the assets directory by never being served.
fn sanitize_asset_name(name: &str) -> Option<&str> {
    if name.is_empty() {
        return None;
    }
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn simple_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if let Ok(value) = "application/json".parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}
