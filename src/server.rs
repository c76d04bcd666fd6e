//! Per-scenario static file server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::services::ServeDir;

use crate::error::{HarnessError, Result};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Serves one directory over HTTP on a loopback port until shut down.
pub struct StaticServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StaticServer {
    /// Bind `127.0.0.1:port` (0 lets the OS pick a free port) and serve `root`.
    /// Returns once the port accepts connections.
    pub async fn start(root: &Path, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| HarnessError::Server(format!("failed to bind 127.0.0.1:{port}: {e}")))?;
        let addr = listener.local_addr()?;

        let app = Router::new().fallback_service(ServeDir::new(root));
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(err) = served {
                log::warn!("static server on {addr} stopped with error: {err}");
            }
        });

        let server = Self {
            addr,
            shutdown: Some(shutdown),
            task,
        };
        server.wait_ready().await?;
        log::debug!("serving {} on http://{addr}/", root.display());
        Ok(server)
    }

    /// `http://127.0.0.1:<port>/<path>`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    async fn wait_ready(&self) -> Result<()> {
        let deadline = Instant::now() + READY_TIMEOUT;
        loop {
            match TcpStream::connect(self.addr).await {
                Ok(_) => return Ok(()),
                Err(err) if Instant::now() >= deadline => {
                    return Err(HarnessError::Server(format!(
                        "server on {} not ready after {}ms: {err}",
                        self.addr,
                        READY_TIMEOUT.as_millis()
                    )));
                }
                Err(_) => tokio::time::sleep(READY_POLL_INTERVAL).await,
            }
        }
    }

    /// Stop accepting connections and wait (bounded) for in-flight requests.
    pub async fn shutdown(mut self) -> std::result::Result<(), String> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("static server task failed: {err}")),
            Err(_) => {
                self.task.abort();
                Err(format!(
                    "static server on {} did not stop within {}ms; aborted",
                    self.addr,
                    SHUTDOWN_TIMEOUT.as_millis()
                ))
            }
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
