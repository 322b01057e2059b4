use crate::Error;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Plain HTTP server for the coordinator.
pub struct HttpServer {
    listen_addr: SocketAddr,
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl HttpServer {
    /// Creates a new instance of `HttpServer`.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            local_addr: Arc::new(RwLock::new(None)),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Binds the listener and serves `router` on a background task.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyStarted` on a second call and `Error::Bind` if
    /// the listen address cannot be bound.
    pub async fn start(&self, router: Router) -> Result<JoinHandle<()>, Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;
        self.local_addr.write().replace(local_addr);

        let shutdown_token = self.shutdown_token.clone();
        let handle = self.task_tracker.spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown_token.cancelled_owned())
                .await;
            info!("http server exited {:?}", result);
        });

        self.task_tracker.close();

        info!(%local_addr, "http server listening");

        Ok(handle)
    }

    /// Address the server is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(&self) {
        info!("http server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("http server shutdown");
    }
}
