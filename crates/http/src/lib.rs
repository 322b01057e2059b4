//! HTTP transport for the lock coordinator.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod handlers;
mod server;

pub use error::Error;
pub use server::HttpServer;

use axum::Router;
use axum::routing::{get, post};
use latch_locks::LockTable;
use tower_http::trace::TraceLayer;

use handlers::{acquire_handler, list_locks_handler, lock_status_handler, release_handler};

/// Builds the coordinator router on top of `table`.
///
/// | Route | Operation |
/// |---|---|
/// | `POST /lock/acquire` | acquire |
/// | `POST /lock/release` | release |
/// | `GET /locks` | snapshot |
/// | `GET /locks/{resource}` | check |
#[must_use]
pub fn router<T>(table: T) -> Router
where
    T: LockTable,
{
    Router::new()
        .route("/lock/acquire", post(acquire_handler::<T>))
        .route("/lock/release", post(release_handler::<T>))
        .route("/locks", get(list_locks_handler::<T>))
        .route("/locks/{resource}", get(lock_status_handler::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(table)
}
