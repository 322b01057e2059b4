//! Client for the lock coordinator's HTTP API.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};
pub use latch_wire::{LockStatusResponse, LockView};

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use latch_locks::{AcquireOutcome, LockId, ReleaseOutcome};
use latch_wire::{AcquireRequest, AcquireResponse, ErrorResponse, ReleaseRequest, ReleaseResponse};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

/// Client for a running coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorClient {
    base_url: Url,
    client: Client,
}

impl CoordinatorClient {
    /// Creates a new `CoordinatorClient` talking to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Url` if `base_url` is not an absolute, hierarchical URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;

        if base_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }

        // Relative joins only keep the last segment when the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            client: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Attempts to acquire `resource` for `ttl` (coordinator default when `None`).
    ///
    /// `ttl` is sent in whole milliseconds, rounded up.
    ///
    /// # Errors
    ///
    /// Returns `Error::BadRequest` if the coordinator rejects the input, or a
    /// transport error.
    pub async fn acquire(&self, resource: &str, ttl: Option<Duration>) -> Result<AcquireOutcome> {
        let request = AcquireRequest::new(resource, ttl);

        let response = self
            .client
            .post(self.endpoint("lock/acquire")?)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let AcquireResponse { lock_id } = response.json().await?;
                Ok(AcquireOutcome::Acquired(LockId::new(lock_id)))
            }
            StatusCode::CONFLICT => Ok(AcquireOutcome::Conflict),
            _ => Err(unexpected(response).await),
        }
    }

    /// Releases `resource`, whoever holds it.
    ///
    /// # Errors
    ///
    /// Returns `Error::BadRequest` if the coordinator rejects the input, or a
    /// transport error.
    pub async fn release(&self, resource: &str) -> Result<ReleaseOutcome> {
        let request = ReleaseRequest {
            resource: Some(resource.to_string()),
        };

        let response = self
            .client
            .post(self.endpoint("lock/release")?)
            .json(&request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => {
                let ReleaseResponse { released } = response.json().await?;
                Ok(if released {
                    ReleaseOutcome::Released
                } else {
                    ReleaseOutcome::NotFound
                })
            }
            _ => Err(unexpected(response).await),
        }
    }

    /// Lists every lock stored by the coordinator, lapsed ones included.
    ///
    /// # Errors
    ///
    /// Returns a transport error or `Error::UnexpectedStatus`.
    pub async fn locks(&self) -> Result<HashMap<String, LockView>> {
        let response = self.client.get(self.endpoint("locks")?).send().await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected(response).await);
        }

        Ok(response.json().await?)
    }

    /// Fetches the liveness status of a single lock.
    ///
    /// # Errors
    ///
    /// Returns a transport error or `Error::UnexpectedStatus`.
    pub async fn status(&self, resource: &str) -> Result<LockStatusResponse> {
        let mut url = self.endpoint("locks/")?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(resource);
        }

        let response = self.client.get(url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected(response).await);
        }

        Ok(response.json().await?)
    }

    /// Runs `f` while holding `resource`, then releases it.
    ///
    /// Release is best effort: failures are logged and the output of `f` is
    /// still returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Locked` if the resource is already held, or any error
    /// from the acquisition request.
    pub async fn with_lock<F, Fut, R>(
        &self,
        resource: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(LockId) -> Fut + Send,
        Fut: Future<Output = R> + Send,
    {
        let lock_id = match self.acquire(resource, ttl).await? {
            AcquireOutcome::Acquired(lock_id) => lock_id,
            AcquireOutcome::Conflict => return Err(Error::Locked(resource.to_string())),
        };

        debug!(resource, %lock_id, "Lock acquired, running guarded work");
        let output = f(lock_id).await;

        match self.release(resource).await {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::NotFound) => {
                warn!(resource, %lock_id, "Lock lapsed before release");
            }
            Err(e) => {
                warn!(resource, %lock_id, error = %e, "Failed to release lock");
            }
        }

        Ok(output)
    }
}

async fn unexpected(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::BAD_REQUEST {
        let message = serde_json::from_str::<ErrorResponse>(&body).map_or(body, |e| e.error);
        return Error::BadRequest(message);
    }

    Error::UnexpectedStatus {
        status: status.as_u16(),
        body,
    }
}
