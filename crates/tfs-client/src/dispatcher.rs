use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Bytes;
use tfs_common::transport::{read_body, with_timeout, FetchedResponse, HttpTransport};
use tfs_common::{Endpoint, RequestDescriptor, Result, TfsError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::pool::ServerPool;

/// A request bound to the agent that will serve it.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub endpoint: Endpoint,
    pub descriptor: RequestDescriptor,
}

impl Ticket {
    /// `host:port/path`, as reported in errors.
    pub fn target(&self) -> String {
        HttpTransport::target(&self.endpoint, &self.descriptor.path)
    }
}

/// Sends request descriptors to storage agents.
///
/// Selection and execution are split: [`assign`](Self::assign) takes an
/// endpoint from the pool and charges the refresh budget, the `execute*`
/// methods perform the call. This lets the readiness gate hand out agents in
/// queue order while each caller runs its own request.
///
/// There is no retry. A failed request is returned to its caller and only
/// later requests benefit from rotation.
pub struct Dispatcher {
    pool: Arc<ServerPool>,
    transport: HttpTransport,
}

impl Dispatcher {
    pub fn new(pool: Arc<ServerPool>, transport: HttpTransport) -> Self {
        Self { pool, transport }
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Binds `descriptor` to the next agent.
    ///
    /// When this dispatch exhausts the refresh budget a pool refresh is
    /// spawned in the background; the current request does not wait for it.
    ///
    /// # Errors
    ///
    /// [`TfsError::PoolEmpty`] when the pool has never been populated.
    pub async fn assign(&self, descriptor: RequestDescriptor) -> Result<Ticket> {
        let endpoint = self.pool.next().await?;

        if self.pool.record_dispatch().await {
            debug!("Refresh budget exhausted, scheduling server list refresh");
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.refresh().await;
            });
        }

        Ok(Ticket {
            endpoint,
            descriptor,
        })
    }

    /// Assigns and executes in one step, buffering the response body.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<Bytes> {
        let ticket = self.assign(descriptor).await?;
        self.execute(&ticket).await
    }

    /// Executes a ticket, buffering the response body.
    pub async fn execute(&self, ticket: &Ticket) -> Result<Bytes> {
        let target = ticket.target();
        debug!(
            method = %ticket.descriptor.method,
            target = %target,
            timeout_ms = ticket.descriptor.timeout.as_millis() as u64,
            "Dispatching request"
        );

        let response = self
            .transport
            .fetch(&ticket.endpoint, &ticket.descriptor)
            .await?;
        classify(&ticket.descriptor, target, response)
    }

    /// Executes a ticket, streaming an accepted response body into `sink`.
    ///
    /// Returns the number of bytes written. The descriptor timeout covers
    /// the whole transfer.
    pub async fn execute_into<W>(&self, ticket: &Ticket, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let target = ticket.target();
        debug!(
            method = %ticket.descriptor.method,
            target = %target,
            timeout_ms = ticket.descriptor.timeout.as_millis() as u64,
            "Dispatching streamed request"
        );

        let transfer = async {
            let response = self.transport.send(&ticket.endpoint, &ticket.descriptor).await?;
            let status = response.status().as_u16();

            if !ticket.descriptor.is_acceptable(status) {
                let headers = response.headers().clone();
                let body = read_body(&target, response.into_body()).await?;
                debug!(status, target = %target, "Request rejected");
                return Err(TfsError::request(status, target.clone(), headers, &body));
            }

            let mut body = response.into_body();
            let mut written = 0u64;
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| TfsError::Transport {
                    url: target.clone(),
                    message: format!("Failed to read response: {}", e),
                })?;
                if let Ok(data) = frame.into_data() {
                    sink.write_all(&data).await?;
                    written += data.len() as u64;
                }
            }
            sink.flush().await?;

            debug!(status, target = %target, bytes = written, "Request done");
            Ok::<_, TfsError>(written)
        };

        with_timeout(&target, ticket.descriptor.timeout, transfer).await
    }
}

/// Maps a buffered response onto success or [`TfsError::Request`].
fn classify(descriptor: &RequestDescriptor, target: String, response: FetchedResponse) -> Result<Bytes> {
    let status = response.status.as_u16();
    if descriptor.is_acceptable(status) {
        debug!(status, target = %target, "Request done");
        return Ok(response.body);
    }

    debug!(status, target = %target, "Request rejected");
    Err(TfsError::request(status, target, response.headers, &response.body))
}
