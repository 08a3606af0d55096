use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::Method;
use tfs_common::transport::HttpTransport;
use tfs_common::{Endpoint, RequestDescriptor, Result, ServerListing, TfsError, LISTING_PATH};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::events::{ClientEvent, EventBus};

/// Result of one [`ServerPool::refresh`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The pool now holds this list
    Updated(Vec<Endpoint>),
    /// The listing had nothing usable; the pool is untouched
    Unchanged,
    /// Discovery failed; the pool is untouched
    Failed,
    /// Another refresh was already running
    InFlight,
}

struct PoolState {
    endpoints: Vec<Endpoint>,
    cursor: usize,
    refresh_counter: u32,
}

/// Self-refreshing pool of storage agent endpoints.
///
/// The agent list comes from the root directory server (`/tfs.list`) and is
/// always replaced as a whole. [`next`](Self::next) rotates through it
/// round-robin; [`record_dispatch`](Self::record_dispatch) counts requests
/// against the budget the root server handed out.
///
/// # Thread Safety
///
/// The endpoint list, cursor and counter sit behind one async `RwLock`, so a
/// reader never sees a half-replaced list and two `next()` calls never share
/// a cursor position. The `refreshing` flag is a separate atomic: a refresh
/// that finds it set returns immediately instead of waiting.
pub struct ServerPool {
    root: Endpoint,
    transport: HttpTransport,
    discovery_timeout: Duration,
    events: EventBus,
    state: RwLock<PoolState>,
    refreshing: AtomicBool,
    populated: watch::Sender<bool>,
}

/// Clears the refreshing flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ServerPool {
    pub fn new(
        root: Endpoint,
        transport: HttpTransport,
        discovery_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let (populated, _) = watch::channel(false);
        Self {
            root,
            transport,
            discovery_timeout,
            events,
            state: RwLock::new(PoolState {
                endpoints: Vec::new(),
                cursor: 0,
                refresh_counter: 0,
            }),
            refreshing: AtomicBool::new(false),
            populated,
        }
    }

    /// Root directory server this pool refreshes from.
    pub fn root(&self) -> &Endpoint {
        &self.root
    }

    /// Fetches the agent list from the root server and applies it.
    ///
    /// Failures are published as [`ClientEvent::RefreshFailed`] and never
    /// returned; the pool keeps its last good list.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(root = %self.root, "Refresh already in flight, skipping");
            return RefreshOutcome::InFlight;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let descriptor = RequestDescriptor::new(Method::GET, LISTING_PATH, self.discovery_timeout);
        let target = HttpTransport::target(&self.root, LISTING_PATH);
        debug!(root = %self.root, "GET {}", LISTING_PATH);

        let response = match self.transport.fetch(&self.root, &descriptor).await {
            Ok(response) => response,
            Err(e) => return self.refresh_failed(e),
        };

        debug!(root = %self.root, status = %response.status, "GET {} done", LISTING_PATH);
        if response.status.as_u16() != 200 {
            return self.refresh_failed(TfsError::request(
                response.status.as_u16(),
                target,
                response.headers,
                &response.body,
            ));
        }

        self.apply_listing(&String::from_utf8_lossy(&response.body))
            .await
    }

    fn refresh_failed(&self, error: TfsError) -> RefreshOutcome {
        warn!(root = %self.root, error = %error, "Failed to refresh server list");
        self.events.emit(ClientEvent::RefreshFailed(Arc::new(error)));
        RefreshOutcome::Failed
    }

    /// Applies a raw listing body.
    ///
    /// A body without at least one usable agent line changes nothing and
    /// publishes nothing.
    pub async fn apply_listing(&self, body: &str) -> RefreshOutcome {
        let Some(listing) = ServerListing::parse(body) else {
            debug!(root = %self.root, "Listing has no usable servers, keeping current pool");
            return RefreshOutcome::Unchanged;
        };

        {
            let mut state = self.state.write().await;
            state.endpoints = listing.endpoints.clone();
            state.cursor = 0;
            state.refresh_counter = listing.budget;
        }
        self.populated.send_replace(true);

        info!(
            servers = listing.endpoints.len(),
            budget = listing.budget,
            "Server pool updated"
        );
        self.events
            .emit(ClientEvent::ServersUpdated(listing.endpoints.clone()));
        RefreshOutcome::Updated(listing.endpoints)
    }

    /// Returns the endpoint under the cursor and advances it.
    ///
    /// # Errors
    ///
    /// [`TfsError::PoolEmpty`] if the pool was never populated.
    pub async fn next(&self) -> Result<Endpoint> {
        let mut state = self.state.write().await;
        if state.endpoints.is_empty() {
            return Err(TfsError::PoolEmpty);
        }

        let endpoint = state.endpoints[state.cursor].clone();
        state.cursor = (state.cursor + 1) % state.endpoints.len();
        Ok(endpoint)
    }

    /// Counts one dispatched request against the refresh budget.
    ///
    /// Returns `true` once the budget is exhausted. The counter stops at zero,
    /// so every further dispatch keeps asking for a refresh until one lands.
    pub async fn record_dispatch(&self) -> bool {
        let mut state = self.state.write().await;
        state.refresh_counter = state.refresh_counter.saturating_sub(1);
        state.refresh_counter == 0
    }

    /// Snapshot of the current agent list.
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.state.read().await.endpoints.clone()
    }

    /// Dispatches left before a refresh is due.
    pub async fn refresh_counter(&self) -> u32 {
        self.state.read().await.refresh_counter
    }

    /// Whether any listing was ever applied.
    pub fn is_populated(&self) -> bool {
        *self.populated.borrow()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Receiver that flips to `true` when the pool is first populated.
    pub fn watch_populated(&self) -> watch::Receiver<bool> {
        self.populated.subscribe()
    }
}
