//! TFS Client
//!
//! Self-refreshing, load-balancing client for the TFS RESTful storage
//! service.
//!
//! - [`ServerPool`]: agent list from the root directory server, rotated
//!   round-robin and refreshed once its request budget is spent
//! - [`ReadinessGate`]: queues requests until the first list (and the
//!   application id) are known
//! - [`Dispatcher`]: binds requests to agents and classifies responses
//! - [`ImageHostRotator`]: builds servable URLs on the public read replicas
//! - [`TfsClient`]: the high-level API tying these together

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod gate;
pub mod pool;
pub mod rotator;

pub use client::{FileMeta, TfsClient, UploadInfo};
pub use config::{ClientConfig, DEFAULT_APP_LOCATION, DEFAULT_IMAGE_SERVERS, DEFAULT_ROOT_SERVER};
pub use dispatcher::{Dispatcher, Ticket};
pub use events::{ClientEvent, EventBus};
pub use gate::{Admission, ClientState, ReadinessGate};
pub use pool::{RefreshOutcome, ServerPool};
pub use rotator::ImageHostRotator;
pub use tfs_common::{ByteRange, TfsError};
