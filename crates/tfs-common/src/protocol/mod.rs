//! TFS RESTful protocol
//!
//! - [`endpoint`] - `host:port` addressing and agent line validation
//! - [`listing`] - root directory server responses (`/tfs.list`)
//! - [`command`] - logical operations and their request descriptors
//! - [`error`] - the error taxonomy shared by all crates

pub mod command;
pub mod endpoint;
pub mod error;
pub mod listing;

pub use command::{ByteRange, Command, CommandContext, Operation, RequestDescriptor, SUCCESS_STATUSES};
pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use error::{Result, TfsError, ERROR_BODY_LIMIT};
pub use listing::{ServerListing, DEFAULT_REFRESH_BUDGET, LISTING_PATH};
