//! TFS Common Types and Transport
//!
//! Shared building blocks for the TFS RESTful storage client:
//!
//! - **Protocol Layer**: endpoints, discovery listings, the command builder
//!   and the [`TfsError`] taxonomy
//! - **Transport Layer**: an HTTP client bound to explicit endpoints
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tfs_common::{Command, CommandContext, Operation};
//!
//! let ctx = CommandContext {
//!     appkey: "tfscom",
//!     appid: None,
//!     default_timeout: Duration::from_secs(60),
//! };
//! let descriptor = Command::new(Operation::Remove { name: "T1abc.png".into(), hide: None })
//!     .build(&ctx)
//!     .unwrap();
//! assert_eq!(descriptor.path, "/v1/tfscom/T1abc.png");
//! assert!(descriptor.is_acceptable(404));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::HttpTransport;
