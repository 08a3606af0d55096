//! TFS Transport Layer
//!
//! Plain HTTP/1 over a pooled hyper client. Discovery requests and storage
//! agent requests both go through [`HttpTransport`].

pub mod http;

pub use http::{read_body, with_timeout, FetchedResponse, HttpTransport, HyperResponse};
