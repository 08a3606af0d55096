//! Root directory server listing.
//!
//! `GET /tfs.list` answers with the refresh budget on the first line and one
//! storage agent address per following line:
//!
//! ```text
//! 50
//! 10.232.4.41:3900
//! 10.232.4.42:3900
//! ```

use super::endpoint::Endpoint;

/// Path of the discovery resource on the root directory server.
pub const LISTING_PATH: &str = "/tfs.list";

/// Budget used when the first line is not a positive integer.
pub const DEFAULT_REFRESH_BUDGET: u32 = 10;

/// A parsed discovery response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListing {
    /// Requests allowed before the agent list must be fetched again
    pub budget: u32,
    /// Agent endpoints in listing order
    pub endpoints: Vec<Endpoint>,
}

impl ServerListing {
    /// Parses a listing body.
    ///
    /// Returns `None` when the body has fewer than two lines or when no line
    /// after the first is a valid agent address. Callers treat `None` as
    /// "nothing to apply".
    pub fn parse(body: &str) -> Option<Self> {
        let lines: Vec<&str> = body.trim().lines().map(str::trim).collect();
        if lines.len() < 2 {
            return None;
        }

        let budget = lines[0]
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .unwrap_or(DEFAULT_REFRESH_BUDGET);

        let endpoints: Vec<Endpoint> = lines[1..]
            .iter()
            .filter_map(|line| Endpoint::parse_agent(line))
            .collect();

        if endpoints.is_empty() {
            return None;
        }

        Some(Self { budget, endpoints })
    }
}
