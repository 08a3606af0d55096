use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::DEFAULT_IMAGE_SERVERS;

/// Round-robin over the public read replicas.
///
/// Independent of the storage agent pool: it only decides which replica
/// host goes into a servable URL.
#[derive(Debug)]
pub struct ImageHostRotator {
    hosts: Vec<String>,
    cursor: AtomicUsize,
}

impl ImageHostRotator {
    /// Creates a rotator; an empty `hosts` falls back to the default replicas.
    pub fn new(hosts: Vec<String>) -> Self {
        let hosts = if hosts.is_empty() {
            DEFAULT_IMAGE_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            hosts
        };

        Self {
            hosts,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_host(&self) -> &str {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[index]
    }

    /// `http://{host}/{path}` on the next replica.
    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}/{}", self.next_host(), path.trim_start_matches('/'))
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}
