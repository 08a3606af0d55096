use std::time::Duration;

use tfs_common::{Endpoint, Result, TfsError};

/// Root directory server used when none is configured.
pub const DEFAULT_ROOT_SERVER: &str = "restful-store.vip.tbsite.net:3800";

/// Application path prefix used when none is configured.
pub const DEFAULT_APP_LOCATION: &str = "tfscom";

/// Public read replicas used when none are configured.
pub const DEFAULT_IMAGE_SERVERS: [&str; 4] = [
    "img1.tbcdn.cn",
    "img2.tbcdn.cn",
    "img3.tbcdn.cn",
    "img4.tbcdn.cn",
];

/// Client configuration.
///
/// Only `appkey` is required; everything else has a production default.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tfs_client::ClientConfig;
///
/// let config = ClientConfig::new("tfscom")
///     .with_root_server("10.232.4.44:3800")
///     .with_image_servers(vec!["img01.daily.taobaocdn.net".to_string()])
///     .with_upload_timeout(Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application key issued by the storage service
    pub appkey: String,
    /// Path prefix of anonymous objects on the public replicas
    pub app_location: String,
    /// Root directory server, `host:port`
    pub root_server: String,
    /// Public read replicas used to build servable URLs
    pub image_servers: Vec<String>,
    /// Default timeout for every storage request
    pub upload_timeout: Duration,
    /// Timeout of a single `/tfs.list` request
    pub discovery_timeout: Duration,
    /// Polling interval until the server pool is first populated
    pub bootstrap_interval: Duration,
    /// Known application id; skips the `/appid` lookup during bootstrap
    pub appid: Option<String>,
}

impl ClientConfig {
    pub fn new(appkey: impl Into<String>) -> Self {
        Self {
            appkey: appkey.into(),
            app_location: DEFAULT_APP_LOCATION.to_string(),
            root_server: DEFAULT_ROOT_SERVER.to_string(),
            image_servers: DEFAULT_IMAGE_SERVERS.iter().map(|s| s.to_string()).collect(),
            upload_timeout: Duration::from_millis(60_000),
            discovery_timeout: Duration::from_millis(10_000),
            bootstrap_interval: Duration::from_millis(1_000),
            appid: None,
        }
    }

    /// Reads the configuration from `TFS_*` environment variables.
    ///
    /// `TFS_APPKEY` is required. `TFS_APP_LOCATION`, `TFS_ROOT_SERVER`,
    /// `TFS_IMAGE_SERVERS` (comma separated), `TFS_UPLOAD_TIMEOUT_MS` and
    /// `TFS_APPID` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading each `TFS_*` key
    /// through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let appkey = lookup("TFS_APPKEY")
            .ok_or_else(|| TfsError::InvalidArgument("missing appkey (TFS_APPKEY)".to_string()))?;
        let mut config = Self::new(appkey);

        if let Some(location) = lookup("TFS_APP_LOCATION") {
            config = config.with_app_location(location);
        }
        if let Some(root) = lookup("TFS_ROOT_SERVER") {
            config = config.with_root_server(root);
        }
        if let Some(servers) = lookup("TFS_IMAGE_SERVERS") {
            config = config.with_image_servers(
                servers
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Some(timeout) = lookup("TFS_UPLOAD_TIMEOUT_MS") {
            let ms = timeout.trim().parse::<u64>().map_err(|e| {
                TfsError::InvalidArgument(format!("invalid TFS_UPLOAD_TIMEOUT_MS '{}': {}", timeout, e))
            })?;
            config = config.with_upload_timeout(Duration::from_millis(ms));
        }
        if let Some(appid) = lookup("TFS_APPID") {
            config = config.with_appid(appid);
        }

        Ok(config)
    }

    pub fn with_app_location(mut self, app_location: impl Into<String>) -> Self {
        self.app_location = app_location.into();
        self
    }

    pub fn with_root_server(mut self, root_server: impl Into<String>) -> Self {
        self.root_server = root_server.into();
        self
    }

    /// Replaces the replica list. An empty list keeps the defaults.
    pub fn with_image_servers(mut self, image_servers: Vec<String>) -> Self {
        if !image_servers.is_empty() {
            self.image_servers = image_servers;
        }
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_bootstrap_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_interval = interval;
        self
    }

    pub fn with_appid(mut self, appid: impl Into<String>) -> Self {
        self.appid = Some(appid.into());
        self
    }

    /// Checks the configuration and parses the root server address.
    pub fn validate(&self) -> Result<Endpoint> {
        if self.appkey.trim().is_empty() {
            return Err(TfsError::InvalidArgument("missing appkey".to_string()));
        }
        if self.upload_timeout.is_zero() {
            return Err(TfsError::InvalidArgument(
                "upload timeout must be greater than zero".to_string(),
            ));
        }
        if self.bootstrap_interval.is_zero() {
            return Err(TfsError::InvalidArgument(
                "bootstrap interval must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.appid, Some(appid) if appid.is_empty()) {
            return Err(TfsError::InvalidArgument("appid must not be empty".to_string()));
        }
        self.root_server.parse()
    }
}
