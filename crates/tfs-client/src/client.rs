use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::time::Duration;

use hyper::body::Bytes;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tfs_common::transport::HttpTransport;
use tfs_common::{
    ByteRange, Command, CommandContext, Endpoint, Operation, Result, TfsError,
};
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Ticket};
use crate::events::{ClientEvent, EventBus};
use crate::gate::{Admission, ClientState, ReadinessGate};
use crate::pool::{RefreshOutcome, ServerPool};
use crate::rotator::ImageHostRotator;

/// A stored object and where it can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadInfo {
    /// Logical name: server-generated for anonymous uploads,
    /// `L1/{appid}/{uid}/{filename}` for named files
    pub name: String,
    pub size: u64,
    /// Servable URL on one of the public read replicas
    pub url: String,
}

/// Metadata record returned by [`TfsClient::get_meta`].
///
/// Agents differ in how they encode these fields, so decoding is lenient:
/// numeric fields accept a JSON number or a numeric string, the time
/// fields keep whatever the agent sent (a formatted date or epoch seconds)
/// as text, and missing or null fields fall back to zero or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct FileMeta {
    #[serde(deserialize_with = "lenient_string")]
    pub file_name: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub block_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub file_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub offset: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub occupy_size: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub modify_time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub create_time: String,
    /// Zero for a normal file; flag bits such as deleted or hidden otherwise
    #[serde(deserialize_with = "lenient_i64")]
    pub status: i64,
    #[serde(deserialize_with = "lenient_u64")]
    pub crc: u64,
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("expected an unsigned integer, got {}", n))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an unsigned integer, got {:?}", s))),
        Some(other) => Err(de::Error::custom(format!(
            "expected an unsigned integer, got {}",
            other
        ))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("expected an integer, got {}", n))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an integer, got {:?}", s))),
        Some(other) => Err(de::Error::custom(format!("expected an integer, got {}", other))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(de::Error::custom(format!("expected a string, got {}", other))),
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "TFS_FILE_NAME")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct AppIdResponse {
    #[serde(rename = "APP_ID")]
    appid: Option<serde_json::Value>,
}

struct Inner {
    config: ClientConfig,
    pool: Arc<ServerPool>,
    dispatcher: Dispatcher,
    gate: ReadinessGate,
    rotator: ImageHostRotator,
    events: EventBus,
    appid: OnceLock<String>,
    bootstrap_error: RwLock<Option<Arc<TfsError>>>,
    bootstrap_timer: StdMutex<Option<JoinHandle<()>>>,
    bootstrap_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Client for the TFS RESTful storage service.
///
/// A new client starts in [`ClientState::Bootstrapping`]: it polls the root
/// directory server for the agent list and, once the list arrives, resolves
/// the application id. Operations issued meanwhile are queued and released
/// in submission order when the client becomes [`ClientState::Ready`].
///
/// Cloning is cheap; clones share the pool, queue and event channel. The
/// background tasks stop when the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use tfs_client::{ClientConfig, TfsClient};
///
/// # async fn run() -> tfs_common::Result<()> {
/// let client = TfsClient::new(ClientConfig::new("tfscom")).await?;
/// let info = client.upload("logo.png", b"...".to_vec(), None).await?;
/// println!("{}", info.url);
/// client.remove(&info.name, None, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TfsClient {
    inner: Arc<Inner>,
}

impl TfsClient {
    /// Creates a client and starts bootstrapping.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`TfsError::InvalidArgument`] when the configuration is unusable,
    /// e.g. an empty appkey or a malformed root server address.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let root = config.validate()?;
        let transport = HttpTransport::new();
        let events = EventBus::new();
        let pool = Arc::new(ServerPool::new(
            root.clone(),
            transport.clone(),
            config.discovery_timeout,
            events.clone(),
        ));

        let appid = OnceLock::new();
        if let Some(preset) = &config.appid {
            let _ = appid.set(preset.clone());
        }

        let inner = Arc::new(Inner {
            dispatcher: Dispatcher::new(Arc::clone(&pool), transport),
            rotator: ImageHostRotator::new(config.image_servers.clone()),
            gate: ReadinessGate::new(),
            bootstrap_error: RwLock::new(None),
            bootstrap_timer: StdMutex::new(None),
            bootstrap_task: StdMutex::new(None),
            appid,
            events,
            pool,
            config,
        });

        // subscribe before the timer can populate the pool
        let populated = inner.pool.watch_populated();
        let timer = tokio::spawn(run_bootstrap_timer(
            Arc::downgrade(&inner),
            inner.config.bootstrap_interval,
        ));
        let bootstrap = tokio::spawn(run_bootstrap(Arc::downgrade(&inner), populated));
        *lock(&inner.bootstrap_timer) = Some(timer);
        *lock(&inner.bootstrap_task) = Some(bootstrap);

        info!(
            appkey = %inner.config.appkey,
            root = %root,
            "TFS client created, waiting for server list"
        );

        Ok(Self { inner })
    }

    // ========================================================================
    // Anonymous objects (v1)
    // ========================================================================

    /// Stores `content` under a server-generated name.
    ///
    /// Only the extension of `source_name` is sent, as the name suffix.
    pub async fn upload(
        &self,
        source_name: &str,
        content: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<UploadInfo> {
        let content = content.into();
        let size = content.len() as u64;
        let body = self
            .inner
            .request(Command::new(Operation::Upload {
                source_name: source_name.to_string(),
                content,
            })
            .with_timeout(timeout))
            .await?;

        let response: UploadResponse = serde_json::from_slice(&body)?;
        let name = response
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TfsError::Parse("upload response has no TFS_FILE_NAME".to_string()))?;
        let url = self.url_for(&format!("{}/{}", self.inner.config.app_location, name));

        Ok(UploadInfo { name, size, url })
    }

    /// Deletes an anonymous object, or hides (`Some(1)`) / unhides
    /// (`Some(0)`) it. A missing object is not an error.
    pub async fn remove(&self, name: &str, hide: Option<u8>, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .request(Command::new(Operation::Remove {
                name: name.to_string(),
                hide,
            })
            .with_timeout(timeout))
            .await?;
        Ok(())
    }

    /// Streams an anonymous object into `sink`, returning the bytes written.
    pub async fn download<W>(
        &self,
        name: &str,
        sink: &mut W,
        range: Option<ByteRange>,
        timeout: Option<Duration>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let ticket = self
            .inner
            .submit(Command::new(Operation::Download {
                name: name.to_string(),
                range,
            })
            .with_timeout(timeout))
            .await?;
        self.inner.dispatcher.execute_into(&ticket, sink).await
    }

    pub async fn get_meta(
        &self,
        name: &str,
        meta_type: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<FileMeta> {
        let body = self
            .inner
            .request(Command::new(Operation::GetMeta {
                name: name.to_string(),
                meta_type,
            })
            .with_timeout(timeout))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    // ========================================================================
    // Named files (v2)
    // ========================================================================

    /// Creates `filename` under user `uid`, with any missing parent
    /// directories. An existing file is not an error.
    pub async fn create_file(&self, uid: &str, filename: &str, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .request(Command::new(Operation::CreateFile {
                uid: uid.to_string(),
                filename: filename.to_string(),
            })
            .with_timeout(timeout))
            .await?;
        Ok(())
    }

    /// Creates `filename` and writes `content` into it.
    ///
    /// A positive `offset` writes `content` at that position. `None` and
    /// `Some(0)` both write it as the whole file, with no offset query.
    pub async fn upload_file(
        &self,
        uid: &str,
        filename: &str,
        content: impl Into<Bytes>,
        offset: Option<u64>,
        timeout: Option<Duration>,
    ) -> Result<UploadInfo> {
        let content = content.into();
        let size = content.len() as u64;

        self.create_file(uid, filename, timeout).await?;
        self.inner
            .request(Command::new(Operation::UploadFile {
                uid: uid.to_string(),
                filename: filename.to_string(),
                content,
                offset,
            })
            .with_timeout(timeout))
            .await?;

        let appid = self.appid().ok_or_else(|| {
            TfsError::InvalidArgument("application id is not resolved yet".to_string())
        })?;
        let name = format!("L1/{}/{}/{}", appid, uid, filename.trim_start_matches('/'));
        let url = self.url_for(&name);

        Ok(UploadInfo { name, size, url })
    }

    /// Deletes a named file. A missing file is not an error.
    pub async fn remove_file(&self, uid: &str, filename: &str, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .request(Command::new(Operation::RemoveFile {
                uid: uid.to_string(),
                filename: filename.to_string(),
            })
            .with_timeout(timeout))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Application id
    // ========================================================================

    /// Asks the storage service for the application id of this appkey.
    pub async fn get_appid(&self, timeout: Option<Duration>) -> Result<String> {
        let body = self
            .inner
            .request(Command::new(Operation::GetAppId).with_timeout(timeout))
            .await?;
        parse_appid(&body)
    }

    /// Application id resolved during bootstrap (or preset in the config).
    pub fn appid(&self) -> Option<&str> {
        self.inner.appid.get().map(String::as_str)
    }

    // ========================================================================
    // Pool and lifecycle
    // ========================================================================

    /// Refreshes the agent list now, outside the refresh budget.
    pub async fn refresh_servers(&self) -> RefreshOutcome {
        self.inner.pool.refresh().await
    }

    /// Snapshot of the current agent list.
    pub async fn servers(&self) -> Vec<Endpoint> {
        self.inner.pool.endpoints().await
    }

    pub async fn state(&self) -> ClientState {
        self.inner.gate.state().await
    }

    /// The error that stopped bootstrap, if any.
    pub async fn bootstrap_error(&self) -> Option<Arc<TfsError>> {
        self.inner.bootstrap_error.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until the client is ready.
    ///
    /// # Errors
    ///
    /// [`TfsError::Bootstrap`] when the application id lookup failed; the
    /// client stays bootstrapping in that case.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut events = self.subscribe();
        loop {
            if self.state().await == ClientState::Ready {
                return Ok(());
            }
            if let Some(err) = self.bootstrap_error().await {
                return Err(TfsError::Bootstrap(err));
            }

            match events.recv().await {
                Ok(ClientEvent::Ready) => return Ok(()),
                Ok(ClientEvent::Error(err)) => return Err(TfsError::Bootstrap(err)),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(TfsError::Closed),
            }
        }
    }

    /// Servable URL of `path` on the next public read replica.
    pub fn url_for(&self, path: &str) -> String {
        self.inner.rotator.url_for(path)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Inner {
    fn context(&self) -> CommandContext<'_> {
        CommandContext {
            appkey: &self.config.appkey,
            appid: self.appid.get().map(String::as_str),
            default_timeout: self.config.upload_timeout,
        }
    }

    /// Passes `command` through the readiness gate and binds it to an agent.
    async fn submit(&self, command: Command) -> Result<Ticket> {
        match self.gate.admit(command).await {
            Admission::Open(command) => {
                let descriptor = command.build(&self.context())?;
                self.dispatcher.assign(descriptor).await
            }
            Admission::Queued(ticket) => ticket.await.map_err(|_| TfsError::Closed)?,
        }
    }

    async fn request(&self, command: Command) -> Result<Bytes> {
        let ticket = self.submit(command).await?;
        self.dispatcher.execute(&ticket).await
    }

    fn stop_bootstrap_timer(&self) {
        if let Some(timer) = lock(&self.bootstrap_timer).take() {
            timer.abort();
            debug!("Bootstrap timer stopped");
        }
    }

    /// Resolves the application id and opens the gate.
    async fn finish_bootstrap(&self) {
        if self.appid.get().is_none() {
            match self.fetch_appid().await {
                Ok(appid) => {
                    info!(appid = %appid, "Application id resolved");
                    let _ = self.appid.set(appid);
                }
                Err(e) => {
                    error!(
                        appkey = %self.config.appkey,
                        error = %e,
                        "Failed to resolve application id, client stays bootstrapping"
                    );
                    let e = Arc::new(e);
                    *self.bootstrap_error.write().await = Some(Arc::clone(&e));
                    self.events.emit(ClientEvent::Error(e));
                    return;
                }
            }
        }

        let released = self.gate.open(&self.dispatcher, &self.context()).await;
        info!(released, "TFS client ready");
        self.events.emit(ClientEvent::Ready);
    }

    /// Bootstrap lookup; goes straight to the dispatcher since the gate is
    /// still closed.
    async fn fetch_appid(&self) -> Result<String> {
        let descriptor = Command::new(Operation::GetAppId).build(&self.context())?;
        let body = self.dispatcher.dispatch(descriptor).await?;
        parse_appid(&body)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_bootstrap_timer();
        if let Some(task) = lock(&self.bootstrap_task).take() {
            task.abort();
        }
    }
}

/// Polls the root server until the pool is first populated.
async fn run_bootstrap_timer(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let pool = match inner.upgrade() {
            Some(inner) => Arc::clone(&inner.pool),
            None => break,
        };
        if pool.is_populated() {
            break;
        }
        pool.refresh().await;
    }
}

/// Waits for the first server list, then finishes bootstrap.
async fn run_bootstrap(inner: Weak<Inner>, mut populated: watch::Receiver<bool>) {
    if populated.wait_for(|populated| *populated).await.is_err() {
        return;
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.stop_bootstrap_timer();
    inner.finish_bootstrap().await;
}

/// Reads `APP_ID` from an `/appid` response. Accepts a string or a number.
fn parse_appid(body: &[u8]) -> Result<String> {
    let response: AppIdResponse = serde_json::from_slice(body)?;
    let appid = match response.appid {
        Some(serde_json::Value::String(id)) => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };

    if appid.is_empty() {
        return Err(TfsError::Parse("appid response has no APP_ID".to_string()));
    }
    Ok(appid)
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
