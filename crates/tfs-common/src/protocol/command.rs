//! Logical operations and the request descriptors they map to.
//!
//! v1 operations address anonymous, server-named objects under
//! `/v1/{appkey}`. v2 operations address caller-chosen paths under
//! `/v2/{appkey}/{appid}/{uid}/file/{filename}` and need the application id
//! resolved during client bootstrap.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use hyper::Method;

use super::error::{Result, TfsError};

/// Statuses every operation treats as success.
pub const SUCCESS_STATUSES: [u16; 2] = [200, 201];

/// Fully resolved HTTP request, ready to be sent to any storage agent.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path and query, e.g. `/v1/tfscom?suffix=.png&simple_name=1`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// 200, 201 and the operation's idempotent extra status, if any
    pub acceptable_statuses: BTreeSet<u16>,
    pub timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            acceptable_statuses: SUCCESS_STATUSES.into_iter().collect(),
            timeout,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Sends an explicit `Content-Length: 0` for body-less writes.
    pub fn with_empty_body(mut self) -> Self {
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        self
    }

    pub fn accept_status(mut self, status: u16) -> Self {
        self.acceptable_statuses.insert(status);
        self
    }

    pub fn is_acceptable(&self, status: u16) -> bool {
        self.acceptable_statuses.contains(&status)
    }
}

/// Partial read of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    /// Bytes to read from `offset`; `None` or zero reads to the end
    pub size: Option<u64>,
}

/// The closed set of operations the storage service understands.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Store `content` under a server-generated name. `source_name` only
    /// contributes its extension.
    Upload { source_name: String, content: Bytes },
    /// Delete (or hide/unhide with `hide`) an anonymous object.
    Remove { name: String, hide: Option<u8> },
    Download { name: String, range: Option<ByteRange> },
    GetMeta { name: String, meta_type: Option<u8> },
    /// Create a named file, creating parent directories.
    CreateFile { uid: String, filename: String },
    UploadFile {
        uid: String,
        filename: String,
        content: Bytes,
        offset: Option<u64>,
    },
    RemoveFile { uid: String, filename: String },
    GetAppId,
}

impl Operation {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Upload { .. } => "upload",
            Operation::Remove { .. } => "remove",
            Operation::Download { .. } => "download",
            Operation::GetMeta { .. } => "get-meta",
            Operation::CreateFile { .. } => "create-file",
            Operation::UploadFile { .. } => "upload-file",
            Operation::RemoveFile { .. } => "remove-file",
            Operation::GetAppId => "get-appid",
        }
    }
}

/// Client-wide values a command needs to build its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub appkey: &'a str,
    pub appid: Option<&'a str>,
    /// Timeout applied when the command has no override
    pub default_timeout: Duration,
}

/// An operation plus its per-call timeout override.
#[derive(Debug, Clone)]
pub struct Command {
    pub operation: Operation,
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.operation.kind()
    }

    /// Maps the operation onto a request descriptor.
    ///
    /// Pure: performs no I/O. Fails with [`TfsError::InvalidArgument`] when a
    /// required field is empty or unusable in a URL, or when a v2 operation
    /// is built before the application id is known.
    pub fn build(&self, ctx: &CommandContext<'_>) -> Result<RequestDescriptor> {
        let appkey = require_segment("appkey", ctx.appkey)?;
        let timeout = self.timeout.unwrap_or(ctx.default_timeout);

        let descriptor = match &self.operation {
            Operation::Upload {
                source_name,
                content,
            } => {
                let mut path = format!("/v1/{}", appkey);
                if let Some(ext) = extension(source_name) {
                    require_extension(ext)?;
                    path.push_str(&format!("?suffix=.{}&simple_name=1", ext));
                }
                RequestDescriptor::new(Method::POST, path, timeout).with_body(content.clone())
            }
            Operation::Remove { name, hide } => {
                let name = require_segment("name", name)?;
                let mut path = format!("/v1/{}/{}", appkey, name);
                if let Some(hide) = hide {
                    path.push_str(&format!("?hide={}", require_flag("hide", *hide)?));
                }
                RequestDescriptor::new(Method::DELETE, path, timeout)
                    .with_empty_body()
                    .accept_status(404)
            }
            Operation::Download { name, range } => {
                let name = require_segment("name", name)?;
                let mut path = format!("/v1/{}/{}", appkey, name);
                if let Some(range) = range {
                    path.push_str(&format!("?offset={}", range.offset));
                    if let Some(size) = range.size.filter(|s| *s > 0) {
                        path.push_str(&format!("&size={}", size));
                    }
                }
                RequestDescriptor::new(Method::GET, path, timeout)
            }
            Operation::GetMeta { name, meta_type } => {
                let name = require_segment("name", name)?;
                let mut path = format!("/v1/{}/{}", appkey, name);
                if let Some(meta_type) = meta_type {
                    path.push_str(&format!("?type={}", require_flag("type", *meta_type)?));
                }
                RequestDescriptor::new(Method::GET, path, timeout)
            }
            Operation::CreateFile { uid, filename } => {
                let path = format!("{}?recursive=1", named_path(ctx, uid, filename)?);
                RequestDescriptor::new(Method::POST, path, timeout)
                    .with_empty_body()
                    .accept_status(409)
            }
            Operation::UploadFile {
                uid,
                filename,
                content,
                offset,
            } => {
                let mut path = named_path(ctx, uid, filename)?;
                // offset 0 is a plain whole-file write
                if let Some(offset) = offset.filter(|o| *o > 0) {
                    path.push_str(&format!("?offset={}&size={}", offset, content.len()));
                }
                RequestDescriptor::new(Method::PUT, path, timeout).with_body(content.clone())
            }
            Operation::RemoveFile { uid, filename } => {
                RequestDescriptor::new(Method::DELETE, named_path(ctx, uid, filename)?, timeout)
                    .with_empty_body()
                    .accept_status(404)
            }
            Operation::GetAppId => {
                RequestDescriptor::new(Method::GET, format!("/v2/{}/appid", appkey), timeout)
            }
        };

        Ok(descriptor)
    }
}

/// `/v2/{appkey}/{appid}/{uid}/file/{filename}`
fn named_path(ctx: &CommandContext<'_>, uid: &str, filename: &str) -> Result<String> {
    let appid = ctx.appid.ok_or_else(|| {
        TfsError::InvalidArgument("application id is not resolved yet".to_string())
    })?;
    let appid = require_segment("appid", appid)?;
    let uid = require_segment("uid", uid)?;
    if uid.contains('/') {
        return Err(TfsError::InvalidArgument(format!(
            "uid must not contain '/': {}",
            uid
        )));
    }
    let filename = require_segment("filename", filename.trim_start_matches('/'))?;

    Ok(format!(
        "/v2/{}/{}/{}/file/{}",
        ctx.appkey, appid, uid, filename
    ))
}

fn require_segment<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(TfsError::InvalidArgument(format!("{} must not be empty", field)));
    }
    if let Some(c) = invalid_path_char(value) {
        return Err(TfsError::InvalidArgument(format!(
            "{} contains {:?}, which is not allowed in a URL path (percent-encode it): {:?}",
            field, c, value
        )));
    }
    Ok(value)
}

/// First character that cannot appear unescaped in a URL path.
///
/// Allowed: RFC 3986 `pchar` (unreserved, sub-delims, `:` and `@`), `/`,
/// and `%` when it starts a `%XX` escape.
fn invalid_path_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: Vec<char> = chars.clone().take(2).collect();
            if hex.len() == 2 && hex.iter().all(|h| h.is_ascii_hexdigit()) {
                chars.nth(1);
                continue;
            }
            return Some(c);
        }
        if !(c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:@/".contains(c)) {
            return Some(c);
        }
    }
    None
}

/// The upload suffix lands in the query string, so it is held to a
/// tighter set than path segments.
fn require_extension(ext: &str) -> Result<&str> {
    if !ext
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TfsError::InvalidArgument(format!(
            "extension may only contain ASCII letters, digits, '_' and '-': {:?}",
            ext
        )));
    }
    Ok(ext)
}

fn require_flag(field: &str, value: u8) -> Result<u8> {
    if value > 1 {
        return Err(TfsError::InvalidArgument(format!(
            "{} must be 0 or 1, got {}",
            field, value
        )));
    }
    Ok(value)
}

fn extension(source_name: &str) -> Option<&str> {
    Path::new(source_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
}
