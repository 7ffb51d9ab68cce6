//! Snapshot capture.
//!
//! A snapshot is either fetched from an HTTP URL or grabbed as a single frame
//! from a media stream by an `ffmpeg` subprocess. The bytes are returned
//! untouched; callers publish them raw.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::SnapshotConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FFMPEG: &str = "ffmpeg";

/// How a snapshot is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// HTTP GET of a still image
    Url,
    /// One frame from an RTSP/RTMP stream via ffmpeg
    Stream,
}

impl SnapshotKind {
    /// The configured kind, or a guess from the address scheme.
    pub fn resolve(explicit: Option<SnapshotKind>, address: &str) -> SnapshotKind {
        explicit.unwrap_or_else(|| {
            if address.starts_with("rtsp") || address.starts_with("rtmp") {
                SnapshotKind::Stream
            } else {
                SnapshotKind::Url
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("No snapshot address configured")]
    NoAddress,

    #[error("Invalid snapshot address: {0}")]
    InvalidAddress(#[from] url::ParseError),

    #[error("Cannot remove credentials from snapshot address")]
    Credentials,

    #[error("Snapshot request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Snapshot request returned HTTP {0}")]
    Status(u16),

    #[error("Failed to run ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffmpeg failed: code={code:?} {stderr}")]
    Ffmpeg { code: Option<i32>, stderr: String },

    #[error("Snapshot was empty")]
    Empty,
}

/// Basic credentials for a snapshot URL and the URL with its userinfo removed.
///
/// Configured snapshot credentials are used when both are set. Otherwise
/// credentials embedded in the address fill in, each part preferring the
/// embedded value. Authentication is only sent when both parts are known.
fn prepare_request(
    address: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(Url, Option<(String, String)>), SnapshotError> {
    let mut url = Url::parse(address)?;

    let decode = |s: &str| {
        urlencoding::decode(s)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    let embedded_user = Some(url.username()).filter(|u| !u.is_empty()).map(decode);
    let embedded_pass = url.password().filter(|p| !p.is_empty()).map(decode);

    let mut username = username.filter(|u| !u.is_empty()).map(str::to_string);
    let mut password = password.filter(|p| !p.is_empty()).map(str::to_string);
    if (username.is_none() || password.is_none())
        && (embedded_user.is_some() || embedded_pass.is_some())
    {
        username = embedded_user.or(username);
        password = embedded_pass.or(password);
    }

    // Userinfo in the URL would make reqwest send its own Authorization header.
    if !url.username().is_empty() || url.password().is_some() {
        url.set_username("")
            .and_then(|_| url.set_password(None))
            .map_err(|_| SnapshotError::Credentials)?;
    }

    Ok((url, username.zip(password)))
}

/// Arguments for writing a single frame of `address` to stdout.
fn ffmpeg_args(address: &str) -> [&str; 11] {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-i",
        address,
        "-frames:v",
        "1",
        "-f",
        "image2",
        "-",
    ]
}

/// Captures snapshots for any camera.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    http: reqwest::Client,
    ffmpeg: String,
}

impl Snapshotter {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            ffmpeg: DEFAULT_FFMPEG.to_string(),
        }
    }

    /// Use a different program in place of `ffmpeg`.
    pub fn with_ffmpeg(mut self, program: impl Into<String>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    /// Whether the ffmpeg program can be started.
    pub async fn ffmpeg_available(&self) -> bool {
        tokio::process::Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Capture one snapshot as configured.
    pub async fn capture(&self, config: &SnapshotConfig) -> Result<Vec<u8>, SnapshotError> {
        let address = config
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(SnapshotError::NoAddress)?;

        match SnapshotKind::resolve(config.kind, address) {
            SnapshotKind::Url => {
                self.fetch(address, config.username.as_deref(), config.password.as_deref())
                    .await
            }
            SnapshotKind::Stream => self.grab_frame(address).await,
        }
    }

    async fn fetch(
        &self,
        address: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Vec<u8>, SnapshotError> {
        let (url, auth) = prepare_request(address, username, password)?;
        debug!(%url, authenticated = auth.is_some(), "Fetching snapshot");

        let mut request = self.http.get(url);
        if let Some((username, password)) = auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SnapshotError::Empty);
        }
        Ok(bytes.to_vec())
    }

    async fn grab_frame(&self, address: &str) -> Result<Vec<u8>, SnapshotError> {
        let args = ffmpeg_args(address);
        debug!(program = %self.ffmpeg, "Grabbing stream frame");

        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SnapshotError::Ffmpeg {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(SnapshotError::Empty);
        }
        Ok(output.stdout)
    }
}

impl Default for Snapshotter {
    fn default() -> Self {
        Self::new()
    }
}
