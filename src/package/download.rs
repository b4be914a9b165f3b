//! Streamed archive download

use crate::package::cancel::CancellationToken;
use reqwest::blocking::Client;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("download of {url} ended after {received} of {expected} bytes")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },
    #[error("reading the body of {url} failed after {received} bytes: {source}")]
    Body {
        url: String,
        received: u64,
        #[source]
        source: io::Error,
    },
    #[error("download of {url} was canceled")]
    Canceled { url: String },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stream `url` into `destination`
///
/// Bytes go to a temporary file next to `destination`, which is renamed into
/// place only once the body is complete. `progress` receives the fraction
/// downloaded (0.0 to 1.0) when the server announces a length. Cancellation is
/// checked before every chunk.
pub fn fetch_to_file(
    http: &Client,
    url: &str,
    destination: &Path,
    cancel: &CancellationToken,
    mut progress: impl FnMut(f32),
) -> Result<PathBuf, DownloadError> {
    let canceled = || DownloadError::Canceled {
        url: url.to_string(),
    };
    if cancel.is_canceled() {
        return Err(canceled());
    }

    log::info!("downloading {url}");
    let mut response = http.get(url).send().map_err(|source| DownloadError::Http {
        url: url.to_string(),
        source,
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let expected = response.content_length();

    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DownloadError::Io { path, source }
    };
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    loop {
        if cancel.is_canceled() {
            log::info!("download of {url} canceled after {received} bytes");
            return Err(canceled());
        }
        let read = match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(DownloadError::Body {
                    url: url.to_string(),
                    received,
                    source,
                })
            }
        };
        file.write_all(&buffer[..read]).map_err(io_err(file.path()))?;
        received += read as u64;
        if let Some(total) = expected.filter(|total| *total > 0) {
            progress((received as f64 / total as f64).min(1.0) as f32);
        }
    }

    if let Some(expected) = expected {
        if received < expected {
            return Err(DownloadError::Truncated {
                url: url.to_string(),
                expected,
                received,
            });
        }
    }
    file.flush().map_err(io_err(file.path()))?;
    file.persist(destination)
        .map_err(|e| DownloadError::Io {
            path: destination.to_path_buf(),
            source: e.error,
        })?;
    progress(1.0);

    log::debug!("downloaded {received} bytes to {}", destination.display());
    Ok(destination.to_path_buf())
}
