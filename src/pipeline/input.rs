//! Input loading: turn a user-supplied path or URL into document bytes.
//!
//! The analysis service and pdfium both take the document as a byte slice,
//! so nothing is written to disk. The `%PDF` magic is checked up front so a
//! wrong file fails here with a clear error instead of deep in the analysis
//! service or the renderer.

use crate::error::ParseError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Document bytes plus a display name.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub bytes: Vec<u8>,
    /// Last path segment of the file or URL.
    pub file_name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL.
pub async fn load_document(input: &str, download_timeout: Duration) -> Result<LoadedDocument, ParseError> {
    let document = if is_url(input) {
        download_url(input, download_timeout).await?
    } else {
        read_local(input).await?
    };
    check_magic(input, &document.bytes)?;
    Ok(document)
}

async fn read_local(path_str: &str) -> Result<LoadedDocument, ParseError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ParseError::InputNotFound { path: path.clone() },
        _ => ParseError::Internal(format!("reading '{}': {}", path.display(), e)),
    })?;

    debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());

    Ok(LoadedDocument { bytes, file_name })
}

async fn download_url(url: &str, timeout: Duration) -> Result<LoadedDocument, ParseError> {
    info!("Downloading document from: {}", url);

    let download_error = |reason: String| ParseError::Download {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| download_error(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            download_error(format!("timed out after {}s", timeout.as_secs()))
        } else {
            download_error(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(download_error(format!("HTTP {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(e.to_string()))?
        .to_vec();

    info!("Downloaded {} bytes", bytes.len());
    Ok(LoadedDocument {
        bytes,
        file_name: extract_filename(url),
    })
}

fn check_magic(input: &str, bytes: &[u8]) -> Result<(), ParseError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(ParseError::NotAPdf {
            input: input.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        })
    }
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
