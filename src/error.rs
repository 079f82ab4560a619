//! Error types for every stage of the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`BrowserDriver`](crate::capture::BrowserDriver).
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Could not reach the DevTools endpoint of the browser.
    #[error("failed to connect to browser DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error object.
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// Unexpected message shape, closed socket, undecodable payload.
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// No reply to a single command within the socket read timeout.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    /// A bounded wait for an element ran out.
    #[error("no element matching {selector} within {timeout:?}")]
    WaitTimeout { selector: String, timeout: Duration },

    /// An immediate lookup found nothing.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("element not interactable: {reason}")]
    NotInteractable { reason: String },

    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    #[error("page load timed out after {duration:?}")]
    PageLoadTimeout { duration: Duration },

    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    #[error("browser I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture stage failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The browser could not be started or attached to.
    #[error("failed to launch browser: {reason}")]
    Launch { reason: String },

    /// The content region never showed up.
    #[error("target element {selector} did not appear within {timeout:?}")]
    ElementTimeout { selector: String, timeout: Duration },

    /// The consent control was not offered. Never returned from [`capture`](crate::capture::capture);
    /// it names the skipped branch in the logs.
    #[error("consent control {selector} not found within {timeout:?}")]
    ConsentNotFound { selector: String, timeout: Duration },

    /// The element that reveals the overlay is missing or cannot be hovered.
    #[error("hover target {selector} unavailable: {source}")]
    HoverTarget {
        selector: String,
        #[source]
        source: BrowserError,
    },

    /// The bitmap was empty, undecodable, or could not be written.
    #[error("screenshot {path} failed: {reason}")]
    Screenshot { path: PathBuf, reason: String },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Compose stage failures.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("cannot load presentation {path}: {reason}")]
    DocumentLoad { path: PathBuf, reason: String },

    #[error("cannot insert image {path}: {reason}")]
    ImageInsert { path: PathBuf, reason: String },

    #[error("cannot save presentation {path}: {reason}")]
    DocumentSave { path: PathBuf, reason: String },
}

impl ComposeError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DocumentLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ImageInsert {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn save(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DocumentSave {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Transcode stage failures.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The host application is not installed or refused to start.
    #[error("host application unavailable: {reason}")]
    Launch { reason: String },

    #[error("host application could not open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("video export failed: {reason}")]
    Export { reason: String },

    /// Rendering was still in progress when the wait bound ran out.
    #[error("video export still running after {waited:?}")]
    Timeout { waited: Duration },

    #[error("video export cancelled")]
    Cancelled,

    #[error("failed to close document: {reason}")]
    Close { reason: String },

    #[error("failed to quit host application: {reason}")]
    Quit { reason: String },
}

impl TranscodeError {
    pub(crate) fn export(reason: impl ToString) -> Self {
        Self::Export {
            reason: reason.to_string(),
        }
    }
}

/// Top-level failure of a run. Any variant maps to exit code 1.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("capture stage failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("compose stage failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("transcode stage failed: {0}")]
    Transcode(#[from] TranscodeError),

    /// A stage returned success but its artifact is missing or empty.
    #[error("{stage} produced no usable artifact at {path}")]
    MissingArtifact { stage: &'static str, path: PathBuf },

    #[error("run cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        let capture = PipelineError::from(CaptureError::ElementTimeout {
            selector: "css `.today.table`".into(),
            timeout: Duration::from_secs(10),
        });
        assert!(capture.to_string().starts_with("capture stage failed:"));
        assert!(capture.to_string().contains(".today.table"));

        let compose = PipelineError::from(ComposeError::load("t.pptx", "missing"));
        assert!(compose.to_string().starts_with("compose stage failed:"));

        let transcode = PipelineError::from(TranscodeError::Timeout {
            waited: Duration::from_secs(600),
        });
        assert!(transcode.to_string().contains("still running"));
    }

    #[test]
    fn browser_error_converts_into_capture_error() {
        let err: CaptureError = BrowserError::NavigationFailed {
            reason: "net::ERR_NAME_NOT_RESOLVED".into(),
        }
        .into();
        assert!(matches!(err, CaptureError::Browser(_)));
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn hover_error_keeps_source() {
        use std::error::Error as _;
        let err = CaptureError::HoverTarget {
            selector: ".prev".into(),
            source: BrowserError::ElementNotFound {
                selector: ".prev".into(),
            },
        };
        assert!(err.source().is_some());
    }
}
