//! Transcode stage: have a host application render the composed presentation to video.
//!
//! The host is driven through [`HostApplication`] as a fixed sequence of states:
//!
//! ```text
//! Idle -> Opening -> Rendering -> Closing -> Terminal
//! ```
//!
//! `Closing` runs whenever a document handle exists and `Terminal` (quit) runs on every
//! path, including cancellation and timeouts. The first error wins; failures while
//! cleaning up after it are only logged.

pub mod office;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TranscodeSettings;
use crate::error::TranscodeError;

pub use office::OfficeHost;

/// Shared stop request, set from a signal handler and checked by the poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the host reports about a running export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    InProgress,
    Done,
    /// The host gave up; the string is its diagnostic.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportParams {
    /// Vertical pixels.
    pub resolution: u32,
    /// 0..=100, higher is better.
    pub quality: u8,
    pub slide_duration_secs: u32,
}

impl From<&TranscodeSettings> for ExportParams {
    fn from(settings: &TranscodeSettings) -> Self {
        Self {
            resolution: settings.resolution,
            quality: settings.quality,
            slide_duration_secs: settings.slide_duration_secs,
        }
    }
}

/// How often and for how long to poll a running export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl From<&TranscodeSettings> for PollPolicy {
    fn from(settings: &TranscodeSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            max_wait: settings.max_wait(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Idle,
    Opening,
    Rendering,
    Closing,
    Terminal,
}

/// A program that can open a presentation and export it as video.
pub trait HostApplication {
    /// An open document.
    type Handle;

    /// Open the document at an absolute `path`.
    fn open(&mut self, path: &Path) -> Result<Self::Handle, TranscodeError>;

    /// Start rendering to `output`. Returns once the export is under way.
    fn export(&mut self, handle: &mut Self::Handle, output: &Path, params: &ExportParams) -> Result<(), TranscodeError>;

    fn poll_status(&mut self, handle: &mut Self::Handle) -> Result<ExportStatus, TranscodeError>;

    /// Close the document. Stops an export that is still running.
    fn close(&mut self, handle: Self::Handle) -> Result<(), TranscodeError>;

    /// Shut the application down.
    fn quit(&mut self) -> Result<(), TranscodeError>;
}

/// The video written by a successful transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub resolution: u32,
    pub quality: u8,
    pub size_bytes: u64,
}

/// Launch the production host and render `document` to `output`.
pub fn run(
    settings: &TranscodeSettings,
    document: &Path,
    output: &Path,
    cancel: &CancelFlag,
    on_tick: impl FnMut(Duration),
) -> Result<VideoArtifact, TranscodeError> {
    let host = OfficeHost::launch(settings, cancel)?;
    transcode(
        host,
        document,
        output,
        &ExportParams::from(settings),
        &PollPolicy::from(settings),
        cancel,
        on_tick,
    )
}

/// Drive `host` through the export state machine. `on_tick` receives the elapsed
/// render time after every poll that reports the export still running.
pub fn transcode<H: HostApplication>(
    mut host: H,
    document: &Path,
    output: &Path,
    params: &ExportParams,
    policy: &PollPolicy,
    cancel: &CancelFlag,
    on_tick: impl FnMut(Duration),
) -> Result<VideoArtifact, TranscodeError> {
    let result = open_render_close(&mut host, document, output, params, policy, cancel, on_tick);

    enter(TranscodeState::Terminal);
    match host.quit() {
        Ok(()) => tracing::debug!("host application quit"),
        Err(e) if result.is_ok() => return Err(e),
        Err(e) => tracing::warn!(error = %e, "host application did not quit cleanly"),
    }
    result
}

fn open_render_close<H: HostApplication>(
    host: &mut H,
    document: &Path,
    output: &Path,
    params: &ExportParams,
    policy: &PollPolicy,
    cancel: &CancelFlag,
    on_tick: impl FnMut(Duration),
) -> Result<VideoArtifact, TranscodeError> {
    enter(TranscodeState::Idle);
    let document = std::path::absolute(document).map_err(|e| TranscodeError::Open {
        path: document.to_path_buf(),
        reason: e.to_string(),
    })?;
    let output = std::path::absolute(output).map_err(TranscodeError::export)?;
    prepare_output(&output)?;

    enter(TranscodeState::Opening);
    let mut handle = host.open(&document)?;
    tracing::info!(document = %document.display(), "document opened");

    enter(TranscodeState::Rendering);
    let rendered = render(host, &mut handle, &output, params, policy, cancel, on_tick);

    enter(TranscodeState::Closing);
    let closed = host.close(handle);
    match (rendered, closed) {
        (Ok(()), Ok(())) => {}
        (Ok(()), Err(e)) => return Err(e),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(error = %close_err, "document did not close cleanly");
            return Err(e);
        }
    }

    let size_bytes = fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
    if size_bytes == 0 {
        return Err(TranscodeError::export(format!(
            "host reported success but {} is missing or empty",
            output.display()
        )));
    }
    Ok(VideoArtifact {
        path: output,
        resolution: params.resolution,
        quality: params.quality,
        size_bytes,
    })
}

/// Create the parent folder and drop a stale file from an earlier run.
fn prepare_output(output: &Path) -> Result<(), TranscodeError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(TranscodeError::export)?;
    }
    match fs::remove_file(output) {
        Ok(()) => {
            tracing::debug!(path = %output.display(), "removed previous video");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TranscodeError::export(e)),
    }
}

fn render<H: HostApplication>(
    host: &mut H,
    handle: &mut H::Handle,
    output: &Path,
    params: &ExportParams,
    policy: &PollPolicy,
    cancel: &CancelFlag,
    mut on_tick: impl FnMut(Duration),
) -> Result<(), TranscodeError> {
    host.export(handle, output, params)?;
    tracing::info!(
        output = %output.display(),
        resolution = params.resolution,
        quality = params.quality,
        "export started"
    );

    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        match host.poll_status(handle)? {
            ExportStatus::InProgress => {}
            ExportStatus::Done => {
                tracing::info!(elapsed = ?started.elapsed(), "export finished");
                return Ok(());
            }
            ExportStatus::Failed(reason) => return Err(TranscodeError::export(reason)),
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.max_wait {
            return Err(TranscodeError::Timeout { waited: elapsed });
        }
        on_tick(elapsed);
        thread::sleep(policy.interval.min(policy.max_wait - elapsed));
    }
}

fn enter(state: TranscodeState) {
    tracing::debug!(?state, "transcode state");
}
