//! LibreOffice + ffmpeg as a [`HostApplication`].
//!
//! `open` has a headless LibreOffice render the first slide to PNG inside a private
//! profile, so no first-run wizard, recovery prompt or lock dialog can block it.
//! `export` starts ffmpeg on that still and `poll_status` watches the encoder process.

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use url::Url;

use super::{CancelFlag, ExportParams, ExportStatus, HostApplication};
use crate::config::TranscodeSettings;
use crate::error::TranscodeError;
use crate::scratch::ScratchDir;

pub const OFFICE_ENV_VAR: &str = "SLIDECAST_OFFICE";

/// Bound on the slide render in `open`.
const OPEN_TIMEOUT: Duration = Duration::from_secs(120);
const FRAME_RATE: u32 = 30;

pub struct OfficeHost {
    office: PathBuf,
    ffmpeg: PathBuf,
    scratch: Option<ScratchDir>,
    cancel: CancelFlag,
}

/// An opened presentation: its rendered slide and, once exporting, the encoder.
pub struct OfficeDocument {
    slide: PathBuf,
    encoder: Option<Child>,
    encoder_log: PathBuf,
}

impl OfficeHost {
    /// Locate LibreOffice and ffmpeg and prepare a private profile directory.
    /// Setting `cancel` aborts a slide render that is still running in `open`.
    pub fn launch(settings: &TranscodeSettings, cancel: &CancelFlag) -> Result<Self, TranscodeError> {
        let ffmpeg = settings
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        if !responds(&ffmpeg, "-version") {
            return Err(TranscodeError::Launch {
                reason: format!("ffmpeg not runnable at {}", ffmpeg.display()),
            });
        }

        let office = office_candidates(settings.office_path.as_deref())
            .into_iter()
            .find(|candidate| responds(candidate, "--version"))
            .ok_or_else(|| TranscodeError::Launch {
                reason: "LibreOffice (soffice) not found; set transcode.office_path or SLIDECAST_OFFICE"
                    .to_string(),
            })?;

        let scratch = ScratchDir::new("office").map_err(|e| TranscodeError::Launch {
            reason: format!("scratch directory: {e}"),
        })?;
        tracing::info!(office = %office.display(), ffmpeg = %ffmpeg.display(), "host application ready");
        Ok(Self {
            office,
            ffmpeg,
            scratch: Some(scratch),
            cancel: cancel.clone(),
        })
    }

    fn scratch(&self) -> Result<&ScratchDir, TranscodeError> {
        self.scratch.as_ref().ok_or_else(|| TranscodeError::Launch {
            reason: "host application already quit".to_string(),
        })
    }
}

impl HostApplication for OfficeHost {
    type Handle = OfficeDocument;

    fn open(&mut self, path: &Path) -> Result<OfficeDocument, TranscodeError> {
        let open_error = |reason: String| TranscodeError::Open {
            path: path.to_path_buf(),
            reason,
        };
        if !path.is_file() {
            return Err(open_error("no such file".to_string()));
        }

        let scratch = self.scratch()?;
        let profile = Url::from_directory_path(scratch.join("profile"))
            .map_err(|()| open_error("profile path is not absolute".to_string()))?;
        let render_dir = scratch.join("render");
        fs::create_dir_all(&render_dir).map_err(|e| open_error(e.to_string()))?;
        let log_path = scratch.join("office.log");
        let log = File::create(&log_path).map_err(|e| open_error(e.to_string()))?;

        let child = Command::new(&self.office)
            .arg(format!("-env:UserInstallation={profile}"))
            .args([
                "--headless",
                "--invisible",
                "--norestore",
                "--nolockcheck",
                "--nodefault",
                "--nologo",
                "--convert-to",
                "png",
                "--outdir",
            ])
            .arg(&render_dir)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| open_error(format!("starting {}: {e}", self.office.display())))?;

        let status = match wait_with_deadline(child, OPEN_TIMEOUT, &self.cancel) {
            Ok(ChildWait::Exited(status)) => status,
            Ok(ChildWait::TimedOut) => {
                return Err(open_error(format!("slide render did not finish within {OPEN_TIMEOUT:?}")))
            }
            Ok(ChildWait::Cancelled) => {
                tracing::warn!("slide render cancelled");
                return Err(TranscodeError::Cancelled);
            }
            Err(e) => return Err(open_error(e.to_string())),
        };
        if !status.success() {
            return Err(open_error(format!("soffice exited with {status}: {}", log_tail(&log_path))));
        }

        // soffice exits 0 even when it could not read the file.
        let mut file_name = path.file_stem().unwrap_or_default().to_os_string();
        file_name.push(".png");
        let slide = render_dir.join(file_name);
        if !slide.is_file() {
            return Err(open_error(format!("no slide render produced: {}", log_tail(&log_path))));
        }
        tracing::debug!(slide = %slide.display(), "slide rendered");

        Ok(OfficeDocument {
            slide,
            encoder: None,
            encoder_log: scratch.join("encoder.log"),
        })
    }

    fn export(&mut self, handle: &mut OfficeDocument, output: &Path, params: &ExportParams) -> Result<(), TranscodeError> {
        if handle.encoder.is_some() {
            return Err(TranscodeError::export("export already running for this document"));
        }
        let log = File::create(&handle.encoder_log).map_err(TranscodeError::export)?;
        let args = encoder_args(&handle.slide, output, params);
        tracing::debug!(?args, "starting encoder");
        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| TranscodeError::export(format!("starting ffmpeg: {e}")))?;
        handle.encoder = Some(child);
        Ok(())
    }

    fn poll_status(&mut self, handle: &mut OfficeDocument) -> Result<ExportStatus, TranscodeError> {
        let encoder = handle
            .encoder
            .as_mut()
            .ok_or_else(|| TranscodeError::export("export was never started"))?;
        let status = match encoder.try_wait().map_err(TranscodeError::export)? {
            None => ExportStatus::InProgress,
            Some(status) if status.success() => ExportStatus::Done,
            Some(status) => ExportStatus::Failed(format!(
                "ffmpeg exited with {status}: {}",
                log_tail(&handle.encoder_log)
            )),
        };
        Ok(status)
    }

    fn close(&mut self, mut handle: OfficeDocument) -> Result<(), TranscodeError> {
        if let Some(mut encoder) = handle.encoder.take() {
            let running = encoder
                .try_wait()
                .map_err(|e| TranscodeError::Close { reason: e.to_string() })?
                .is_none();
            if running {
                tracing::warn!("stopping unfinished encoder");
                encoder
                    .kill()
                    .and_then(|()| encoder.wait().map(drop))
                    .map_err(|e| TranscodeError::Close { reason: e.to_string() })?;
            }
        }
        match fs::remove_file(&handle.slide) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(TranscodeError::Close { reason: e.to_string() })
            }
            _ => Ok(()),
        }
    }

    fn quit(&mut self) -> Result<(), TranscodeError> {
        let Some(scratch) = self.scratch.take() else {
            return Ok(());
        };
        fs::remove_dir_all(scratch.path()).map_err(|e| TranscodeError::Quit {
            reason: format!("removing {}: {e}", scratch.path().display()),
        })
    }
}

impl Drop for OfficeDocument {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            let _ = encoder.kill();
            let _ = encoder.wait();
        }
    }
}

/// Map quality 0..=100 linearly onto x264 CRF 40..=14.
pub fn quality_to_crf(quality: u8) -> u32 {
    let quality = u32::from(quality.min(100));
    40 - (quality * 26 + 50) / 100
}

/// ffmpeg arguments turning one still into an H.264 MP4.
pub fn encoder_args(slide: &Path, output: &Path, params: &ExportParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-loop", "1", "-framerate"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(FRAME_RATE.to_string().into());
    args.push("-i".into());
    args.push(slide.into());
    args.push("-t".into());
    args.push(params.slide_duration_secs.to_string().into());
    args.push("-vf".into());
    args.push(format!("scale=-2:{}:flags=lanczos,format=yuv420p", params.resolution).into());
    for arg in ["-c:v", "libx264", "-preset", "medium", "-crf"] {
        args.push(arg.into());
    }
    args.push(quality_to_crf(params.quality).to_string().into());
    for arg in ["-r", &FRAME_RATE.to_string(), "-movflags", "+faststart"] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

fn office_candidates(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(OFFICE_ENV_VAR) {
        if !env_path.trim().is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    candidates.extend(["soffice", "libreoffice"].iter().map(PathBuf::from));
    candidates.extend(
        platform_office_paths()
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.exists()),
    );
    candidates
}

fn platform_office_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &["/Applications/LibreOffice.app/Contents/MacOS/soffice"]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\LibreOffice\program\soffice.exe",
            r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        &[
            "/usr/lib/libreoffice/program/soffice",
            "/opt/libreoffice/program/soffice",
            "/snap/bin/libreoffice",
        ]
    }
}

fn responds(program: &Path, flag: &str) -> bool {
    Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[derive(Debug)]
enum ChildWait {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Wait for `child` to exit. It is killed once `timeout` has passed or `cancel` is set.
fn wait_with_deadline(mut child: Child, timeout: Duration, cancel: &CancelFlag) -> std::io::Result<ChildWait> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ChildWait::Exited(status));
        }
        let outcome = if cancel.is_cancelled() {
            ChildWait::Cancelled
        } else if Instant::now() >= deadline {
            ChildWait::TimedOut
        } else {
            thread::sleep(Duration::from_millis(100));
            continue;
        };
        child.kill()?;
        child.wait()?;
        return Ok(outcome);
    }
}

/// Last few lines of a process log, for error messages.
fn log_tail(path: &Path) -> String {
    let text = fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(5)..].join(" | ");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}
