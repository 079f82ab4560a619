//! Run configuration: compiled-in defaults, optional JSON overrides, validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::Selector;
use crate::error::PipelineError;

/// English Metric Units per centimetre, the unit of slide geometry in OOXML.
pub const EMU_PER_CM: f64 = 360_000.0;

pub const CONFIG_FILE_NAME: &str = "slidecast.json";
pub const DEFAULT_VIDEO_FILE_NAME: &str = "out.mp4";

fn default_url() -> String {
    "https://freemeteo.gr/kairos/plati/7-imeres/pinakas/?gid=734573&language=greek&country=greece".to_string()
}

/// Parameters for one execution. Read-only once the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub url: String,
    pub screenshot_path: PathBuf,
    pub template_path: PathBuf,
    pub composed_path: PathBuf,
    /// `None` resolves to the desktop directory, see [`RunConfig::video_output`].
    pub video_path: Option<PathBuf>,
    pub placement: Placement,
    pub capture: CaptureSettings,
    pub transcode: TranscodeSettings,
    pub log: LogSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            screenshot_path: PathBuf::from("weather_screenshot.png"),
            template_path: PathBuf::from("template.pptx"),
            composed_path: PathBuf::from("updated_presentation.pptx"),
            video_path: None,
            placement: Placement::default(),
            capture: CaptureSettings::default(),
            transcode: TranscodeSettings::default(),
            log: LogSettings::default(),
        }
    }
}

/// Image rectangle on the slide, in centimetres.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Placement {
    pub left_cm: f64,
    pub top_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            left_cm: 4.18,
            top_cm: 1.29,
            width_cm: 17.03,
            height_cm: 11.69,
        }
    }
}

impl Placement {
    pub fn new(left_cm: f64, top_cm: f64, width_cm: f64, height_cm: f64) -> Self {
        Self {
            left_cm,
            top_cm,
            width_cm,
            height_cm,
        }
    }

    pub fn to_emu(&self) -> EmuRect {
        EmuRect {
            x: cm_to_emu(self.left_cm),
            y: cm_to_emu(self.top_cm),
            cx: cm_to_emu(self.width_cm),
            cy: cm_to_emu(self.height_cm),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let fields = [
            ("left", self.left_cm),
            ("top", self.top_cm),
            ("width", self.width_cm),
            ("height", self.height_cm),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::Config(format!(
                    "placement {name} must be a positive number of centimetres, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A rectangle in EMU as stored in `a:off` / `a:ext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmuRect {
    pub x: i64,
    pub y: i64,
    pub cx: i64,
    pub cy: i64,
}

pub fn cm_to_emu(cm: f64) -> i64 {
    (cm * EMU_PER_CM).round() as i64
}

/// Browser-side settings of the capture stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub target: Selector,
    pub hover: Selector,
    /// `None` skips the consent step entirely.
    pub consent: Option<Selector>,
    pub consent_wait_secs: u64,
    pub target_wait_secs: u64,
    pub page_load_wait_secs: u64,
    pub headless: bool,
    pub no_sandbox: bool,
    pub browser_path: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target: Selector::Css(".today.table".to_string()),
            hover: Selector::Css(".prev.sevendays".to_string()),
            consent: Some(Selector::Text("Συναίνεση".to_string())),
            consent_wait_secs: 5,
            target_wait_secs: 10,
            page_load_wait_secs: 30,
            headless: false,
            no_sandbox: false,
            browser_path: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

impl CaptureSettings {
    pub fn consent_wait(&self) -> Duration {
        Duration::from_secs(self.consent_wait_secs)
    }

    pub fn target_wait(&self) -> Duration {
        Duration::from_secs(self.target_wait_secs)
    }

    pub fn page_load_wait(&self) -> Duration {
        Duration::from_secs(self.page_load_wait_secs)
    }
}

/// Host-application settings of the transcode stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscodeSettings {
    /// Vertical pixels of the rendered video.
    pub resolution: u32,
    /// 0 (smallest file) to 100 (best picture).
    pub quality: u8,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    /// How long the single slide stays on screen.
    pub slide_duration_secs: u32,
    pub office_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            resolution: 1080,
            quality: 100,
            poll_interval_ms: 1000,
            max_wait_secs: 600,
            slide_duration_secs: 5,
            office_path: None,
            ffmpeg_path: None,
        }
    }
}

impl TranscodeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub verbosity: Verbosity,
    /// `None` logs to the console only.
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            file: Some(PathBuf::from("slidecast.log")),
        }
    }
}

impl RunConfig {
    /// Load a configuration file. Fields missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config json {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the configuration for this run.
    ///
    /// An explicit path must exist. Otherwise the app data directory and then the
    /// working directory are searched for `slidecast.json`; built-in defaults apply
    /// when neither has one.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(anyhow!("config file {} does not exist", path.display()));
            }
            return Self::from_file(path);
        }

        for candidate in config_candidates() {
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "using config file");
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.url.trim().is_empty() {
            return Err(PipelineError::Config("source url is empty".into()));
        }
        self.placement.validate()?;

        let capture = &self.capture;
        if capture.consent_wait_secs == 0
            || capture.target_wait_secs == 0
            || capture.page_load_wait_secs == 0
        {
            return Err(PipelineError::Config(
                "capture wait bounds must be at least one second".into(),
            ));
        }
        if capture.window_width == 0 || capture.window_height == 0 {
            return Err(PipelineError::Config("browser window size must be non-zero".into()));
        }

        let transcode = &self.transcode;
        if transcode.quality > 100 {
            return Err(PipelineError::Config(format!(
                "video quality must be within 0..=100, got {}",
                transcode.quality
            )));
        }
        if transcode.resolution == 0 || transcode.resolution % 2 != 0 {
            return Err(PipelineError::Config(format!(
                "video resolution must be a non-zero even number of pixels, got {}",
                transcode.resolution
            )));
        }
        if transcode.poll_interval_ms == 0 || transcode.max_wait_secs == 0 {
            return Err(PipelineError::Config(
                "poll interval and maximum wait must be non-zero".into(),
            ));
        }
        if transcode.slide_duration_secs == 0 {
            return Err(PipelineError::Config("slide duration must be non-zero".into()));
        }
        Ok(())
    }

    /// Where the video goes: the configured path, or `out.mp4` on the desktop.
    pub fn video_output(&self) -> PathBuf {
        match &self.video_path {
            Some(path) => path.clone(),
            None => default_video_dir().join(DEFAULT_VIDEO_FILE_NAME),
        }
    }
}

fn config_candidates() -> Vec<PathBuf> {
    let mut tried = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("slidecast");
        d.push(CONFIG_FILE_NAME);
        tried.push(d);
    }
    tried.push(PathBuf::from(CONFIG_FILE_NAME));
    tried
}

fn default_video_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}
