//! Capture → compose → transcode, strictly in sequence.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{self, Screenshot};
use crate::compose::{self, ComposedDocument};
use crate::config::RunConfig;
use crate::error::{CaptureError, ComposeError, PipelineError, TranscodeError};
use crate::transcode::{self, CancelFlag, VideoArtifact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Capture,
    Compose,
    Transcode,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Compose => "compose",
            Stage::Transcode => "transcode",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress notifications for a front end.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    /// The video export is still running.
    Rendering { elapsed: Duration },
    StageFinished(Stage),
}

impl PipelineEvent {
    /// Human-readable status line
    pub fn message(&self) -> String {
        match self {
            PipelineEvent::StageStarted(Stage::Capture) => "Capturing page region...".to_string(),
            PipelineEvent::StageStarted(Stage::Compose) => "Composing presentation...".to_string(),
            PipelineEvent::StageStarted(Stage::Transcode) => "Opening presentation...".to_string(),
            PipelineEvent::Rendering { elapsed } => {
                format!("Rendering video ({}s)", elapsed.as_secs())
            }
            PipelineEvent::StageFinished(stage) => format!("{stage} finished"),
        }
    }
}

/// Artifacts of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub screenshot: Screenshot,
    pub document: ComposedDocument,
    pub video: VideoArtifact,
}

/// The three stage implementations. [`LiveStages`] uses a real browser and host
/// application.
pub trait Stages {
    fn capture(&mut self, config: &RunConfig) -> Result<Screenshot, CaptureError>;

    fn compose(&mut self, config: &RunConfig) -> Result<ComposedDocument, ComposeError>;

    fn transcode(
        &mut self,
        config: &RunConfig,
        document: &Path,
        output: &Path,
        cancel: &CancelFlag,
        on_tick: &mut dyn FnMut(Duration),
    ) -> Result<VideoArtifact, TranscodeError>;
}

pub struct LiveStages;

impl Stages for LiveStages {
    fn capture(&mut self, config: &RunConfig) -> Result<Screenshot, CaptureError> {
        capture::run(&config.capture, &config.url, &config.screenshot_path)
    }

    fn compose(&mut self, config: &RunConfig) -> Result<ComposedDocument, ComposeError> {
        compose::compose(
            &config.template_path,
            &config.screenshot_path,
            &config.placement,
            &config.composed_path,
        )
    }

    fn transcode(
        &mut self,
        config: &RunConfig,
        document: &Path,
        output: &Path,
        cancel: &CancelFlag,
        on_tick: &mut dyn FnMut(Duration),
    ) -> Result<VideoArtifact, TranscodeError> {
        transcode::run(&config.transcode, document, output, cancel, on_tick)
    }
}

/// Run the whole pipeline against the real browser and host application.
pub fn run(
    config: &RunConfig,
    cancel: &CancelFlag,
    on_event: impl FnMut(PipelineEvent),
) -> Result<RunSummary, PipelineError> {
    run_with(&mut LiveStages, config, cancel, on_event)
}

/// Run the stages in order. Any failure aborts the rest; nothing is retried.
pub fn run_with<S: Stages>(
    stages: &mut S,
    config: &RunConfig,
    cancel: &CancelFlag,
    mut on_event: impl FnMut(PipelineEvent),
) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    checkpoint(cancel)?;
    on_event(PipelineEvent::StageStarted(Stage::Capture));
    let screenshot = logged(Stage::Capture, stages.capture(config))?;
    require_artifact(Stage::Capture, &config.screenshot_path)?;
    on_event(PipelineEvent::StageFinished(Stage::Capture));

    checkpoint(cancel)?;
    on_event(PipelineEvent::StageStarted(Stage::Compose));
    let document = logged(Stage::Compose, stages.compose(config))?;
    require_artifact(Stage::Compose, &document.path)?;
    on_event(PipelineEvent::StageFinished(Stage::Compose));

    checkpoint(cancel)?;
    on_event(PipelineEvent::StageStarted(Stage::Transcode));
    let output = config.video_output();
    let video = stages.transcode(
        config,
        &document.path,
        &output,
        cancel,
        &mut |elapsed: Duration| on_event(PipelineEvent::Rendering { elapsed }),
    );
    let video = match video {
        Err(TranscodeError::Cancelled) => return Err(PipelineError::Cancelled),
        other => logged(Stage::Transcode, other)?,
    };
    require_artifact(Stage::Transcode, &video.path)?;
    on_event(PipelineEvent::StageFinished(Stage::Transcode));

    Ok(RunSummary {
        screenshot,
        document,
        video,
    })
}

fn checkpoint(cancel: &CancelFlag) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        tracing::warn!("cancellation requested, stopping before next stage");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

fn logged<T, E>(stage: Stage, result: Result<T, E>) -> Result<T, PipelineError>
where
    E: Into<PipelineError>,
{
    result.map_err(|e| {
        let err = e.into();
        tracing::error!(%stage, error = %err, "stage failed");
        err
    })
}

/// The next stage only starts on a file that exists and has content.
fn require_artifact(stage: Stage, path: &Path) -> Result<(), PipelineError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => {
            tracing::error!(%stage, path = %path.display(), "stage artifact missing or empty");
            Err(PipelineError::MissingArtifact {
                stage: stage.name(),
                path: path.to_path_buf(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmuRect;

    /// Stages that write placeholder files instead of driving external programs.
    #[derive(Default)]
    struct PlaceholderStages {
        calls: Vec<Stage>,
        skip_screenshot_file: bool,
        transcode_error: Option<fn() -> TranscodeError>,
    }

    impl Stages for PlaceholderStages {
        fn capture(&mut self, config: &RunConfig) -> Result<Screenshot, CaptureError> {
            self.calls.push(Stage::Capture);
            if !self.skip_screenshot_file {
                fs::write(&config.screenshot_path, b"png").unwrap();
            }
            Ok(Screenshot {
                path: config.screenshot_path.clone(),
                width: 10,
                height: 10,
            })
        }

        fn compose(&mut self, config: &RunConfig) -> Result<ComposedDocument, ComposeError> {
            self.calls.push(Stage::Compose);
            fs::write(&config.composed_path, b"pptx").unwrap();
            Ok(ComposedDocument {
                path: config.composed_path.clone(),
                slide_index: 0,
                slide_part: "ppt/slides/slide1.xml".into(),
                media_part: "ppt/media/image1.png".into(),
                relationship_id: "rId2".into(),
                rect: EmuRect { x: 0, y: 0, cx: 1, cy: 1 },
            })
        }

        fn transcode(
            &mut self,
            _config: &RunConfig,
            _document: &Path,
            output: &Path,
            _cancel: &CancelFlag,
            on_tick: &mut dyn FnMut(Duration),
        ) -> Result<VideoArtifact, TranscodeError> {
            self.calls.push(Stage::Transcode);
            if let Some(make_error) = self.transcode_error {
                return Err(make_error());
            }
            on_tick(Duration::from_secs(1));
            fs::write(output, b"mp4").unwrap();
            Ok(VideoArtifact {
                path: output.to_path_buf(),
                resolution: 1080,
                quality: 100,
                size_bytes: 3,
            })
        }
    }

    fn config_in(dir: &Path) -> RunConfig {
        RunConfig {
            screenshot_path: dir.join("shot.png"),
            composed_path: dir.join("deck.pptx"),
            video_path: Some(dir.join("video.mp4")),
            ..RunConfig::default()
        }
    }

    #[test]
    fn stages_run_in_order_and_report_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = PlaceholderStages::default();
        let mut events = Vec::new();

        let summary = run_with(&mut stages, &config_in(dir.path()), &CancelFlag::new(), |e| events.push(e)).unwrap();

        assert_eq!(stages.calls, vec![Stage::Capture, Stage::Compose, Stage::Transcode]);
        assert_eq!(summary.video.path, dir.path().join("video.mp4"));
        assert_eq!(events.first(), Some(&PipelineEvent::StageStarted(Stage::Capture)));
        assert!(events.contains(&PipelineEvent::Rendering {
            elapsed: Duration::from_secs(1)
        }));
        assert_eq!(events.last(), Some(&PipelineEvent::StageFinished(Stage::Transcode)));
    }

    #[test]
    fn missing_screenshot_stops_before_compose() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = PlaceholderStages {
            skip_screenshot_file: true,
            ..Default::default()
        };

        let err = run_with(&mut stages, &config_in(dir.path()), &CancelFlag::new(), |_| {}).unwrap_err();

        match err {
            PipelineError::MissingArtifact { stage, path } => {
                assert_eq!(stage, "capture");
                assert_eq!(path, dir.path().join("shot.png"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stages.calls, vec![Stage::Capture]);
    }

    #[test]
    fn cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = PlaceholderStages::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = run_with(&mut stages, &config_in(dir.path()), &cancel, |_| {}).unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(stages.calls.is_empty());
    }

    #[test]
    fn transcode_cancellation_maps_to_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = PlaceholderStages {
            transcode_error: Some(|| TranscodeError::Cancelled),
            ..Default::default()
        };
        let err = run_with(&mut stages, &config_in(dir.path()), &CancelFlag::new(), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn transcode_failure_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut stages = PlaceholderStages {
            transcode_error: Some(|| TranscodeError::Timeout {
                waited: Duration::from_secs(600),
            }),
            ..Default::default()
        };
        let err = run_with(&mut stages, &config_in(dir.path()), &CancelFlag::new(), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Transcode(TranscodeError::Timeout { .. })));
        assert!(err.to_string().starts_with("transcode stage failed:"));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.url = String::new();
        let mut stages = PlaceholderStages::default();

        let err = run_with(&mut stages, &config, &CancelFlag::new(), |_| {}).unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(stages.calls.is_empty());
        assert!(!dir.path().join("shot.png").exists());
    }

    #[test]
    fn event_messages() {
        assert_eq!(
            PipelineEvent::Rendering {
                elapsed: Duration::from_millis(12_400)
            }
            .message(),
            "Rendering video (12s)"
        );
        assert_eq!(PipelineEvent::StageFinished(Stage::Compose).message(), "compose finished");
    }
}
