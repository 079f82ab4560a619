//! # slidecast - web capture to slide video
//!
//! `slidecast` turns a live web page into a short video in three stages:
//!
//! - **capture** drives Chrome/Chromium to a page, dismisses the consent dialog when
//!   one appears, hovers the element that reveals an overlay and saves a PNG of the
//!   target region
//! - **compose** inserts that PNG into the first slide of a `.pptx` template at a fixed
//!   rectangle and writes a new presentation
//! - **transcode** has a host application (LibreOffice with ffmpeg) render the slide
//!   to an MP4, polling the export with a bounded, cancellable wait
//!
//! Every external program is owned by a scoped session that is released on all exit
//! paths, and each stage's artifact is checked before the next stage starts.
//!
//! ## Example
//!
//! ```no_run
//! use slidecast::{pipeline, CancelFlag, RunConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::load(None)?;
//! let cancel = CancelFlag::new();
//! let summary = pipeline::run(&config, &cancel, |event| println!("{}", event.message()))?;
//! println!("video written to {}", summary.video.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Composing only
//!
//! ```no_run
//! use slidecast::compose;
//! use slidecast::config::Placement;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = compose::compose(
//!     Path::new("template.pptx"),
//!     Path::new("weather_screenshot.png"),
//!     &Placement::default(),
//!     Path::new("updated_presentation.pptx"),
//! )?;
//! let summary = compose::inspect(&doc.path)?;
//! assert_eq!(summary.pictures.last().map(|p| p.rect), Some(doc.rect));
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod compose;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod scratch;
pub mod transcode;

pub use capture::{BrowserDriver, Screenshot, Selector};
pub use compose::{ComposedDocument, SlideSummary};
pub use config::{Placement, RunConfig};
pub use error::{BrowserError, CaptureError, ComposeError, PipelineError, TranscodeError};
pub use pipeline::{PipelineEvent, RunSummary, Stage};
pub use transcode::{CancelFlag, HostApplication, VideoArtifact};
