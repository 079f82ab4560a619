use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use slidecast::config::{LogSettings, Verbosity};
use slidecast::{logging, pipeline, CancelFlag, PipelineEvent, RunConfig, RunSummary};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Capture a web page region, place it on a slide and render the slide to video."
)]
struct Args {
    /// Configuration file (default: slidecast.json in the app data dir or working dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to capture
    #[arg(long)]
    url: Option<String>,

    /// Where to write the screenshot
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Presentation template whose first slide receives the screenshot
    #[arg(long)]
    template: Option<PathBuf>,

    /// Where to write the composed presentation
    #[arg(long)]
    composed: Option<PathBuf>,

    /// Where to write the video (default: out.mp4 on the desktop)
    #[arg(long)]
    video: Option<PathBuf>,

    /// Run the browser without a window
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Disable the browser sandbox (containers, root sessions)
    #[arg(long, default_value_t = false)]
    no_sandbox: bool,

    /// Chrome/Chromium executable
    #[arg(long)]
    browser: Option<PathBuf>,

    /// Vertical resolution of the video in pixels
    #[arg(long)]
    resolution: Option<u32>,

    /// Video quality from 0 to 100
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// Give up on the video export after this many seconds
    #[arg(long)]
    max_wait: Option<u64>,

    /// Log debug output
    #[arg(long, short, default_value_t = false, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, short, default_value_t = false)]
    quiet: bool,

    /// Append log lines to this file
    #[arg(long, conflicts_with = "no_log_file")]
    log_file: Option<PathBuf>,

    /// Log to the console only
    #[arg(long, default_value_t = false)]
    no_log_file: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

impl Args {
    /// Flags given on the command line win over the configuration file.
    fn apply(&self, config: &mut RunConfig) {
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(path) = &self.screenshot {
            config.screenshot_path = path.clone();
        }
        if let Some(path) = &self.template {
            config.template_path = path.clone();
        }
        if let Some(path) = &self.composed {
            config.composed_path = path.clone();
        }
        if let Some(path) = &self.video {
            config.video_path = Some(path.clone());
        }
        if self.headless {
            config.capture.headless = true;
        }
        if self.no_sandbox {
            config.capture.no_sandbox = true;
        }
        if let Some(path) = &self.browser {
            config.capture.browser_path = Some(path.clone());
        }
        if let Some(resolution) = self.resolution {
            config.transcode.resolution = resolution;
        }
        if let Some(quality) = self.quality {
            config.transcode.quality = quality;
        }
        if let Some(secs) = self.max_wait {
            config.transcode.max_wait_secs = secs;
        }
        if self.verbose {
            config.log.verbosity = Verbosity::Verbose;
        } else if self.quiet {
            config.log.verbosity = Verbosity::Quiet;
        }
        if self.no_log_file {
            config.log.file = None;
        } else if let Some(path) = &self.log_file {
            config.log.file = Some(path.clone());
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match RunConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init(&LogSettings {
                file: None,
                ..LogSettings::default()
            });
            tracing::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    if args.print_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let spinner = if config.log.verbosity == Verbosity::Quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    if let Err(e) = logging::init_with_console(&config.log, SpinnerConsole(spinner.clone())) {
        eprintln!("warning: {e:#}; logging to the console only");
        let _ = logging::init_with_console(
            &LogSettings {
                file: None,
                ..config.log.clone()
            },
            SpinnerConsole(spinner.clone()),
        );
    }

    match run(&config, &spinner) {
        Ok(summary) => {
            println!("\nScreenshot:   {}", summary.screenshot.path.display());
            println!("Presentation: {}", summary.document.path.display());
            println!("Video:        {}", summary.video.path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("run failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Stderr for log lines. The spinner is cleared while a line is written.
struct SpinnerConsole(ProgressBar);

struct SpinnerLine(ProgressBar);

impl<'a> MakeWriter<'a> for SpinnerConsole {
    type Writer = SpinnerLine;

    fn make_writer(&'a self) -> Self::Writer {
        SpinnerLine(self.0.clone())
    }
}

impl Write for SpinnerLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn run(config: &RunConfig, spinner: &ProgressBar) -> Result<RunSummary> {
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, finishing cleanup");
        handler_flag.cancel();
    })
    .context("installing Ctrl-C handler")?;

    if !spinner.is_hidden() {
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
    }

    let result = pipeline::run(config, &cancel, |event: PipelineEvent| {
        spinner.set_message(event.message());
    });

    match &result {
        Ok(_) => spinner.finish_with_message("Done"),
        Err(_) => spinner.abandon_with_message("Failed"),
    }
    result.context("pipeline did not complete")
}
