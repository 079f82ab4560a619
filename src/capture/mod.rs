//! Capture stage: load the page, clear the consent dialog, reveal the overlay and
//! save a bitmap of the target region.
//!
//! The stage talks to the browser only through [`BrowserDriver`]. The production
//! driver is [`ChromeSession`], which launches Chrome/Chromium and speaks the
//! DevTools protocol over a blocking WebSocket.

pub mod cdp;
pub mod chrome;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CaptureSettings;
use crate::error::{BrowserError, CaptureError};

pub use chrome::ChromeSession;

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector, e.g. `.today.table`.
    Css(String),
    /// First element whose own text contains this string.
    Text(String),
}

impl Selector {
    /// JavaScript expression evaluating to the matched element or `null`.
    pub fn to_js(&self) -> String {
        match self {
            Selector::Css(css) => {
                format!("document.querySelector({})", Value::String(css.clone()))
            }
            Selector::Text(text) => {
                let xpath = format!("//*[contains(text(), {})]", xpath_literal(text));
                format!(
                    "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                    Value::String(xpath)
                )
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "css `{css}`"),
            Selector::Text(text) => write!(f, "text `{text}`"),
        }
    }
}

/// Quote a string as an XPath 1.0 literal. XPath has no escapes, so a value holding
/// both quote kinds is split with `concat()`.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// A located element. `handle` is driver specific (a CDP remote object id for Chrome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub selector: Selector,
    pub handle: String,
}

/// Narrow browser interface the capture protocol needs.
pub trait BrowserDriver {
    /// Load `url` and wait for the document to finish loading.
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait up to `timeout` for a visible, enabled element.
    /// Fails with [`BrowserError::WaitTimeout`] when the bound runs out.
    fn wait_for_clickable(&mut self, selector: &Selector, timeout: Duration) -> Result<Element, BrowserError>;

    /// Wait up to `timeout` for the element to exist in the DOM.
    /// Fails with [`BrowserError::WaitTimeout`] when the bound runs out.
    fn wait_for_present(&mut self, selector: &Selector, timeout: Duration) -> Result<Element, BrowserError>;

    /// Look the element up once. Fails with [`BrowserError::ElementNotFound`].
    fn find(&mut self, selector: &Selector) -> Result<Element, BrowserError>;

    fn click(&mut self, element: &Element) -> Result<(), BrowserError>;

    /// Move the pointer over the element without clicking.
    fn hover(&mut self, element: &Element) -> Result<(), BrowserError>;

    /// PNG bytes of exactly the element's rendered bounds.
    fn screenshot_region(&mut self, element: &Element) -> Result<Vec<u8>, BrowserError>;

    /// Release the session. Called once, on every exit path.
    fn close(&mut self) -> Result<(), BrowserError>;
}

/// What happened at the consent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentOutcome {
    Dismissed,
    /// No consent control within the wait bound; the page is used as is.
    NotPresent,
    /// No consent selector configured.
    Skipped,
}

/// The bitmap written by a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Launch a browser and run the capture protocol in it.
pub fn run(settings: &CaptureSettings, url: &str, path: &Path) -> Result<Screenshot, CaptureError> {
    let session = ChromeSession::launch(settings)?;
    capture(session, settings, url, path)
}

/// Run the capture protocol with `driver` and release it afterwards, whether or not
/// the protocol succeeded. A failed capture may leave a stale file at `path`.
pub fn capture<D: BrowserDriver>(
    mut driver: D,
    settings: &CaptureSettings,
    url: &str,
    path: &Path,
) -> Result<Screenshot, CaptureError> {
    let result = drive(&mut driver, settings, url, path);
    if let Err(e) = driver.close() {
        tracing::warn!(error = %e, "browser session did not close cleanly");
    } else {
        tracing::debug!("browser session closed");
    }
    result
}

fn drive<D: BrowserDriver>(
    driver: &mut D,
    settings: &CaptureSettings,
    url: &str,
    path: &Path,
) -> Result<Screenshot, CaptureError> {
    tracing::info!(url, "loading page");
    driver.navigate(url)?;

    let consent = match &settings.consent {
        Some(selector) => dismiss_consent(driver, selector, settings.consent_wait())?,
        None => ConsentOutcome::Skipped,
    };
    tracing::debug!(?consent, "consent step finished");

    let target_wait = settings.target_wait();
    let target = match driver.wait_for_present(&settings.target, target_wait) {
        Ok(element) => element,
        Err(BrowserError::WaitTimeout { .. }) => {
            return Err(CaptureError::ElementTimeout {
                selector: settings.target.to_string(),
                timeout: target_wait,
            })
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(selector = %settings.target, "target region present");

    let hover_error = |source| CaptureError::HoverTarget {
        selector: settings.hover.to_string(),
        source,
    };
    let trigger = driver.find(&settings.hover).map_err(hover_error)?;
    driver.hover(&trigger).map_err(hover_error)?;
    tracing::debug!(selector = %settings.hover, "hovering overlay trigger");

    let png = driver.screenshot_region(&target)?;
    let screenshot = save_screenshot(&png, path)?;
    tracing::info!(
        path = %screenshot.path.display(),
        width = screenshot.width,
        height = screenshot.height,
        "screenshot saved"
    );
    Ok(screenshot)
}

fn dismiss_consent<D: BrowserDriver>(
    driver: &mut D,
    selector: &Selector,
    wait: Duration,
) -> Result<ConsentOutcome, CaptureError> {
    match driver.wait_for_clickable(selector, wait) {
        Ok(button) => {
            driver.click(&button)?;
            tracing::info!(%selector, "consent dialog dismissed");
            Ok(ConsentOutcome::Dismissed)
        }
        Err(BrowserError::WaitTimeout { .. }) => {
            let skipped = CaptureError::ConsentNotFound {
                selector: selector.to_string(),
                timeout: wait,
            };
            tracing::info!(reason = %skipped, "continuing without consent dismissal");
            Ok(ConsentOutcome::NotPresent)
        }
        Err(e) => Err(e.into()),
    }
}

/// Check the bitmap decodes to a non-empty image, then write it over `path`.
fn save_screenshot(png: &[u8], path: &Path) -> Result<Screenshot, CaptureError> {
    let failure = |reason: String| CaptureError::Screenshot {
        path: path.to_path_buf(),
        reason,
    };
    if png.is_empty() {
        return Err(failure("browser returned an empty bitmap".into()));
    }
    let image = image::load_from_memory(png).map_err(|e| failure(format!("undecodable bitmap: {e}")))?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(failure(format!("bitmap has zero size {width}x{height}")));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| failure(e.to_string()))?;
    }
    fs::write(path, png).map_err(|e| failure(e.to_string()))?;
    Ok(Screenshot {
        path: path.to_path_buf(),
        width,
        height,
    })
}
