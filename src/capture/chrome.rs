//! Chrome/Chromium as a [`BrowserDriver`].
//!
//! The browser runs as a child process with a throwaway profile and a DevTools port
//! on loopback. The session owns that process: `close()` shuts it down, and dropping
//! an unclosed session kills it.

use std::env;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::cdp::{exception_message, CdpClient};
use super::{BrowserDriver, Element, Selector};
use crate::config::CaptureSettings;
use crate::error::{BrowserError, CaptureError};
use crate::scratch::ScratchDir;

/// Interval between DOM checks while waiting for an element or page load.
const POLL_STEP: Duration = Duration::from_millis(250);
/// How long the DevTools endpoint may take to come up after spawn.
const LAUNCH_WAIT: Duration = Duration::from_secs(15);
/// Grace period for `Browser.close` before the process is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub const BROWSER_ENV_VAR: &str = "SLIDECAST_BROWSER";

const ELEMENT_GEOMETRY_JS: &str = r#"function(scroll) {
    if (scroll) { this.scrollIntoView({ block: 'center', inline: 'center' }); }
    const r = this.getBoundingClientRect();
    const s = window.getComputedStyle(this);
    return {
        x: r.left,
        y: r.top,
        width: r.width,
        height: r.height,
        scrollX: window.scrollX,
        scrollY: window.scrollY,
        viewportWidth: window.innerWidth,
        viewportHeight: window.innerHeight,
        visible: s.visibility !== 'hidden' && s.display !== 'none' && r.width > 0 && r.height > 0,
        enabled: !this.disabled
    };
}"#;

/// Layout of an element as reported by `getBoundingClientRect`, in CSS pixels
/// relative to the viewport, plus the scroll offsets needed for page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementGeometry {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn in_viewport(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= self.viewport_width
            && self.y + self.height <= self.viewport_height
    }

    pub fn fits_viewport(&self) -> bool {
        self.width <= self.viewport_width && self.height <= self.viewport_height
    }

    /// `Page.captureScreenshot` clip in document coordinates.
    pub fn clip(&self) -> Value {
        json!({
            "x": self.x + self.scroll_x,
            "y": self.y + self.scroll_y,
            "width": self.width,
            "height": self.height,
            "scale": 1.0,
        })
    }
}

pub struct ChromeSession {
    child: Option<Child>,
    client: Option<CdpClient>,
    page_load_wait: Duration,
    _profile: ScratchDir,
}

impl ChromeSession {
    /// Start a browser and attach to its first page.
    pub fn launch(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let launch_error = |reason: String| CaptureError::Launch { reason };

        let profile = ScratchDir::new("browser").map_err(|e| launch_error(format!("profile directory: {e}")))?;
        let port = pick_ephemeral_port().map_err(|e| launch_error(format!("no free DevTools port: {e}")))?;
        let args = launch_args(settings, port, profile.path());

        let mut last_error = None;
        let mut child = None;
        for candidate in browser_candidates(settings.browser_path.as_deref()) {
            let spawned = Command::new(&candidate)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match spawned {
                Ok(proc) => {
                    tracing::info!(
                        binary = %candidate.display(),
                        port,
                        headless = settings.headless,
                        "browser launched"
                    );
                    child = Some(proc);
                    break;
                }
                Err(e) => last_error = Some(format!("{}: {e}", candidate.display())),
            }
        }
        let mut child = child.ok_or_else(|| {
            launch_error(format!(
                "no usable Chrome/Chromium binary ({})",
                last_error.unwrap_or_else(|| "no candidates".to_string())
            ))
        })?;

        let client = wait_for_page_target(port, LAUNCH_WAIT)
            .and_then(|ws_url| CdpClient::connect(&ws_url).map_err(|e| launch_error(e.to_string())));
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Self {
            child: Some(child),
            client: Some(client),
            page_load_wait: settings.page_load_wait(),
            _profile: profile,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let client = self.client.as_mut().ok_or_else(|| BrowserError::Protocol {
            detail: "browser session already closed".to_string(),
        })?;
        client.call(method, params)
    }

    fn evaluate(&mut self, expression: &str, by_value: bool) -> Result<Value, BrowserError> {
        let result = self.call(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": by_value,
            }),
        )?;
        if let Some(message) = exception_message(&result) {
            return Err(BrowserError::JsException { message });
        }
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Run `function` with the element bound to `this`; returns the value it produced.
    fn call_on(&mut self, element: &Element, function: &str, args: Value) -> Result<Value, BrowserError> {
        let result = self.call(
            "Runtime.callFunctionOn",
            json!({
                "objectId": element.handle,
                "functionDeclaration": function,
                "arguments": args,
                "returnByValue": true,
            }),
        )?;
        if let Some(message) = exception_message(&result) {
            return Err(BrowserError::JsException { message });
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn resolve(&mut self, selector: &Selector) -> Result<Option<Element>, BrowserError> {
        let object = self.evaluate(&selector.to_js(), false)?;
        Ok(remote_object_id(&object).map(|handle| Element {
            selector: selector.clone(),
            handle,
        }))
    }

    fn geometry(&mut self, element: &Element, scroll: bool) -> Result<ElementGeometry, BrowserError> {
        let value = self.call_on(element, ELEMENT_GEOMETRY_JS, json!([{ "value": scroll }]))?;
        serde_json::from_value(value).map_err(|e| BrowserError::Protocol {
            detail: format!("unexpected element geometry: {e}"),
        })
    }

    fn mouse(&mut self, kind: &str, x: f64, y: f64) -> Result<(), BrowserError> {
        let mut params = json!({ "type": kind, "x": x, "y": y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(1);
        }
        self.call("Input.dispatchMouseEvent", params)?;
        Ok(())
    }

    fn wait_for(&mut self, selector: &Selector, timeout: Duration, clickable: bool) -> Result<Element, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.resolve(selector) {
                Ok(Some(element)) if !clickable => return Ok(element),
                Ok(Some(element)) => {
                    let geometry = self.geometry(&element, false)?;
                    if geometry.visible && geometry.enabled {
                        return Ok(element);
                    }
                }
                Ok(None) => {}
                // The document may be replaced while we poll.
                Err(BrowserError::Cdp { message, .. }) => {
                    tracing::trace!(%selector, error = %message, "lookup failed, retrying");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::WaitTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            thread::sleep(POLL_STEP);
        }
    }

    fn wait_for_load(&mut self) -> Result<(), BrowserError> {
        let deadline = Instant::now() + self.page_load_wait;
        loop {
            match self.evaluate("document.readyState", true) {
                Ok(state) if state.get("value").and_then(Value::as_str) == Some("complete") => return Ok(()),
                Ok(_) | Err(BrowserError::Cdp { .. }) | Err(BrowserError::JsException { .. }) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::PageLoadTimeout {
                    duration: self.page_load_wait,
                });
            }
            thread::sleep(POLL_STEP);
        }
    }

    fn shutdown(&mut self) -> Result<(), BrowserError> {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.call("Browser.close", json!({})) {
                tracing::debug!(error = %e, "Browser.close not acknowledged");
            }
            client.close();
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        tracing::warn!("browser ignored shutdown request, killing it");
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

impl BrowserDriver for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let result = self.call("Page.navigate", json!({ "url": url }))?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::NavigationFailed {
                reason: error_text.to_string(),
            });
        }
        self.wait_for_load()
    }

    fn wait_for_clickable(&mut self, selector: &Selector, timeout: Duration) -> Result<Element, BrowserError> {
        self.wait_for(selector, timeout, true)
    }

    fn wait_for_present(&mut self, selector: &Selector, timeout: Duration) -> Result<Element, BrowserError> {
        self.wait_for(selector, timeout, false)
    }

    fn find(&mut self, selector: &Selector) -> Result<Element, BrowserError> {
        self.resolve(selector)?.ok_or_else(|| BrowserError::ElementNotFound {
            selector: selector.to_string(),
        })
    }

    fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        let geometry = self.geometry(element, true)?;
        if !geometry.visible {
            return Err(BrowserError::NotInteractable {
                reason: format!("{} is not visible", element.selector),
            });
        }
        let (x, y) = geometry.center();
        self.mouse("mouseMoved", x, y)?;
        self.mouse("mousePressed", x, y)?;
        self.mouse("mouseReleased", x, y)
    }

    fn hover(&mut self, element: &Element) -> Result<(), BrowserError> {
        let geometry = self.geometry(element, true)?;
        if geometry.width <= 0.0 || geometry.height <= 0.0 {
            return Err(BrowserError::NotInteractable {
                reason: format!(
                    "{} has zero size {}x{}",
                    element.selector, geometry.width, geometry.height
                ),
            });
        }
        let (x, y) = geometry.center();
        self.mouse("mouseMoved", x, y)
    }

    fn screenshot_region(&mut self, element: &Element) -> Result<Vec<u8>, BrowserError> {
        // Scrolling can drop the hover overlay, so only scroll when the region is cut off.
        let mut geometry = self.geometry(element, false)?;
        if !geometry.in_viewport() {
            geometry = self.geometry(element, true)?;
        }
        if geometry.width <= 0.0 || geometry.height <= 0.0 {
            return Err(BrowserError::NotInteractable {
                reason: format!("{} has no rendered area", element.selector),
            });
        }
        let result = self.call(
            "Page.captureScreenshot",
            json!({
                "format": "png",
                "clip": geometry.clip(),
                "captureBeyondViewport": !geometry.fits_viewport(),
            }),
        )?;
        let data = result.get("data").and_then(Value::as_str).ok_or_else(|| BrowserError::Protocol {
            detail: "Page.captureScreenshot returned no data".to_string(),
        })?;
        B64.decode(data).map_err(|e| BrowserError::Protocol {
            detail: format!("screenshot is not valid base64: {e}"),
        })
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        self.shutdown()
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Command-line flags for a fresh, automatable browser instance.
pub fn launch_args(settings: &CaptureSettings, port: u16, profile: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        "--remote-debugging-address=127.0.0.1".to_string(),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-popup-blocking".to_string(),
        "--start-maximized".to_string(),
        format!("--window-size={},{}", settings.window_width, settings.window_height),
    ];
    if settings.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    if settings.no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Binaries to try, most specific first.
pub fn browser_candidates(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(BROWSER_ENV_VAR) {
        if !env_path.trim().is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    candidates.extend(
        platform_candidate_paths()
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.exists()),
    );
    candidates.extend(
        ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"]
            .iter()
            .map(PathBuf::from),
    );
    candidates
}

fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

fn pick_ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn wait_for_page_target(port: u16, timeout: Duration) -> Result<String, CaptureError> {
    let url = format!("http://127.0.0.1:{port}/json/list");
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if let Ok(targets) = resp.json::<Value>() {
                if let Some(ws) = pick_page_target(&targets) {
                    return Ok(ws);
                }
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    Err(CaptureError::Launch {
        reason: format!("DevTools endpoint {url} did not offer a page within {timeout:?}"),
    })
}

/// WebSocket URL of the first page target in a `/json/list` reply.
pub fn pick_page_target(targets: &Value) -> Option<String> {
    targets.as_array()?.iter().find_map(|target| {
        if target.get("type").and_then(Value::as_str) != Some("page") {
            return None;
        }
        target
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// `objectId` of a remote object, or `None` when the expression produced null.
pub fn remote_object_id(object: &Value) -> Option<String> {
    if object.get("subtype").and_then(Value::as_str) == Some("null") {
        return None;
    }
    object.get("objectId").and_then(Value::as_str).map(str::to_string)
}
