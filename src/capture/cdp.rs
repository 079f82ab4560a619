//! Blocking Chrome DevTools Protocol client.
//!
//! One WebSocket per page target. Commands carry increasing ids; the reply with the
//! matching id is returned and any events read in between are dropped.

use std::net::TcpStream;
use std::time::Duration;

use serde_json::Value;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::BrowserError;

/// Upper bound on waiting for a single command's reply.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CdpClient {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    ws_url: String,
}

impl CdpClient {
    pub fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (socket, _) = tungstenite::connect(ws_url).map_err(|e| BrowserError::ConnectionFailed {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream.set_read_timeout(Some(COMMAND_TIMEOUT))?;
        }
        tracing::debug!(url = ws_url, "CDP connection established");
        Ok(Self {
            socket,
            next_id: 1,
            ws_url: ws_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.ws_url
    }

    /// Send `method` and block until its reply arrives. Returns the `result` object.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id;
        self.next_id += 1;

        let text = build_message(id, method, params).to_string();
        tracing::trace!(id, method, "sending CDP command");
        self.socket
            .send(Message::Text(text))
            .map_err(|e| BrowserError::Protocol {
                detail: format!("failed to send {method}: {e}"),
            })?;

        loop {
            let msg = self.socket.read().map_err(|e| match e {
                tungstenite::Error::Io(io)
                    if matches!(
                        io.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    BrowserError::CommandTimeout {
                        method: method.to_string(),
                        duration: COMMAND_TIMEOUT,
                    }
                }
                other => BrowserError::Protocol {
                    detail: format!("failed to read reply to {method}: {other}"),
                },
            })?;

            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8(bytes).map_err(|e| BrowserError::Protocol {
                    detail: format!("non-UTF-8 binary frame: {e}"),
                })?,
                Message::Close(_) => {
                    return Err(BrowserError::Protocol {
                        detail: "DevTools socket closed".to_string(),
                    })
                }
                _ => continue,
            };

            let json: Value = serde_json::from_str(&text).map_err(|e| BrowserError::Protocol {
                detail: format!("invalid CDP JSON: {e}"),
            })?;
            match parse_reply(&json, id) {
                Some(reply) => return reply,
                None => continue,
            }
        }
    }

    pub fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

/// Build a CDP command frame.
pub fn build_message(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "id": id,
        "method": method,
        "params": params,
    })
}

/// `None` for events and replies to other commands, otherwise the reply's outcome.
pub fn parse_reply(json: &Value, id: u64) -> Option<Result<Value, BrowserError>> {
    if json.get("id").and_then(Value::as_u64) != Some(id) {
        return None;
    }
    if let Some(error) = json.get("error") {
        return Some(Err(BrowserError::Cdp {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }));
    }
    Some(Ok(json.get("result").cloned().unwrap_or(Value::Null)))
}

/// Message of a `Runtime.evaluate` / `Runtime.callFunctionOn` exception, if any.
pub fn exception_message(result: &Value) -> Option<String> {
    let details = result.get("exceptionDetails")?;
    Some(
        details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception")
            .to_string(),
    )
}
