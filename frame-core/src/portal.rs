//! Local configuration API served in configuration mode
//!
//! ```text
//! GET  /status   config + device id as JSON
//! POST /save     form-encoded fields, applied atomically
//! POST /reset    restore defaults
//! POST /reboot   restart into normal operation
//! ```
//!
//! The handler is transport-agnostic: it takes the raw request bytes and
//! returns a response to write back on the socket.

use crate::config::{ConfigError, ConfigStore, ConfigUpdate, DeviceConfig, MAX_HOST_LEN, MAX_PATH_LEN};
use crate::http::{find_header_end, parse_header};
use crate::storage::Storage;
use core::fmt::Write;
use heapless::String;
use log::{info, warn};
use serde::Serialize;

/// Upper bound of a response body
pub const BODY_MAX: usize = 768;

/// Side effect the caller performs after sending the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalAction {
    None,
    Reboot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: String<BODY_MAX>,
    pub action: PortalAction,
}

impl PortalResponse {
    fn json(status: u16, body: &str) -> Self {
        let mut out = String::new();
        let _ = out.push_str(body);
        Self {
            status,
            body: out,
            action: PortalAction::None,
        }
    }

    fn error(status: u16, reason: &str) -> Self {
        let mut body: String<BODY_MAX> = String::new();
        let _ = write!(body, "{{\"error\":\"{}\"}}", reason);
        Self::json(status, &body)
    }

    /// Status line and headers
    pub fn head(&self) -> String<160> {
        let reason = match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        };
        let mut head = String::new();
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason,
            self.body.len()
        );
        head
    }
}

#[derive(Serialize)]
struct Status<'a> {
    device_id: &'a str,
    content_url: &'a str,
    config: &'a DeviceConfig,
}

/// True once `buf` holds the full head and `Content-Length` bytes of body
pub fn request_complete(buf: &[u8]) -> bool {
    let Some(end) = find_header_end(buf) else {
        return false;
    };
    let head = core::str::from_utf8(&buf[..end]).unwrap_or("");
    let body_len = parse_header(head, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= end + 4 + body_len
}

/// Route one request
pub fn handle<S: Storage>(
    request: &[u8],
    store: &mut ConfigStore<S>,
    device_id: &str,
) -> PortalResponse {
    let Some(end) = find_header_end(request) else {
        return PortalResponse::error(400, "incomplete_request");
    };
    let Ok(head) = core::str::from_utf8(&request[..end]) else {
        return PortalResponse::error(400, "bad_request");
    };
    let body = &request[end + 4..];

    let mut line = head.lines().next().unwrap_or("").split(' ');
    let (method, path) = (line.next().unwrap_or(""), line.next().unwrap_or(""));
    info!("Portal: {} {}", method, path);

    match (method, path) {
        ("GET", "/status") => status(store.config(), device_id),
        ("POST", "/save") => save(body, store),
        ("POST", "/reset") => match store.reset_to_defaults() {
            Ok(()) => PortalResponse::json(200, "{\"ok\":true}"),
            Err(e) => config_error(e),
        },
        ("POST", "/reboot") => PortalResponse {
            action: PortalAction::Reboot,
            ..PortalResponse::json(200, "{\"ok\":true}")
        },
        (_, "/status" | "/save" | "/reset" | "/reboot") => {
            PortalResponse::error(405, "method_not_allowed")
        }
        _ => PortalResponse::error(404, "not_found"),
    }
}

fn status(config: &DeviceConfig, device_id: &str) -> PortalResponse {
    let url = config.content_url();
    let status = Status {
        device_id,
        content_url: &url,
        config,
    };
    match serde_json_core::to_string::<_, BODY_MAX>(&status) {
        Ok(body) => PortalResponse::json(200, &body),
        Err(_) => PortalResponse::error(500, "status_too_large"),
    }
}

fn save<S: Storage>(body: &[u8], store: &mut ConfigStore<S>) -> PortalResponse {
    let Ok(body) = core::str::from_utf8(body) else {
        return PortalResponse::error(400, "bad_encoding");
    };
    let form = match FormValues::parse(body) {
        Ok(form) => form,
        Err(e) => return config_error(e),
    };

    match store.apply_all(&form.as_update()) {
        Ok(()) => PortalResponse::json(200, "{\"ok\":true}"),
        Err(e) => config_error(e),
    }
}

fn config_error(e: ConfigError) -> PortalResponse {
    warn!("Portal: rejected ({:?})", e);
    let reason = match e {
        ConfigError::InvalidHost => "invalid_host",
        ConfigError::InvalidPort => "invalid_port",
        ConfigError::InvalidPath => "invalid_path",
        ConfigError::InvalidInterval => "invalid_interval",
        ConfigError::InvalidHour => "invalid_hour",
        ConfigError::InvalidTimezone => "invalid_timezone",
        ConfigError::Storage(_) => return PortalResponse::error(500, "storage"),
    };
    PortalResponse::error(400, reason)
}

/// Decoded `application/x-www-form-urlencoded` body. Empty values are absent.
#[derive(Debug, Default)]
struct FormValues {
    server_host: Option<String<MAX_HOST_LEN>>,
    content_path: Option<String<MAX_PATH_LEN>>,
    server_port: Option<i64>,
    refresh_interval_minutes: Option<i64>,
    active_start_hour: Option<i64>,
    active_end_hour: Option<i64>,
    timezone_offset_minutes: Option<i64>,
}

impl FormValues {
    fn parse(body: &str) -> Result<Self, ConfigError> {
        let mut form = FormValues::default();

        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            if raw.is_empty() {
                continue;
            }
            match key {
                "server_host" => {
                    form.server_host = Some(decode(raw).ok_or(ConfigError::InvalidHost)?)
                }
                "content_path" => {
                    form.content_path = Some(decode(raw).ok_or(ConfigError::InvalidPath)?)
                }
                "server_port" => form.server_port = Some(number(raw, ConfigError::InvalidPort)?),
                "refresh_interval_minutes" => {
                    form.refresh_interval_minutes = Some(number(raw, ConfigError::InvalidInterval)?)
                }
                "active_start_hour" => {
                    form.active_start_hour = Some(number(raw, ConfigError::InvalidHour)?)
                }
                "active_end_hour" => {
                    form.active_end_hour = Some(number(raw, ConfigError::InvalidHour)?)
                }
                "timezone_offset_minutes" => {
                    form.timezone_offset_minutes = Some(number(raw, ConfigError::InvalidTimezone)?)
                }
                other => warn!("Portal: ignoring unknown field {}", other),
            }
        }

        Ok(form)
    }

    fn as_update(&self) -> ConfigUpdate<'_> {
        ConfigUpdate {
            server_host: self.server_host.as_deref(),
            server_port: self.server_port,
            content_path: self.content_path.as_deref(),
            refresh_interval_minutes: self.refresh_interval_minutes,
            active_start_hour: self.active_start_hour,
            active_end_hour: self.active_end_hour,
            timezone_offset_minutes: self.timezone_offset_minutes,
        }
    }
}

fn number(raw: &str, err: ConfigError) -> Result<i64, ConfigError> {
    let decoded: String<16> = decode(raw).ok_or(err)?;
    decoded.trim().parse().map_err(|_| err)
}

/// Percent-decode a form value (`+` is a space). `None` on bad escapes or overflow.
fn decode<const N: usize>(raw: &str) -> Option<String<N>> {
    let mut bytes: heapless::Vec<u8, N> = heapless::Vec::new();
    let mut iter = raw.bytes();
    while let Some(b) = iter.next() {
        let byte = match b {
            b'+' => b' ',
            b'%' => {
                let hi = hex(iter.next()?)?;
                let lo = hex(iter.next()?)?;
                (hi << 4) | lo
            }
            b => b,
        };
        bytes.push(byte).ok()?;
    }
    String::from_utf8(bytes).ok()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::MemoryStorage;
    use alloc::format;

    fn store() -> ConfigStore<MemoryStorage> {
        ConfigStore::load(MemoryStorage::default())
    }

    fn post(path: &str, body: &str) -> alloc::vec::Vec<u8> {
        format!(
            "POST {} HTTP/1.1\r\nHost: frame\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn test_status() {
        let mut store = store();
        let response = handle(b"GET /status HTTP/1.1\r\nHost: frame\r\n\r\n", &mut store, "aabbccddeeff");
        assert_eq!(response.status, 200);
        assert!(response.body.starts_with("{\"device_id\":\"aabbccddeeff\""));
        assert!(response.body.contains("\"content_url\":\"http://192.168.86.34:5000/image_packed\""));
        assert!(response.body.contains("\"refresh_interval_minutes\":15"));
    }

    #[test]
    fn test_save_applies_form() {
        let mut store = store();
        let response = handle(
            &post("/save", "server_host=frames.local&content_path=%2Fimg%20v2&refresh_interval_minutes=30&active_start_hour=&timezone_offset_minutes=-60"),
            &mut store,
            "id",
        );
        assert_eq!(response.status, 200, "{}", response.body);
        let config = store.config();
        assert_eq!(config.server_host, "frames.local");
        assert_eq!(config.content_path, "/img v2");
        assert_eq!(config.refresh_interval_minutes, 30);
        assert_eq!(config.active_start_hour, 8);
        assert_eq!(config.timezone_offset_minutes, -60);
    }

    #[test]
    fn test_save_rejects_atomically() {
        let mut store = store();
        let response = handle(
            &post("/save", "server_host=frames.local&active_end_hour=24"),
            &mut store,
            "id",
        );
        assert_eq!(response.status, 400);
        assert_eq!(response.body, "{\"error\":\"invalid_hour\"}");
        assert_eq!(store.config(), &DeviceConfig::default());

        let response = handle(&post("/save", "server_port=abc"), &mut store, "id");
        assert_eq!(response.body, "{\"error\":\"invalid_port\"}");
    }

    #[test]
    fn test_reset_and_reboot() {
        let mut store = store();
        store.set_refresh_interval(90).unwrap();

        let response = handle(&post("/reset", ""), &mut store, "id");
        assert_eq!(response.status, 200);
        assert_eq!(store.config().refresh_interval_minutes, 15);

        let response = handle(&post("/reboot", ""), &mut store, "id");
        assert_eq!(response.action, PortalAction::Reboot);
    }

    #[test]
    fn test_unknown_routes() {
        let mut store = store();
        assert_eq!(handle(b"GET / HTTP/1.1\r\n\r\n", &mut store, "id").status, 404);
        assert_eq!(handle(b"GET /save HTTP/1.1\r\n\r\n", &mut store, "id").status, 405);
        assert_eq!(handle(b"GET /status HTTP/1.1\r\n", &mut store, "id").status, 400);
    }

    #[test]
    fn test_request_complete() {
        let full = post("/save", "server_port=80");
        assert!(request_complete(&full));
        assert!(!request_complete(&full[..full.len() - 1]));
        assert!(request_complete(b"GET /status HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn test_response_head() {
        let response = PortalResponse::json(200, "{}");
        assert_eq!(
            response.head(),
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode::<16>("a+b%2Fc").as_deref(), Some("a b/c"));
        assert_eq!(decode::<16>("%zz"), None);
        assert_eq!(decode::<4>("toolong"), None);
    }
}
