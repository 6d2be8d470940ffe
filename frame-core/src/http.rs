//! Minimal HTTP/1.1 GET client for no_std environments
//!
//! Generic over `embedded-io-async` streams so the same code runs on an
//! `embassy-net` TCP socket and on a test double. Bodies are streamed to a
//! callback chunk by chunk, never buffered whole.

use crate::freshness::{self, Token};
use core::fmt::Write as FmtWrite;
use core::str;
use embedded_io_async::{Read, Write};
use heapless::String;

/// Header carrying the device identity
pub const DEVICE_MAC_HEADER: &str = "X-Device-MAC";
/// Header carrying the battery voltage in millivolts
pub const BATTERY_HEADER: &str = "X-Battery-Voltage";
/// Optional response header with the authoritative content token
pub const IMAGE_HASH_HEADER: &str = "X-Image-Hash";

/// HTTP client error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    /// Failed to connect to server
    Connect,
    /// Failed to write request
    Write,
    /// Failed to read response
    Read,
    /// Invalid URL format
    InvalidUrl,
    /// Response parsing error
    Parse,
    /// HTTP error status code
    Status(u16),
    /// Response or request too large
    TooLarge,
}

/// Parsed `http://` URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    /// Parse `http://host[:port][/path]`
    pub fn parse(url: &'a str) -> Result<Self, HttpError> {
        let rest = url.strip_prefix("http://").ok_or(HttpError::InvalidUrl)?;

        let (host_port, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| HttpError::InvalidUrl)?),
            None => (host_port, 80),
        };

        if host.is_empty() {
            return Err(HttpError::InvalidUrl);
        }
        Ok(Url { host, port, path })
    }
}

/// Identity sent with every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceHeaders {
    /// 12 lowercase hex digits
    pub device_id: String<12>,
    pub battery_mv: Option<u16>,
}

/// Render a MAC as lowercase hex without separators
pub fn device_id(mac: &[u8; 6]) -> String<12> {
    let mut id = String::new();
    for b in mac {
        let _ = write!(id, "{:02x}", b);
    }
    id
}

/// Build the GET request text
pub fn build_request(
    host: &str,
    path: &str,
    headers: &DeviceHeaders,
) -> Result<String<512>, HttpError> {
    let mut request: String<512> = String::new();
    write!(
        &mut request,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        path, host
    )
    .map_err(|_| HttpError::TooLarge)?;

    if !headers.device_id.is_empty() {
        write!(&mut request, "{}: {}\r\n", DEVICE_MAC_HEADER, headers.device_id)
            .map_err(|_| HttpError::TooLarge)?;
    }
    if let Some(mv) = headers.battery_mv {
        write!(&mut request, "{}: {}\r\n", BATTERY_HEADER, mv).map_err(|_| HttpError::TooLarge)?;
    }
    request.push_str("\r\n").map_err(|_| HttpError::TooLarge)?;
    Ok(request)
}

/// Response metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<usize>,
    /// Valid `X-Image-Hash` header, if sent
    pub image_hash: Option<Token>,
    pub body_read: usize,
}

impl HttpResponse {
    /// Get remaining body bytes to read
    pub fn remaining(&self) -> Option<usize> {
        self.content_length.map(|len| len.saturating_sub(self.body_read))
    }
}

/// Perform a GET and stream the body into `on_body_chunk`
///
/// `rx_buf` holds the response head, so it must fit all headers.
pub async fn get<S, F>(
    socket: &mut S,
    url: &Url<'_>,
    headers: &DeviceHeaders,
    rx_buf: &mut [u8],
    mut on_body_chunk: F,
) -> Result<HttpResponse, HttpError>
where
    S: Read + Write,
    F: FnMut(&[u8]),
{
    let request = build_request(url.host, url.path, headers)?;
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|_| HttpError::Write)?;
    socket.flush().await.map_err(|_| HttpError::Write)?;

    let mut total_read = 0;
    let headers_end = loop {
        if total_read >= rx_buf.len() {
            return Err(HttpError::TooLarge);
        }

        let n = socket
            .read(&mut rx_buf[total_read..])
            .await
            .map_err(|_| HttpError::Read)?;

        if n == 0 {
            return Err(HttpError::Read);
        }

        total_read += n;

        if let Some(pos) = find_header_end(&rx_buf[..total_read]) {
            break pos;
        }
    };

    let header_str = str::from_utf8(&rx_buf[..headers_end]).map_err(|_| HttpError::Parse)?;
    let status = parse_status(header_str)?;
    if status >= 400 {
        return Err(HttpError::Status(status));
    }

    let mut response = HttpResponse {
        status,
        content_length: parse_header(header_str, "content-length").and_then(|v| v.parse().ok()),
        image_hash: parse_header(header_str, IMAGE_HASH_HEADER).and_then(freshness::parse_token),
        body_read: 0,
    };

    let body_start = headers_end + 4;
    if total_read > body_start {
        let initial_body = &rx_buf[body_start..total_read];
        on_body_chunk(initial_body);
        response.body_read += initial_body.len();
    }

    while response.remaining() != Some(0) {
        let n = socket.read(rx_buf).await.map_err(|_| HttpError::Read)?;
        if n == 0 {
            break;
        }
        on_body_chunk(&rx_buf[..n]);
        response.body_read += n;
    }

    Ok(response)
}

/// Find the position of \r\n\r\n in the buffer
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse HTTP status code from status line
pub fn parse_status(headers: &str) -> Result<u16, HttpError> {
    // HTTP/1.1 200 OK
    let line = headers.lines().next().ok_or(HttpError::Parse)?;
    let mut parts = line.splitn(3, ' ');
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| HttpError::Parse)
        }
        _ => Err(HttpError::Parse),
    }
}

/// Parse a header value (case-insensitive)
pub fn parse_header<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Numeric IPv4 host, `None` when DNS is needed
pub fn parse_ipv4(host: &str) -> Option<core::net::Ipv4Addr> {
    host.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::convert::Infallible;
    use embassy_futures::block_on;

    /// Serves a canned response in fixed-size pieces and records the request
    struct FakeSocket {
        response: Vec<u8>,
        pos: usize,
        chunk: usize,
        sent: Vec<u8>,
    }

    impl FakeSocket {
        fn new(response: &[u8], chunk: usize) -> Self {
            Self {
                response: response.to_vec(),
                pos: 0,
                chunk,
                sent: Vec::new(),
            }
        }
    }

    impl embedded_io_async::ErrorType for FakeSocket {
        type Error = Infallible;
    }

    impl Read for FakeSocket {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(self.chunk).min(self.response.len() - self.pos);
            buf[..n].copy_from_slice(&self.response[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl Write for FakeSocket {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn headers() -> DeviceHeaders {
        DeviceHeaders {
            device_id: device_id(&[0xAA, 0xBB, 0x0C, 0x01, 0x02, 0xFF]),
            battery_mv: Some(3987),
        }
    }

    #[test]
    fn test_url_parse() {
        let url = Url::parse("http://192.168.86.34:5000/image_packed").unwrap();
        assert_eq!(url.host, "192.168.86.34");
        assert_eq!(url.port, 5000);
        assert_eq!(url.path, "/image_packed");

        let url = Url::parse("http://frames.local").unwrap();
        assert_eq!((url.port, url.path), (80, "/"));

        assert_eq!(Url::parse("https://x/y"), Err(HttpError::InvalidUrl));
        assert_eq!(Url::parse("http://x:port/y"), Err(HttpError::InvalidUrl));
    }

    #[test]
    fn test_device_id_is_lowercase_hex() {
        assert_eq!(device_id(&[0xAA, 0xBB, 0x0C, 0x01, 0x02, 0xFF]), "aabb0c0102ff");
    }

    #[test]
    fn test_request_headers() {
        let request = build_request("host", "/hash", &headers()).unwrap();
        assert_eq!(
            request,
            "GET /hash HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\
             X-Device-MAC: aabb0c0102ff\r\nX-Battery-Voltage: 3987\r\n\r\n"
        );

        let bare = build_request("host", "/", &DeviceHeaders::default()).unwrap();
        assert!(!bare.contains("X-"));
    }

    #[test]
    fn test_parse_status_and_headers() {
        let head = "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nx-image-hash: abcdef0123456789";
        assert_eq!(parse_status(head), Ok(200));
        assert_eq!(parse_header(head, "content-length"), Some("12"));
        assert_eq!(parse_header(head, IMAGE_HASH_HEADER), Some("abcdef0123456789"));
        assert_eq!(parse_header(head, "content-type"), None);
        assert_eq!(parse_status("garbage"), Err(HttpError::Parse));
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(15));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn test_get_streams_body() {
        let mut socket = FakeSocket::new(
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nX-Image-Hash: 0123456789abcdef\r\n\r\n0123456789",
            7,
        );
        let url = Url::parse("http://10.0.0.1:5000/image_packed").unwrap();
        let mut rx = [0u8; 128];
        let mut body = Vec::new();

        let response = block_on(get(&mut socket, &url, &headers(), &mut rx, |chunk| {
            body.extend_from_slice(chunk)
        }))
        .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body_read, 10);
        assert_eq!(response.image_hash.as_deref(), Some("0123456789abcdef"));
        assert_eq!(body, b"0123456789");
        assert!(socket.sent.starts_with(b"GET /image_packed HTTP/1.1\r\nHost: 10.0.0.1\r\n"));
    }

    #[test]
    fn test_get_without_length_reads_to_close() {
        let mut socket = FakeSocket::new(b"HTTP/1.1 200 OK\r\n\r\nabcdef0123456789", 5);
        let url = Url::parse("http://10.0.0.1/hash").unwrap();
        let mut rx = [0u8; 64];
        let mut body = Vec::new();

        let response = block_on(get(&mut socket, &url, &headers(), &mut rx, |chunk| {
            body.extend_from_slice(chunk)
        }))
        .unwrap();

        assert_eq!(response.content_length, None);
        assert_eq!(response.image_hash, None);
        assert_eq!(body, b"abcdef0123456789");
    }

    #[test]
    fn test_get_error_status() {
        let mut socket = FakeSocket::new(b"HTTP/1.1 404 Not Found\r\n\r\n", 64);
        let url = Url::parse("http://10.0.0.1/hash").unwrap();
        let mut rx = [0u8; 64];
        let result = block_on(get(&mut socket, &url, &headers(), &mut rx, |_| {}));
        assert_eq!(result, Err(HttpError::Status(404)));
    }

    #[test]
    fn test_get_truncated_head() {
        let mut socket = FakeSocket::new(b"HTTP/1.1 200 OK\r\nContent-", 64);
        let url = Url::parse("http://10.0.0.1/hash").unwrap();
        let mut rx = [0u8; 64];
        let result = block_on(get(&mut socket, &url, &headers(), &mut rx, |_| {}));
        assert_eq!(result, Err(HttpError::Read));
    }
}
