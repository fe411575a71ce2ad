use bytes::Bytes;

use crate::http::headers::Headers;

/// Body sent with every synthesized gateway failure.
pub const GATEWAY_ERROR_BODY: &[u8] = b"Gateway Error";

/// An HTTP status code.
///
/// Backend statuses are relayed whatever their value, so this wraps the raw
/// number; the constants cover the codes the proxy itself refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 101 Switching Protocols
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    /// 200 OK
    pub const OK: StatusCode = StatusCode(200);
    /// 204 No Content
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    /// 304 Not Modified
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    /// 502 Bad Gateway
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);

    /// Builds a status from its numeric value. Only three-digit codes are valid.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(StatusCode(code))
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use sluice::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::BAD_GATEWAY.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard reason phrase, or an empty string for codes the
    /// proxy has no phrase for.
    ///
    /// # Example
    ///
    /// ```
    /// # use sluice::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::BAD_GATEWAY.reason_phrase(), "Bad Gateway");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }

    /// Interim 1xx status, followed by another response on the same stream.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || *self == Self::NO_CONTENT || *self == Self::NOT_MODIFIED
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
///
/// Responses relayed from a backend keep the backend's status line, header
/// order and casing, and raw body bytes (chunk framing included).
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP version from the status line
    pub version: String,
    /// The HTTP status code
    pub status: StatusCode,
    /// Reason phrase from the status line
    pub reason: String,
    /// HTTP headers in the order they were received
    pub headers: Headers,
    /// Raw response body
    pub body: Bytes,
    /// The body was delimited by the backend closing its connection, so the
    /// client connection must be closed after relaying it.
    pub close_delimited: bool,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    version: String,
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
    close_delimited: bool,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status,
            reason: None,
            headers: Headers::new(),
            body: Bytes::new(),
            close_delimited: false,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Overrides the reason phrase (defaults to the standard one).
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds or replaces a header.
    ///
    /// # Arguments
    ///
    /// * `key` - Header name (case-insensitive in HTTP)
    /// * `value` - Header value
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.headers.set(&key, value);
        self
    }

    /// Replaces all headers with an already ordered list.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn close_delimited(mut self, close_delimited: bool) -> Self {
        self.close_delimited = close_delimited;
        self
    }

    /// Builds the final Response without touching the headers.
    pub fn build_raw(self) -> Response {
        Response {
            reason: self
                .reason
                .unwrap_or_else(|| self.status.reason_phrase().to_string()),
            version: self.version,
            status: self.status,
            headers: self.headers,
            body: self.body,
            close_delimited: self.close_delimited,
        }
    }

    /// Builds the final Response.
    ///
    /// Automatically adds the Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains("Content-Length") {
            self.headers
                .append("Content-Length", self.body.len().to_string());
        }
        self.build_raw()
    }
}

impl Response {
    /// The fixed 502 sent whenever forwarding to a backend fails.
    pub fn bad_gateway() -> Self {
        ResponseBuilder::new(StatusCode::BAD_GATEWAY)
            .header("Content-Type", "text/plain")
            .body(Bytes::from_static(GATEWAY_ERROR_BODY))
            .build()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Whether the connection this response travels on may carry another
    /// request afterwards.
    pub fn keep_alive(&self) -> bool {
        if self.close_delimited || self.headers.has_token("Connection", "close") {
            return false;
        }
        if self.version.eq_ignore_ascii_case("HTTP/1.0") {
            return self.headers.has_token("Connection", "keep-alive");
        }
        true
    }
}
