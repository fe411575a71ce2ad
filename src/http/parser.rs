use bytes::Bytes;

use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;

/// Largest header block accepted from either side.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidStatusLine,
    InvalidChunk,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

/// Status line and headers of a backend response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
}

/// How the end of a message body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_limited(buf, usize::MAX)
}

/// Parses one request, rejecting bodies larger than `max_body` bytes.
pub fn parse_http_request_limited(
    buf: &[u8],
    max_body: usize,
) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = find_headers_end(buf)?;
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let headers = parse_headers(lines)?;

    let body_len = match request_framing(&headers)? {
        BodyFraming::Length(n) => {
            if n > max_body {
                return Err(ParseError::BodyTooLarge);
            }
            if body_bytes.len() < n {
                return Err(ParseError::Incomplete);
            }
            n
        }
        BodyFraming::Chunked => match chunked_body_len(body_bytes)? {
            Some(n) if n > max_body => return Err(ParseError::BodyTooLarge),
            Some(n) => n,
            None if body_bytes.len() > max_body => return Err(ParseError::BodyTooLarge),
            None => return Err(ParseError::Incomplete),
        },
        _ => 0,
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body: Bytes::copy_from_slice(&body_bytes[..body_len]),
    };

    Ok((request, headers_end + 4 + body_len))
}

/// Parses a response status line and headers. Returns the head and the number
/// of bytes consumed; the body is framed separately with [`response_framing`].
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = find_headers_end(buf)?;
    let headers_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidStatusLine)?;

    let mut lines = headers_str.split("\r\n");
    let status_line = lines.next().ok_or(ParseError::InvalidStatusLine)?;

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidStatusLine);
    }
    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or(ParseError::InvalidStatusLine)?;
    let reason = parts.next().unwrap_or("");

    let head = ResponseHead {
        version: version.to_string(),
        status,
        reason: reason.to_string(),
        headers: parse_headers(lines)?,
    };

    Ok((head, headers_end + 4))
}

/// Body framing of a request: chunked, Content-Length, or none.
///
/// A request carrying both Transfer-Encoding and Content-Length is rejected.
pub fn request_framing(headers: &Headers) -> Result<BodyFraming, ParseError> {
    if headers.contains("Transfer-Encoding") {
        if headers.contains("Content-Length") {
            return Err(ParseError::InvalidRequest);
        }
        return if is_chunked(headers) {
            Ok(BodyFraming::Chunked)
        } else {
            Err(ParseError::InvalidRequest)
        };
    }
    match content_length(headers)? {
        Some(n) => Ok(BodyFraming::Length(n)),
        None => Ok(BodyFraming::Empty),
    }
}

/// Body framing of a response to a request that was (or was not) HEAD.
pub fn response_framing(head: &ResponseHead, head_request: bool) -> Result<BodyFraming, ParseError> {
    if head_request || head.status.forbids_body() {
        return Ok(BodyFraming::Empty);
    }
    if head.headers.contains("Transfer-Encoding") {
        return Ok(if is_chunked(&head.headers) {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        });
    }
    match content_length(&head.headers)? {
        Some(n) => Ok(BodyFraming::Length(n)),
        None => Ok(BodyFraming::UntilClose),
    }
}

/// Finds the end of a complete chunked body at the start of `buf`.
///
/// Returns the length of the body including the terminating chunk and any
/// trailers, or `None` if more bytes are needed.
pub fn chunked_body_len(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    let mut pos = 0;

    loop {
        let Some(line_end) = find_crlf(&buf[pos..]) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[pos..pos + line_end]).map_err(|_| ParseError::InvalidChunk)?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line_end + 2;

        if size == 0 {
            // Trailer section ends with an empty line
            loop {
                let Some(trailer_end) = find_crlf(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += trailer_end + 2;
                if trailer_end == 0 {
                    return Ok(Some(pos));
                }
            }
        }

        let data_end = pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
        let frame_end = data_end.checked_add(2).ok_or(ParseError::InvalidChunk)?;
        if buf.len() < frame_end {
            return Ok(None);
        }
        if &buf[data_end..frame_end] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        pos = frame_end;
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || key.ends_with(' ') || key.ends_with('\t') {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &Headers) -> Result<Option<usize>, ParseError> {
    let mut length = None;
    for value in headers.get_all("Content-Length") {
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?;
        if length.is_some_and(|previous| previous != parsed) {
            return Err(ParseError::InvalidContentLength);
        }
        length = Some(parsed);
    }
    Ok(length)
}

fn find_headers_end(buf: &[u8]) -> Result<usize, ParseError> {
    match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) if end > MAX_HEADER_BYTES => Err(ParseError::HeadersTooLarge),
        Some(end) => Ok(end),
        None if buf.len() > MAX_HEADER_BYTES => Err(ParseError::HeadersTooLarge),
        None => Err(ParseError::Incomplete),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
