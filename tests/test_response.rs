use sluice::http::response::{Response, ResponseBuilder, StatusCode, GATEWAY_ERROR_BODY};
use sluice::http::writer::{serialize_response, ResponseWriter};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::OK.as_u16(), 200);
    assert_eq!(StatusCode::SWITCHING_PROTOCOLS.as_u16(), 101);
    assert_eq!(StatusCode::NO_CONTENT.as_u16(), 204);
    assert_eq!(StatusCode::BAD_GATEWAY.as_u16(), 502);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    assert_eq!(StatusCode::NO_CONTENT.reason_phrase(), "No Content");
    assert_eq!(
        StatusCode::from_u16(500).unwrap().reason_phrase(),
        "Internal Server Error"
    );
    assert_eq!(StatusCode::from_u16(799).unwrap().reason_phrase(), "");
}

#[test]
fn test_status_code_from_u16_range() {
    assert_eq!(StatusCode::from_u16(418).map(|s| s.as_u16()), Some(418));
    assert!(StatusCode::from_u16(99).is_none());
    assert!(StatusCode::from_u16(1000).is_none());
}

#[test]
fn test_status_code_forbids_body() {
    assert!(StatusCode::NO_CONTENT.forbids_body());
    assert!(StatusCode::NOT_MODIFIED.forbids_body());
    assert!(StatusCode::SWITCHING_PROTOCOLS.forbids_body());
    assert!(!StatusCode::OK.forbids_body());
}

#[test]
fn test_status_code_is_informational() {
    assert!(StatusCode::from_u16(100).unwrap().is_informational());
    assert!(StatusCode::from_u16(103).unwrap().is_informational());
    assert!(!StatusCode::OK.is_informational());
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .body(b"Hello, World!".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.reason, "OK");
    assert_eq!(&response.body[..], b"Hello, World!");
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .body(b"This is the body".to_vec())
        .build();

    assert_eq!(response.header("Content-Length"), Some("16"));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Length", "999")
        .body(b"short".to_vec())
        .build();

    assert_eq!(response.header("Content-Length"), Some("999"));
}

#[test]
fn test_response_builder_build_raw_leaves_headers_alone() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .reason("Fine")
        .body(b"abc".to_vec())
        .build_raw();

    assert!(response.headers.is_empty());
    assert_eq!(response.reason, "Fine");
}

#[test]
fn test_bad_gateway_response() {
    let response = Response::bad_gateway();

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(&response.body[..], GATEWAY_ERROR_BODY);
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert_eq!(response.header("Content-Length"), Some("13"));
    assert_eq!(
        serialize_response(&response),
        b"HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/plain\r\nContent-Length: 13\r\n\r\nGateway Error"
            .to_vec()
    );
}

#[test]
fn test_response_keep_alive() {
    let keep = ResponseBuilder::new(StatusCode::OK).build();
    let close = ResponseBuilder::new(StatusCode::OK)
        .header("Connection", "close")
        .build();
    let http10 = ResponseBuilder::new(StatusCode::OK).version("HTTP/1.0").build();
    let until_close = ResponseBuilder::new(StatusCode::OK)
        .close_delimited(true)
        .build_raw();

    assert!(keep.keep_alive());
    assert!(!close.keep_alive());
    assert!(!http10.keep_alive());
    assert!(!until_close.keep_alive());
}

#[test]
fn test_serialize_keeps_reason_and_header_order() {
    let response = ResponseBuilder::new(StatusCode::from_u16(299).unwrap())
        .reason("Custom Thing")
        .header("x-lower", "1")
        .header("X-Upper", "2")
        .body(b"ok".to_vec())
        .build_raw();

    assert_eq!(
        serialize_response(&response),
        b"HTTP/1.1 299 Custom Thing\r\nx-lower: 1\r\nX-Upper: 2\r\n\r\nok".to_vec()
    );
}

#[tokio::test]
async fn test_response_writer_writes_everything() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .body(b"hello".to_vec())
        .build();
    let mut writer = ResponseWriter::new(&response);
    let mut out: Vec<u8> = Vec::new();

    writer.write_to_stream(&mut out).await.unwrap();

    assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec());
}
