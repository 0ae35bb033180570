//! End-to-end exercise of the request parser and response builder against a
//! temp directory standing in for a static resource root, without any of the
//! reactor/socket/thread-pool machinery around them.

use std::fs;
use std::io::Write;

use reactor_httpd::buffer::ByteBuffer;
use reactor_httpd::http::{HttpRequest, HttpResponse};

fn write_file(dir: &std::path::Path, name: &str, contents: &[u8]) {
    let mut f = fs::File::create(dir.join(name)).unwrap();
    f.write_all(contents).unwrap();
}

#[test]
fn static_get_round_trip_serves_full_200_response() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "index.html", b"<html>hi</html>");
    let src_dir = dir.path().to_str().unwrap().to_string();

    let mut read_buf = ByteBuffer::new();
    read_buf.append(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n");

    let mut request = HttpRequest::new();
    let mut verify = |_: &str, _: &str, _: bool| false;
    assert!(request.parse(&mut read_buf, &mut verify));
    assert_eq!(request.path(), "/index.html");
    assert!(request.is_keep_alive());

    let mut response = HttpResponse::new();
    let mut write_buf = ByteBuffer::new();
    response.init(&src_dir, request.path(), request.is_keep_alive(), 200);
    response.make_response(&mut write_buf);

    assert_eq!(response.code(), 200);
    let head = write_buf.retrieve_all_to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: keep-alive"));
    assert!(head.contains("Content-type: text/html"));
    assert!(head.contains(&format!("Content-length: {}\r\n\r\n", b"<html>hi</html>".len())));
    assert_eq!(response.file().unwrap(), b"<html>hi</html>");
}

#[test]
fn missing_resource_falls_back_to_404_page() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "404.html", b"not here");
    let src_dir = dir.path().to_str().unwrap().to_string();

    let mut read_buf = ByteBuffer::new();
    read_buf.append(b"GET /nope.html HTTP/1.1\r\nConnection: close\r\n\r\n");

    let mut request = HttpRequest::new();
    let mut verify = |_: &str, _: &str, _: bool| false;
    assert!(request.parse(&mut read_buf, &mut verify));
    assert!(!request.is_keep_alive());

    let mut response = HttpResponse::new();
    let mut write_buf = ByteBuffer::new();
    response.init(&src_dir, request.path(), request.is_keep_alive(), 200);
    response.make_response(&mut write_buf);

    assert_eq!(response.code(), 404);
    let head = write_buf.retrieve_all_to_string();
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(head.contains("Connection: close"));
    assert_eq!(response.file().unwrap(), b"not here");
}

#[test]
fn malformed_request_line_yields_400_response() {
    let mut read_buf = ByteBuffer::new();
    read_buf.append(b"THIS IS NOT HTTP\r\n\r\n");

    let mut request = HttpRequest::new();
    let mut verify = |_: &str, _: &str, _: bool| false;
    assert!(!request.parse(&mut read_buf, &mut verify));

    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "400.html", b"bad request");
    let src_dir = dir.path().to_str().unwrap().to_string();

    let mut response = HttpResponse::new();
    let mut write_buf = ByteBuffer::new();
    response.init(&src_dir, "/400.html", false, 400);
    response.make_response(&mut write_buf);

    assert_eq!(response.code(), 400);
    let head = write_buf.retrieve_all_to_string();
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn post_login_failure_rewrites_path_to_error_page() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "error.html", b"nope");
    let src_dir = dir.path().to_str().unwrap().to_string();

    let mut read_buf = ByteBuffer::new();
    read_buf.append(
        b"POST /login.html HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nusername=alice&password=wrong",
    );

    let mut request = HttpRequest::new();
    let mut verify = |_: &str, _: &str, is_login: bool| {
        assert!(is_login);
        false
    };
    assert!(request.parse(&mut read_buf, &mut verify));
    assert_eq!(request.path(), "/error.html");

    let mut response = HttpResponse::new();
    let mut write_buf = ByteBuffer::new();
    response.init(&src_dir, request.path(), false, 200);
    response.make_response(&mut write_buf);
    assert_eq!(response.code(), 200);
}
