//! Incremental HTTP/1.1 request parser, grounded on
//! `examples/original_source/code/http/httprequest.cpp`. Parsing advances
//! line by line as bytes arrive, so a request split across several `read`
//! calls resumes from wherever [`HttpRequest::parse`] last left off.

use std::collections::HashMap;
use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::buffer::ByteBuffer;
use crate::log_debug;

static DEFAULT_HTML: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["/index", "/register", "/login", "/welcome", "/video", "/picture"]
        .into_iter()
        .collect()
});

/// Maps a login/register page to its form tag: 0 = register, 1 = login.
static DEFAULT_HTML_TAG: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    [("/register.html", 0u8), ("/login.html", 1u8)]
        .into_iter()
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

#[derive(Debug)]
pub struct HttpRequest {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    body: String,
    headers: HashMap<String, String>,
    post: HashMap<String, String>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            state: ParseState::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            body: String::new(),
            headers: HashMap::new(),
            post: HashMap::new(),
        }
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to start parsing a fresh request on the same connection.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.headers.clear();
        self.post.clear();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get_post(&self, key: &str) -> &str {
        self.post.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("Connection") {
            Some(v) => v.eq_ignore_ascii_case("keep-alive") && self.version == "1.1",
            None => false,
        }
    }

    /// Consumes as many complete lines as `buf` currently has buffered.
    /// Returns `false` on a malformed request line; returns `true` once a
    /// request is fully parsed (state reaches `Finish`) *or* the buffered
    /// bytes ran out first (the caller should read more and call again).
    ///
    /// `verify` is invoked with `(username, password, is_login)` only when
    /// the path is the login or register form target; it decouples the
    /// parser from any particular database backend.
    pub fn parse(&mut self, buf: &mut ByteBuffer, verify: &mut dyn FnMut(&str, &str, bool) -> bool) -> bool {
        const CRLF: &[u8] = b"\r\n";

        if buf.readable_bytes() == 0 {
            return false;
        }

        while buf.readable_bytes() > 0 && self.state != ParseState::Finish {
            let data = buf.peek();
            let (line, line_end_abs, found) = match find_subslice(data, CRLF) {
                Some(pos) => (
                    String::from_utf8_lossy(&data[..pos]).into_owned(),
                    buf.read_pos() + pos,
                    true,
                ),
                None => (
                    String::from_utf8_lossy(data).into_owned(),
                    buf.read_pos() + data.len(),
                    false,
                ),
            };

            match self.state {
                ParseState::RequestLine => {
                    if !self.parse_request_line(&line) {
                        return false;
                    }
                    self.parse_path();
                }
                ParseState::Headers => {
                    self.parse_header(&line);
                    if buf.readable_bytes() <= 2 {
                        self.state = ParseState::Finish;
                    }
                }
                ParseState::Body => {
                    self.parse_body(&line, verify);
                }
                ParseState::Finish => {}
            }

            if !found {
                buf.retrieve_all();
                break;
            }
            buf.retrieve_to(line_end_abs, 2);
        }

        log_debug!("[{}], [{}], [{}]", self.method, self.path, self.version);
        true
    }

    fn parse_request_line(&mut self, line: &str) -> bool {
        // "METHOD SP PATH SP HTTP/VERSION"
        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(http_version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let Some(version) = http_version.strip_prefix("HTTP/") else {
            return false;
        };
        if method.is_empty() || path.is_empty() {
            return false;
        }
        self.method = method.to_string();
        self.path = path.to_string();
        self.version = version.to_string();
        self.state = ParseState::Headers;
        true
    }

    fn parse_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    fn parse_header(&mut self, line: &str) {
        match line.find(':') {
            Some(idx) => {
                let key = line[..idx].to_string();
                let value = line[idx + 1..].strip_prefix(' ').unwrap_or(&line[idx + 1..]);
                self.headers.insert(key, value.to_string());
            }
            None => self.state = ParseState::Body,
        }
    }

    fn parse_body(&mut self, line: &str, verify: &mut dyn FnMut(&str, &str, bool) -> bool) {
        self.body = line.to_string();
        self.parse_post(verify);
        self.state = ParseState::Finish;
        log_debug!("Body: {}, len = {}", self.body, self.body.len());
    }

    fn parse_post(&mut self, verify: &mut dyn FnMut(&str, &str, bool) -> bool) {
        if self.method != "POST" {
            return;
        }
        if self.headers.get("Content-Type").map(String::as_str)
            != Some("application/x-www-form-urlencoded")
        {
            return;
        }

        self.parse_form_urlencoded();

        if let Some(&tag) = DEFAULT_HTML_TAG.get(self.path.as_str()) {
            let is_login = tag == 1;
            let name = self.post.get("username").cloned().unwrap_or_default();
            let password = self.post.get("password").cloned().unwrap_or_default();
            if verify(&name, &password, is_login) {
                self.path = "/welcome.html".to_string();
            } else {
                self.path = "/error.html".to_string();
            }
        }
    }

    /// Decodes `application/x-www-form-urlencoded` body into `self.post`.
    /// `%XX` escapes are decoded to the raw byte they encode, unlike the
    /// reference implementation, which instead re-renders the decoded value
    /// as two ASCII decimal digits.
    fn parse_form_urlencoded(&mut self) {
        if self.body.is_empty() {
            return;
        }

        let bytes = self.body.as_bytes();
        let mut key: Option<Vec<u8>> = None;
        let mut current: Vec<u8> = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'=' => {
                    key = Some(std::mem::take(&mut current));
                }
                b'+' => current.push(b' '),
                b'%' if i + 2 < bytes.len() => {
                    let hi = hex_val(bytes[i + 1]);
                    let lo = hex_val(bytes[i + 2]);
                    current.push((hi << 4) | lo);
                    i += 2;
                }
                b'&' => {
                    if let Some(k) = key.take() {
                        let key_s = String::from_utf8_lossy(&k).into_owned();
                        let value_s = String::from_utf8_lossy(&current).into_owned();
                        log_debug!("{} = {}", key_s, value_s);
                        self.post.insert(key_s, value_s);
                    }
                    current.clear();
                }
                b => current.push(b),
            }
            i += 1;
        }

        if let Some(k) = key {
            let key_s = String::from_utf8_lossy(&k).into_owned();
            if !self.post.contains_key(&key_s) {
                let value_s = String::from_utf8_lossy(&current).into_owned();
                log_debug!("{} = {}", key_s, value_s);
                self.post.insert(key_s, value_s);
            }
        }
    }
}

fn hex_val(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_verify(_: &str, _: &str, _: bool) -> bool {
        panic!("verify should not be called for a GET-only request");
    }

    #[test]
    fn parses_simple_get_request() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\n\r\n");
        let mut req = HttpRequest::new();
        let mut verify = no_verify;
        assert!(req.parse(&mut buf, &mut verify));
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/index.html");
        assert_eq!(req.version(), "1.1");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn root_path_maps_to_index() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET / HTTP/1.1\r\n\r\n");
        let mut req = HttpRequest::new();
        let mut verify = no_verify;
        req.parse(&mut buf, &mut verify);
        assert_eq!(req.path(), "/index.html");
    }

    #[test]
    fn rejects_malformed_request_line() {
        let mut buf = ByteBuffer::new();
        buf.append(b"NOT A REQUEST LINE\r\n\r\n");
        let mut req = HttpRequest::new();
        let mut verify = no_verify;
        assert!(!req.parse(&mut buf, &mut verify));
    }

    #[test]
    fn post_login_delegates_to_verifier_and_rewrites_path() {
        let mut buf = ByteBuffer::new();
        buf.append(
            b"POST /login.html HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 25\r\n\r\n\
              username=bob&password=hi",
        );
        let mut req = HttpRequest::new();
        let mut calls = Vec::new();
        let mut verify = |name: &str, password: &str, is_login: bool| {
            calls.push((name.to_string(), password.to_string(), is_login));
            true
        };
        assert!(req.parse(&mut buf, &mut verify));
        assert_eq!(req.path(), "/welcome.html");
        assert_eq!(calls, vec![("bob".to_string(), "hi".to_string(), true)]);
    }

    #[test]
    fn decodes_percent_and_plus_in_form_body() {
        let mut req = HttpRequest::new();
        req.method = "POST".to_string();
        req.body = "a=hello+world&b=100%25done".to_string();
        req.parse_form_urlencoded();
        assert_eq!(req.get_post("a"), "hello world");
        assert_eq!(req.get_post("b"), "100%done");
    }
}
