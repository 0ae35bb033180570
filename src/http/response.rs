//! Response builder backed by `mmap`, grounded on
//! `examples/original_source/code/http/httpresponse.cpp`. Static files are
//! never copied into the output buffer: the status line and headers go into
//! a `ByteBuffer`, the body stays mapped and is handed back as a second
//! `iovec` for the connection to `writev` directly.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::buffer::ByteBuffer;
use crate::log_debug;

static SUFFIX_TYPE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        (".html", "text/html"),
        (".xml", "text/xml"),
        (".xhtml", "application/xhtml+xml"),
        (".txt", "text/plain"),
        (".rtf", "application/rtf"),
        (".pdf", "application/pdf"),
        (".word", "application/nsword"),
        (".png", "image/png"),
        (".gif", "image/gif"),
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
        (".au", "audio/basic"),
        (".mpeg", "video/mpeg"),
        (".mpg", "video/mpeg"),
        (".avi", "video/x-msvideo"),
        (".gz", "application/x-gzip"),
        (".tar", "application/x-tar"),
        (".css", "text/css "),
        (".js", "text/javascript "),
    ]
    .into_iter()
    .collect()
});

static CODE_STATUS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    [(200, "OK"), (400, "Bad Request"), (403, "Forbidden"), (404, "Not Found")]
        .into_iter()
        .collect()
});

static CODE_PATH: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    [(400, "/400.html"), (403, "/403.html"), (404, "/404.html")]
        .into_iter()
        .collect()
});

/// An `mmap`'d region, unmapped on drop. Never copied or re-exposed as an
/// owned buffer: callers only ever see it as a `&[u8]` for a `writev` iovec.
struct MappedFile {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MappedFile {
    fn map(fd: RawFd, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        Some(Self { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.cast(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

// SAFETY: the mapping is read-only and never mutated after creation, so
// sharing the `&[u8]` view across threads is sound; the handle itself is
// moved, never aliased, across thread boundaries.
unsafe impl Send for MappedFile {}

pub struct HttpResponse {
    code: u16,
    keep_alive: bool,
    path: String,
    src_dir: String,
    mapped: Option<MappedFile>,
    file_len: u64,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            code: 0,
            keep_alive: false,
            path: String::new(),
            src_dir: String::new(),
            mapped: None,
            file_len: 0,
        }
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// `code = 0` means "not yet decided"; mirrors the reference's `code_ =
    /// -1` sentinel, shifted into an unsigned status-code type.
    pub fn init(&mut self, src_dir: &str, path: &str, keep_alive: bool, code: u16) {
        self.unmap_file();
        self.code = code;
        self.path = path.to_string();
        self.src_dir = src_dir.to_string();
        self.keep_alive = keep_alive;
        self.file_len = 0;
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn file(&self) -> Option<&[u8]> {
        self.mapped.as_ref().map(MappedFile::as_slice)
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn unmap_file(&mut self) {
        self.mapped = None;
    }

    /// Builds the status line, headers, and body into `buffer`; the mapped
    /// file body (if any) is left in `self.mapped` for the caller to pick up
    /// via [`Self::file`].
    pub fn make_response(&mut self, buffer: &mut ByteBuffer) {
        let full_path = format!("{}{}", self.src_dir, self.path);
        match fs::metadata(&full_path) {
            Ok(meta) if meta.is_dir() => self.code = 404,
            Err(_) => self.code = 404,
            Ok(meta) => {
                use std::os::unix::fs::PermissionsExt;
                if meta.permissions().mode() & 0o004 == 0 {
                    self.code = 403;
                } else if self.code == 0 {
                    self.code = 200;
                }
            }
        }

        self.error_html();
        self.add_state_line(buffer);
        self.add_header(buffer);
        self.add_content(buffer);
    }

    fn error_html(&mut self) {
        if let Some(&path) = CODE_PATH.get(&self.code) {
            self.path = path.to_string();
        }
    }

    fn add_state_line(&mut self, buffer: &mut ByteBuffer) {
        let status = match CODE_STATUS.get(&self.code) {
            Some(s) => *s,
            None => {
                self.code = 400;
                CODE_STATUS[&400]
            }
        };
        buffer.append_str(&format!("HTTP/1.1 {} {}\r\n", self.code, status));
    }

    fn add_header(&self, buffer: &mut ByteBuffer) {
        buffer.append_str("Connection: ");
        if self.keep_alive {
            buffer.append_str("keep-alive\r\n");
            buffer.append_str("keep-alive: max=6, timeout=120\r\n");
        } else {
            buffer.append_str("close\r\n");
        }
        buffer.append_str(&format!("Content-type: {}\r\n", self.file_type()));
    }

    fn add_content(&mut self, buffer: &mut ByteBuffer) {
        let full_path = format!("{}{}", self.src_dir, self.path);
        let Ok(c_path) = CString::new(full_path.clone()) else {
            self.error_content(buffer, "File Not Found!!!");
            return;
        };
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            self.error_content(buffer, "File Not Found!!!");
            return;
        }

        let len = fs::metadata(&full_path).map(|m| m.len()).unwrap_or(0);
        log_debug!("file path: {full_path}");

        match MappedFile::map(fd, len as usize) {
            Some(mapped) => {
                self.mapped = Some(mapped);
                self.file_len = len;
                unsafe {
                    libc::close(fd);
                }
                buffer.append_str(&format!("Content-length: {}\r\n\r\n", len));
            }
            None => {
                unsafe {
                    libc::close(fd);
                }
                self.error_content(buffer, "Internal Server Error!!!");
            }
        }
    }

    fn file_type(&self) -> &'static str {
        match Path::new(&self.path).extension() {
            Some(ext) => {
                let suffix = format!(".{}", ext.to_string_lossy());
                SUFFIX_TYPE.get(suffix.as_str()).copied().unwrap_or("text/plain")
            }
            None => "text/plain",
        }
    }

    pub fn error_content(&mut self, buffer: &mut ByteBuffer, message: &str) {
        let status = CODE_STATUS.get(&self.code).copied().unwrap_or("Bad Request");
        let content = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>reactor-httpd</em></body></html>",
            self.code, status, message
        );
        buffer.append_str(&format!("Content-length: {}\r\n\r\n", content.len()));
        buffer.append_str(&content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serves_existing_file_with_200() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("hello.html")).unwrap();
        f.write_all(b"<p>hi</p>").unwrap();
        drop(f);

        let src_dir = dir.path().to_str().unwrap().to_string();
        let mut resp = HttpResponse::new();
        let mut buf = ByteBuffer::new();
        resp.init(&src_dir, "/hello.html", true, 0);
        resp.make_response(&mut buf);

        assert_eq!(resp.code(), 200);
        assert_eq!(resp.file_len(), 9);
        assert_eq!(resp.file().unwrap(), b"<p>hi</p>");
        let head = buf.retrieve_all_to_string();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-type: text/html"));
    }

    #[test]
    fn missing_file_yields_404_and_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().to_str().unwrap().to_string();
        let mut resp = HttpResponse::new();
        let mut buf = ByteBuffer::new();
        resp.init(&src_dir, "/nope.html", false, 0);
        resp.make_response(&mut buf);
        assert_eq!(resp.code(), 404);
    }

    #[test]
    fn unknown_suffix_defaults_to_text_plain() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.bin"), b"xyz").unwrap();
        let src_dir = dir.path().to_str().unwrap().to_string();
        let mut resp = HttpResponse::new();
        let mut buf = ByteBuffer::new();
        resp.init(&src_dir, "/data.bin", false, 0);
        resp.make_response(&mut buf);
        let head = buf.retrieve_all_to_string();
        assert!(head.contains("Content-type: text/plain"));
    }
}
