//! HTTP/1.1 request parsing and response generation, grounded on
//! `examples/original_source/code/http/httprequest.{h,cpp}` and
//! `httpresponse.{h,cpp}`.

pub mod request;
pub mod response;

pub use request::HttpRequest;
pub use response::HttpResponse;
