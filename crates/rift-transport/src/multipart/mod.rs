//! Multipart payload parsing.
//!
//! Request bodies are buffered in full before parsing; the parser then runs
//! once over the whole payload and returns every part in arrival order.
//! Parts declaring `Content-Transfer-Encoding: base64` are decoded after the
//! pass.

mod parser;
mod part;

pub use parser::MultipartStreamParser;
pub use part::{Part, PartHeaders};

/// Errors raised while parsing a multipart payload.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("no usable multipart boundary in content type '{0}'")]
    InvalidBoundary(String),

    #[error("part '{part}' declares base64 transfer encoding but its body is not valid base64")]
    MalformedTransferEncoding {
        part: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// True if `content_type` names a `multipart/*` media type.
pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
}

/// Extract the `boundary` parameter of a multipart content type.
pub fn extract_boundary(content_type: &str) -> Result<String, MultipartError> {
    parser::split_params(content_type)
        .into_iter()
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| parser::unquote(value.trim()).to_string())
        .filter(|boundary| !boundary.is_empty())
        .ok_or_else(|| MultipartError::InvalidBoundary(content_type.to_string()))
}

/// Parse a buffered multipart payload using the boundary from `content_type`.
pub fn parse(body: &[u8], content_type: &str) -> Result<Vec<Part>, MultipartError> {
    let boundary = extract_boundary(content_type)?;
    MultipartStreamParser::new(&boundary)?.parse(body)
}
