//! Parsed multipart parts and their headers.

use super::MultipartError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};

/// Standard alphabet; trailing `=` padding is optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Ordered header multimap of one part. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value recorded under `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Distinct header names, spelled as first seen.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.entries {
            if !names.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn last_mut(&mut self) -> Option<&mut (String, String)> {
        self.entries.last_mut()
    }
}

/// One part of a multipart payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    name: Option<String>,
    submitted_file_name: Option<String>,
    headers: PartHeaders,
    body: Bytes,
}

impl Part {
    /// Form field name from `Content-Disposition`.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Client-side file name from `Content-Disposition`, if this part is a file.
    pub fn submitted_file_name(&self) -> Option<&str> {
        self.submitted_file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Readable view over the body.
    pub fn reader(&self) -> impl std::io::Read {
        self.body.clone().reader()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name)
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.names()
    }

    pub fn all_headers(&self) -> &PartHeaders {
        &self.headers
    }

    fn is_base64_encoded(&self) -> bool {
        self.headers
            .get("content-transfer-encoding")
            .is_some_and(|encoding| encoding.trim().eq_ignore_ascii_case("base64"))
    }

    /// Replace a base64 transfer-encoded body by its decoded bytes.
    pub(crate) fn decode_transfer_encoding(self) -> Result<Part, MultipartError> {
        if !self.is_base64_encoded() {
            return Ok(self);
        }
        let compact: Vec<u8> = self
            .body
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        match LENIENT_BASE64.decode(compact) {
            Ok(decoded) => Ok(Part {
                body: Bytes::from(decoded),
                ..self
            }),
            Err(source) => Err(MultipartError::MalformedTransferEncoding {
                part: self.name.unwrap_or_else(|| "<unnamed>".to_string()),
                source,
            }),
        }
    }
}

/// Part under construction while the parser walks the payload.
#[derive(Debug, Default)]
pub(crate) struct PartBuilder {
    name: Option<String>,
    submitted_file_name: Option<String>,
    headers: PartHeaders,
    body: BytesMut,
}

impl PartBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_identity(&mut self, name: Option<String>, filename: Option<String>) {
        self.name = name;
        self.submitted_file_name = filename;
    }

    pub(crate) fn record_header(&mut self, name: String, value: String) {
        self.headers.append(name, value);
    }

    /// Append a folded continuation line to the last header.
    ///
    /// Returns the header name it was folded into.
    pub(crate) fn fold_header(&mut self, continuation: &str) -> Option<&str> {
        let (name, value) = self.headers.last_mut()?;
        if !value.is_empty() {
            value.push(' ');
        }
        value.push_str(continuation);
        Some(name.as_str())
    }

    pub(crate) fn last_header_value(&self) -> Option<&str> {
        self.headers.entries.last().map(|(_, v)| v.as_str())
    }

    pub(crate) fn append_content(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub(crate) fn finish(self) -> Part {
        Part {
            name: self.name,
            submitted_file_name: self.submitted_file_name,
            headers: self.headers,
            body: self.body.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn part_with(headers: &[(&str, &str)], body: &[u8]) -> Part {
        let mut builder = PartBuilder::new();
        for (name, value) in headers {
            builder.record_header(name.to_string(), value.to_string());
        }
        builder.append_content(body);
        builder.finish()
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let part = part_with(&[("Content-Type", "text/plain"), ("X-Tag", "a")], b"");
        assert_eq!(part.header("content-type"), Some("text/plain"));
        assert_eq!(part.content_type(), Some("text/plain"));
        assert_eq!(part.header("X-TAG"), Some("a"));
        assert_eq!(part.header("missing"), None);
    }

    #[test]
    fn test_repeated_headers_keep_order() {
        let part = part_with(&[("X-Tag", "a"), ("Other", "o"), ("x-tag", "b")], b"");
        assert_eq!(part.headers("x-tag"), vec!["a", "b"]);
        assert_eq!(part.header_names(), vec!["X-Tag", "Other"]);
        assert_eq!(part.all_headers().len(), 3);
    }

    #[test]
    fn test_reader_yields_body() {
        let part = part_with(&[], b"hello world");
        let mut text = String::new();
        part.reader().read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(part.size(), 11);
    }

    #[test]
    fn test_base64_decode_strips_whitespace() {
        let part = part_with(
            &[("Content-Transfer-Encoding", " Base64 ")],
            b"aGVsbG8g\r\nd29ybGQ=\r\n",
        );
        let decoded = part.decode_transfer_encoding().unwrap();
        assert_eq!(decoded.content().as_ref(), b"hello world");
        assert_eq!(decoded.header("content-transfer-encoding"), Some(" Base64 "));
    }

    #[test]
    fn test_base64_decode_accepts_missing_padding() {
        let part = part_with(&[("Content-Transfer-Encoding", "base64")], b"aGkgdGhlcmU");
        let decoded = part.decode_transfer_encoding().unwrap();
        assert_eq!(decoded.content().as_ref(), b"hi there");
        assert_eq!(decoded.size(), 8);
    }

    #[test]
    fn test_other_encodings_left_alone() {
        let part = part_with(&[("Content-Transfer-Encoding", "binary")], b"aGk=");
        let untouched = part.clone().decode_transfer_encoding().unwrap();
        assert_eq!(untouched, part);
    }

    #[test]
    fn test_fold_header_joins_with_space() {
        let mut builder = PartBuilder::new();
        assert!(builder.fold_header("orphan").is_none());
        builder.record_header("X-Long".to_string(), "first".to_string());
        assert_eq!(builder.fold_header("second"), Some("X-Long"));
        assert_eq!(builder.last_header_value(), Some("first second"));
    }
}
