//! Multipart payload state machine.
//!
//! The parser walks a fully buffered payload once. Delimiters are located
//! with an Aho-Corasick automaton; everything between two delimiters is fed
//! to the current [`PartBuilder`].

use super::part::{Part, PartBuilder};
use super::MultipartError;
use aho_corasick::AhoCorasick;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter
    Preamble,
    /// Just after a delimiter, before its line break
    Delimiter,
    Headers,
    Content,
    /// After the close delimiter
    Epilogue,
}

/// What follows a `--boundary` match.
enum DelimiterTail {
    /// `--`: the close delimiter
    Close,
    /// Optional transport padding, then a line break ending at this offset
    Open(usize),
    /// Input ends before the tail can be classified
    Incomplete,
    /// The match is part of a longer token, not a delimiter
    NotDelimiter,
}

/// Incremental parser for one multipart payload.
pub struct MultipartStreamParser {
    boundary_len: usize,
    /// Matches `--boundary`
    dash_boundary: AhoCorasick,
    /// Matches `\r\n--boundary`
    delimiter: AhoCorasick,
    state: State,
    current: Option<PartBuilder>,
    parts: Vec<Part>,
}

impl MultipartStreamParser {
    pub fn new(boundary: &str) -> Result<Self, MultipartError> {
        if boundary.is_empty() {
            return Err(MultipartError::InvalidBoundary(boundary.to_string()));
        }
        let dash_boundary = format!("--{boundary}");
        let delimiter = format!("\r\n--{boundary}");
        let build = |pattern: &str| {
            AhoCorasick::new([pattern])
                .map_err(|_| MultipartError::InvalidBoundary(boundary.to_string()))
        };
        Ok(Self {
            boundary_len: dash_boundary.len(),
            dash_boundary: build(&dash_boundary)?,
            delimiter: build(&delimiter)?,
            state: State::Preamble,
            current: None,
            parts: Vec::new(),
        })
    }

    /// Consume the whole payload and return the parts in arrival order.
    pub fn parse(mut self, input: &[u8]) -> Result<Vec<Part>, MultipartError> {
        let mut pos = 0;
        while let Some(next) = self.step(input, pos) {
            pos = next;
        }
        self.finish()
    }

    /// Advance one state transition. `None` once the input is exhausted or
    /// the close delimiter has been seen.
    fn step(&mut self, input: &[u8], pos: usize) -> Option<usize> {
        match self.state {
            State::Preamble => self.skip_preamble(input, pos),
            State::Delimiter => self.read_delimiter_tail(input, pos),
            State::Headers => self.read_header_line(input, pos),
            State::Content => self.read_content(input, pos),
            State::Epilogue => None,
        }
    }

    fn skip_preamble(&mut self, input: &[u8], pos: usize) -> Option<usize> {
        for found in self.dash_boundary.find_iter(&input[pos..]) {
            let start = pos + found.start();
            if start != 0 && input[start - 1] != b'\n' {
                continue;
            }
            let end = start + self.boundary_len;
            if matches!(classify_tail(input, end), DelimiterTail::NotDelimiter) {
                continue;
            }
            self.state = State::Delimiter;
            return Some(end);
        }
        None
    }

    fn read_delimiter_tail(&mut self, input: &[u8], pos: usize) -> Option<usize> {
        match classify_tail(input, pos) {
            DelimiterTail::Close => {
                self.finalize_current();
                self.state = State::Epilogue;
                None
            }
            DelimiterTail::Open(next) => {
                self.finalize_current();
                self.current = Some(PartBuilder::new());
                self.state = State::Headers;
                Some(next)
            }
            DelimiterTail::Incomplete | DelimiterTail::NotDelimiter => None,
        }
    }

    fn read_header_line(&mut self, input: &[u8], pos: usize) -> Option<usize> {
        let newline = input[pos..].iter().position(|&b| b == b'\n')?;
        let mut line = &input[pos..pos + newline];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let next = pos + newline + 1;

        if line.is_empty() {
            self.state = State::Content;
            return Some(next);
        }

        let text = String::from_utf8_lossy(line);
        let builder = self.current.get_or_insert_with(PartBuilder::new);

        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(name) = builder.fold_header(text.trim()) {
                if name.eq_ignore_ascii_case("content-disposition") {
                    let value = builder.last_header_value().unwrap_or_default().to_string();
                    apply_disposition(builder, &value);
                }
            }
            return Some(next);
        }

        match text.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                let name = name.trim();
                let value = value.trim();
                if name.eq_ignore_ascii_case("content-disposition") {
                    apply_disposition(builder, value);
                }
                builder.record_header(name.to_string(), value.to_string());
            }
            _ => debug!("Ignoring malformed multipart header line: {:?}", text),
        }
        Some(next)
    }

    fn read_content(&mut self, input: &[u8], pos: usize) -> Option<usize> {
        let builder = self.current.get_or_insert_with(PartBuilder::new);
        for found in self.delimiter.find_iter(&input[pos..]) {
            let start = pos + found.start();
            let end = pos + found.end();
            match classify_tail(input, end) {
                DelimiterTail::NotDelimiter => continue,
                DelimiterTail::Incomplete => {
                    builder.append_content(&input[pos..start]);
                    return None;
                }
                DelimiterTail::Close | DelimiterTail::Open(_) => {
                    builder.append_content(&input[pos..start]);
                    self.state = State::Delimiter;
                    return Some(end);
                }
            }
        }
        builder.append_content(&input[pos..]);
        None
    }

    fn finalize_current(&mut self) {
        if let Some(builder) = self.current.take() {
            self.parts.push(builder.finish());
        }
    }

    fn finish(mut self) -> Result<Vec<Part>, MultipartError> {
        match self.state {
            State::Headers | State::Content => {
                debug!(
                    "Multipart payload ended early in {:?}; keeping partial part",
                    self.state
                );
                self.finalize_current();
            }
            State::Preamble => debug!("Multipart payload contained no delimiter"),
            State::Delimiter | State::Epilogue => {}
        }
        self.parts
            .into_iter()
            .map(Part::decode_transfer_encoding)
            .collect()
    }
}

fn classify_tail(input: &[u8], at: usize) -> DelimiterTail {
    let rest = &input[at.min(input.len())..];
    if rest.starts_with(b"--") {
        return DelimiterTail::Close;
    }
    if rest == b"-" {
        return DelimiterTail::Incomplete;
    }
    let padding = rest
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    match &rest[padding..] {
        [] | [b'\r'] => DelimiterTail::Incomplete,
        [b'\n', ..] => DelimiterTail::Open(at + padding + 1),
        [b'\r', b'\n', ..] => DelimiterTail::Open(at + padding + 2),
        _ => DelimiterTail::NotDelimiter,
    }
}

/// Set the part's name and filename from a `Content-Disposition` value.
fn apply_disposition(builder: &mut PartBuilder, value: &str) {
    let mut name = None;
    let mut filename = None;
    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = unquote(raw.trim()).to_string();
        if key.eq_ignore_ascii_case("name") {
            name = Some(value);
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(value);
        }
    }
    builder.set_identity(name, filename);
}

/// Split a header value on `;`, ignoring separators inside quotes.
pub(crate) fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

pub(crate) fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(boundary: &str, body: &str) -> Vec<Part> {
        MultipartStreamParser::new(boundary)
            .unwrap()
            .parse(body.as_bytes())
            .unwrap()
    }

    #[test]
    fn test_two_parts() {
        let body = "--XyZ\r\n\
                    Content-Disposition: form-data; name=\"field\"\r\n\
                    \r\n\
                    value\r\n\
                    --XyZ\r\n\
                    Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    line one\r\nline two\r\n\
                    --XyZ--\r\n";
        let parts = parse("XyZ", body);
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name(), Some("field"));
        assert_eq!(parts[0].submitted_file_name(), None);
        assert_eq!(parts[0].content().as_ref(), b"value");

        assert_eq!(parts[1].name(), Some("upload"));
        assert_eq!(parts[1].submitted_file_name(), Some("a.txt"));
        assert_eq!(parts[1].content_type(), Some("text/plain"));
        assert_eq!(parts[1].content().as_ref(), b"line one\r\nline two");
        assert_eq!(
            parts[1].header_names(),
            vec!["Content-Disposition", "Content-Type"]
        );
    }

    #[test]
    fn test_preamble_and_epilogue_ignored() {
        let body = "This is the preamble.\r\n\
                    --b\r\n\
                    \r\n\
                    body\r\n\
                    --b--\r\n\
                    trailing epilogue\r\n--b\r\n\r\nnot a part";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content().as_ref(), b"body");
        assert!(parts[0].name().is_none());
        assert!(parts[0].all_headers().is_empty());
    }

    #[test]
    fn test_empty_part_is_kept() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"empty\"\r\n\r\n\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name(), Some("empty"));
        assert_eq!(parts[0].size(), 0);
    }

    #[test]
    fn test_boundary_lookalike_inside_content() {
        let body = "--b\r\n\r\nkeep\r\n--bogus text\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content().as_ref(), b"keep\r\n--bogus text");
    }

    #[test]
    fn test_transport_padding_after_delimiter() {
        let body = "--b  \r\n\r\none\r\n--b\t\r\n\r\ntwo\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].content().as_ref(), b"two");
    }

    #[test]
    fn test_bare_lf_headers_tolerated() {
        let body = "--b\nContent-Disposition: form-data; name=\"x\"\nX-Extra: 1\n\ndata\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name(), Some("x"));
        assert_eq!(parts[0].header("x-extra"), Some("1"));
        assert_eq!(parts[0].content().as_ref(), b"data");
    }

    #[test]
    fn test_folded_header_continuation() {
        let body = "--b\r\n\
                    Content-Disposition: form-data;\r\n\
                    \tname=\"folded\"\r\n\
                    X-Note: first\r\n \
                    second\r\n\
                    \r\n\
                    v\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts[0].name(), Some("folded"));
        assert_eq!(parts[0].header("x-note"), Some("first second"));
    }

    #[test]
    fn test_disposition_keeps_earlier_headers() {
        let body = "--b\r\n\
                    Content-Type: image/png\r\n\
                    Content-Disposition: attachment; filename=\"pic.png\"; name=pic\r\n\
                    \r\n\
                    png\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts[0].content_type(), Some("image/png"));
        assert_eq!(parts[0].name(), Some("pic"));
        assert_eq!(parts[0].submitted_file_name(), Some("pic.png"));
        assert_eq!(
            parts[0].header("content-disposition"),
            Some("attachment; filename=\"pic.png\"; name=pic")
        );
    }

    #[test]
    fn test_quoted_semicolon_in_filename() {
        let body =
            "--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a;b.txt\"\r\n\r\nx\r\n--b--";
        let parts = parse("b", body);
        assert_eq!(parts[0].submitted_file_name(), Some("a;b.txt"));
    }

    #[test]
    fn test_early_eof_in_content_keeps_partial_part() {
        let body = "--b\r\n\
                    Content-Disposition: form-data; name=\"first\"\r\n\r\n\
                    complete\r\n\
                    --b\r\n\
                    Content-Disposition: form-data; name=\"second\"\r\n\r\n\
                    cut off";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content().as_ref(), b"complete");
        assert_eq!(parts[1].name(), Some("second"));
        assert_eq!(parts[1].content().as_ref(), b"cut off");
    }

    #[test]
    fn test_early_eof_in_headers_keeps_partial_part() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"h\"\r\nX-Partial: ";
        let parts = parse("b", body);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name(), Some("h"));
        assert_eq!(parts[0].header("x-partial"), None);
        assert_eq!(parts[0].size(), 0);
    }

    #[test]
    fn test_no_delimiter_yields_no_parts() {
        assert!(parse("b", "just some text").is_empty());
        assert!(parse("b", "").is_empty());
    }

    #[test]
    fn test_malformed_base64_fails_whole_parse() {
        let body = "--b\r\n\
                    Content-Disposition: form-data; name=\"ok\"\r\n\r\nfine\r\n\
                    --b\r\n\
                    Content-Disposition: form-data; name=\"bad\"\r\n\
                    Content-Transfer-Encoding: base64\r\n\r\n\
                    !!!not base64!!!\r\n--b--";
        let err = MultipartStreamParser::new("b")
            .unwrap()
            .parse(body.as_bytes())
            .unwrap_err();
        match err {
            MultipartError::MalformedTransferEncoding { part, .. } => assert_eq!(part, "bad"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_split_params_and_unquote() {
        assert_eq!(
            split_params("form-data; name=\"a;b\"; x=1"),
            vec!["form-data", "name=\"a;b\"", "x=1"]
        );
        assert_eq!(unquote("\"quoted\""), "quoted");
        assert_eq!(unquote("bare"), "bare");
        assert_eq!(unquote("\""), "\"");
    }
}
