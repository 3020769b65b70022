//! Lightweight body parsing: key lookup in flat JSON objects and
//! single-file multipart/form-data extraction.

/// Position of `needle` in `haystack` at or after `from`
pub fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Look up the value of `key` in a flat JSON object without a full parse.
///
/// Quoted values are returned without their quotes (no escape handling).
/// Bare values run up to the next comma, closing brace or newline and are
/// trimmed.
pub fn extract_json_value<'a>(json: &'a str, key: &str) -> Option<&'a str> {
    let key_pos = json.find(&format!("\"{key}\""))?;
    let colon = key_pos + json[key_pos..].find(':')?;
    let rest = json[colon + 1..].trim_start();

    match rest.strip_prefix('"') {
        Some(quoted) => quoted.find('"').map(|end| &quoted[..end]),
        None => {
            let end = rest.find([',', '}', '\n']).unwrap_or(rest.len());
            Some(rest[..end].trim_end())
        }
    }
}

/// Boundary parameter of a multipart Content-Type, with surrounding quotes
/// removed
pub fn multipart_boundary(content_type: &str) -> Option<&str> {
    let pos = content_type.find("boundary=")?;
    let boundary = &content_type[pos + "boundary=".len()..];
    let boundary = boundary.strip_prefix('"').unwrap_or(boundary);
    let boundary = boundary.strip_suffix('"').unwrap_or(boundary);
    (!boundary.is_empty()).then_some(boundary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Extract the first part of a multipart body.
///
/// The part content runs from the blank line after its headers up to the
/// next boundary delimiter, with trailing CR/LF removed. Returns `None` when
/// the body is not well formed or the part is empty.
pub fn parse_multipart(body: &[u8], boundary: &str) -> Option<MultipartFile> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let start = find_bytes(body, delimiter, 0)? + delimiter.len();
    let disposition = find_bytes(body, b"Content-Disposition:", start)?;

    let data_start = match find_bytes(body, b"\r\n\r\n", disposition) {
        Some(pos) => pos + 4,
        None => find_bytes(body, b"\n\n", disposition)? + 2,
    };

    let filename = find_bytes(&body[..data_start], b"filename=\"", disposition)
        .map(|pos| pos + "filename=\"".len())
        .and_then(|name_start| {
            find_bytes(&body[..data_start], b"\"", name_start)
                .map(|name_end| String::from_utf8_lossy(&body[name_start..name_end]).into_owned())
        })
        .filter(|name| !name.is_empty());

    let mut data_end = find_bytes(body, delimiter, data_start)?;
    while data_end > data_start && matches!(body[data_end - 1], b'\r' | b'\n') {
        data_end -= 1;
    }

    let data = body[data_start..data_end].to_vec();
    if data.is_empty() {
        return None;
    }

    Some(MultipartFile { filename, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bytes() {
        assert_eq!(find_bytes(b"abcabc", b"bc", 0), Some(1));
        assert_eq!(find_bytes(b"abcabc", b"bc", 2), Some(4));
        assert_eq!(find_bytes(b"abc", b"x", 0), None);
        assert_eq!(find_bytes(b"abc", b"", 0), None);
        assert_eq!(find_bytes(b"abc", b"a", 10), None);
    }

    #[test]
    fn test_extract_string_and_number() {
        let json = r#"{"from": "alice", "to":"bob", "data": "aGk=", "fee": 0.01}"#;
        assert_eq!(extract_json_value(json, "from"), Some("alice"));
        assert_eq!(extract_json_value(json, "to"), Some("bob"));
        assert_eq!(extract_json_value(json, "data"), Some("aGk="));
        assert_eq!(extract_json_value(json, "fee"), Some("0.01"));
        assert_eq!(extract_json_value(json, "missing"), None);
    }

    #[test]
    fn test_extract_multiline() {
        let json = "{\n  \"fee\": 5 \n,\n  \"flag\": true\n}";
        assert_eq!(extract_json_value(json, "fee"), Some("5"));
        assert_eq!(extract_json_value(json, "flag"), Some("true"));
    }

    #[test]
    fn test_extract_unterminated_string() {
        assert_eq!(extract_json_value(r#"{"from": "alice"#, "from"), None);
    }

    #[test]
    fn test_boundary() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=XyZ"),
            Some("XyZ")
        );
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"quoted\""),
            Some("quoted")
        );
        assert_eq!(multipart_boundary("multipart/form-data"), None);
        assert_eq!(multipart_boundary("multipart/form-data; boundary="), None);
    }

    #[test]
    fn test_parse_multipart() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\nhello\r\n--XyZ--\r\n";
        let file = parse_multipart(body, "XyZ").unwrap();
        assert_eq!(file.filename.as_deref(), Some("a.txt"));
        assert_eq!(file.data, b"hello");
    }

    #[test]
    fn test_parse_multipart_without_filename() {
        let body = b"--b\nContent-Disposition: form-data; name=\"file\"\n\n\x00\x01binary\n--b--";
        let file = parse_multipart(body, "b").unwrap();
        assert_eq!(file.filename, None);
        assert_eq!(file.data, b"\x00\x01binary");
    }

    #[test]
    fn test_parse_multipart_malformed() {
        assert!(parse_multipart(b"no boundary here", "b").is_none());
        assert!(parse_multipart(b"--b\r\nno disposition\r\n\r\nx\r\n--b--", "b").is_none());
        assert!(parse_multipart(
            b"--b\r\nContent-Disposition: form-data\r\n\r\nunterminated",
            "b"
        )
        .is_none());
        assert!(parse_multipart(b"--b\r\nContent-Disposition: form-data\r\n\r\n\r\n--b--", "b").is_none());
    }
}
