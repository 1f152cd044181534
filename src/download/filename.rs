//! File names announced by the server in `Content-Disposition`.

use crate::naming::path_component;

/// Extracts the raw file name from a `Content-Disposition` header.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example%20file.pdf` (RFC 5987, preferred)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim();
        // charset'language'percent-encoded
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + "filename=".len()..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let name = &stripped[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Resolves a safe local file name from a `Content-Disposition` header.
///
/// Directory parts are stripped before sanitizing, so a hostile
/// `filename="../../etc/passwd"` becomes `passwd`.
pub(crate) fn file_name_from_disposition(header: &str) -> Option<String> {
    let raw = parse_content_disposition(header)?;
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(&raw);
    Some(path_component(base, None))
}
