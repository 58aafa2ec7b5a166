//! MIME type detection for uploads.

/// Fallback when neither the content nor the name give anything away.
pub const FALLBACK_MIME_TYPE: &str = "text/plain";

/// Guess a MIME type from the leading bytes of the content, then from the
/// file name's extension.
///
/// ```
/// use drivefs_storage::mime::guess_mime_type;
///
/// assert_eq!(guess_mime_type("photo", Some(b"\x89PNG\r\n\x1a\n")), "image/png");
/// assert_eq!(guess_mime_type("notes.json", Some(b"{}")), "application/json");
/// assert_eq!(guess_mime_type("notes", None), "text/plain");
/// ```
pub fn guess_mime_type(name: &str, buffer: Option<&[u8]>) -> String {
    if let Some(buffer) = buffer
        && let Some(kind) = infer::get(buffer)
    {
        return kind.mime_type().to_string();
    }
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.pdf", b"%PDF-1.7\n", "application/pdf")]
    #[case("misnamed.txt", b"\xFF\xD8\xFF\xE0\x00\x10JFIF", "image/jpeg")]
    #[case("page.html", b"<p>hi</p>", "text/html")]
    #[case("data.csv", b"a,b\n1,2\n", "text/csv")]
    #[case("noext", b"hello", "text/plain")]
    fn test_guess(#[case] name: &str, #[case] buffer: &[u8], #[case] expected: &str) {
        assert_eq!(guess_mime_type(name, Some(buffer)), expected);
    }
}
