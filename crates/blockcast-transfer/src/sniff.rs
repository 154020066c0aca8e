/// Payload-type detection from leading magic bytes.
///
/// Deliberately narrow: only the signatures the system actually receives.
/// Unknown payloads fall back to a generic binary extension.

/// File extension for a reassembled payload, chosen by signature.
pub fn detect_extension(data: &[u8]) -> &'static str {
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8 {
        return ".jpg";
    }
    if data.len() >= 4 && data[..4] == [0x89, 0x50, 0x4E, 0x47] {
        return ".png";
    }
    if data.len() >= 4 && data[..4] == [0x47, 0x49, 0x46, 0x38] {
        return ".gif";
    }
    ".bin"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signatures() {
        assert_eq!(detect_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), ".jpg");
        assert_eq!(detect_extension(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), ".png");
        assert_eq!(detect_extension(b"GIF89a"), ".gif");
    }

    #[test]
    fn unknown_payload_is_binary() {
        assert_eq!(detect_extension(b"hello world"), ".bin");
        assert_eq!(detect_extension(&[]), ".bin");
        // A lone 0xFF is not enough for JPEG.
        assert_eq!(detect_extension(&[0xFF]), ".bin");
        // PNG needs all four signature bytes.
        assert_eq!(detect_extension(&[0x89, 0x50, 0x00, 0x00]), ".bin");
    }
}
