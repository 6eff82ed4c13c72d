use std::path::Path;

const SIGNATURE_HI: u32 = 0x8950_4E47;
const SIGNATURE_LO: u32 = 0x0D0A_1A0A;

/// Chunk written by the capture tool holding the whole JSON payload.
const PACKAGE_CHUNK: &[u8; 4] = b"PngP";
const ITXT_CHUNK: &[u8; 4] = b"iTXt";
const DESCRIPTION_KEYWORD: &[u8] = b"Description";

const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// Only `.png` uploads are scanned for embedded metadata.
pub fn should_extract(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

/// Pulls the embedded metadata payload out of a PNG byte stream.
///
/// Returns the data of the first `PngP` chunk, or the text of the first
/// `iTXt` chunk keyed `Description`, whichever comes first in the stream.
/// Anything that is not a PNG, or is truncated before a match, yields `None`.
/// Text is decoded lossily: invalid UTF-8 becomes U+FFFD.
pub fn extract(buffer: &[u8]) -> Option<String> {
    if read_u32(buffer, 0)? != SIGNATURE_HI || read_u32(buffer, 4)? != SIGNATURE_LO {
        return None;
    }

    let mut offset = HEADER_LEN;
    while offset < buffer.len() {
        let length = read_u32(buffer, offset)? as usize;
        let chunk_type = buffer.get(offset + 4..offset + HEADER_LEN)?;

        let data_start = offset + HEADER_LEN;
        let data_end = data_start.checked_add(length)?;
        let data = buffer.get(data_start..data_end)?;

        if chunk_type == PACKAGE_CHUNK {
            return Some(String::from_utf8_lossy(data).into_owned());
        }
        if chunk_type == ITXT_CHUNK {
            if let Some(text) = description_text(data) {
                return Some(text);
            }
        }

        offset = data_end.checked_add(CRC_LEN)?;
    }
    None
}

/// `keyword\0 flag method language\0 translated\0 text`
fn description_text(data: &[u8]) -> Option<String> {
    let keyword_end = data.iter().position(|&b| b == 0)?;
    if &data[..keyword_end] != DESCRIPTION_KEYWORD {
        return None;
    }

    // compression flag and method
    let mut ptr = keyword_end + 1 + 2;
    ptr = skip_terminated(data, ptr);
    ptr = skip_terminated(data, ptr);
    if ptr >= data.len() {
        return None;
    }

    let text: Vec<u8> = data[ptr..].iter().copied().filter(|&b| b != 0).collect();
    Some(String::from_utf8_lossy(&text).into_owned())
}

/// Index just past the next NUL at or after `from`, or past the end.
fn skip_terminated(data: &[u8], from: usize) -> usize {
    match data.get(from..).and_then(|rest| rest.iter().position(|&b| b == 0)) {
        Some(pos) => from + pos + 1,
        None => data.len(),
    }
}

fn read_u32(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_rejects_foreign_buffers() {
        assert_eq!(extract(b""), None);
        assert_eq!(extract(b"\x89PNG"), None);
        assert_eq!(extract(b"GIF89a\x00\x00\x00\x00\x00\x00"), None);

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend_from_slice(&chunk(b"PngP", b"{}"));
        assert_eq!(extract(&jpeg), None);
    }

    #[test]
    fn test_bare_signature_yields_nothing() {
        assert_eq!(extract(&SIGNATURE), None);
    }

    #[test]
    fn test_package_chunk_returned_verbatim() {
        let payload = r#"{"world":{"name":"Forest"},"date":"2024-05-01T10:00:00Z"}"#;
        let buf = png(&[
            chunk(b"IHDR", &[0; 13]),
            chunk(b"PngP", payload.as_bytes()),
            chunk(b"IEND", &[]),
        ]);
        assert_eq!(extract(&buf).as_deref(), Some(payload));
    }

    #[test]
    fn test_first_match_wins() {
        let buf = png(&[
            chunk(b"PngP", b"package"),
            itxt("Description", "", "", b"description"),
        ]);
        assert_eq!(extract(&buf).as_deref(), Some("package"));

        let buf = png(&[
            itxt("Description", "", "", b"description"),
            chunk(b"PngP", b"package"),
        ]);
        assert_eq!(extract(&buf).as_deref(), Some("description"));
    }

    #[test]
    fn test_description_itxt_strips_nul_bytes() {
        let buf = png(&[
            chunk(b"IHDR", &[0; 13]),
            itxt("Description", "en", "Beschreibung", b"{\"a\":\0\"b\"}\0"),
        ]);
        assert_eq!(extract(&buf).as_deref(), Some("{\"a\":\"b\"}"));
    }

    #[test]
    fn test_other_itxt_keywords_are_skipped() {
        let buf = png(&[
            itxt("Comment", "", "", b"ignored"),
            itxt("description", "", "", b"case matters"),
            itxt("Description", "", "", b"kept"),
        ]);
        assert_eq!(extract(&buf).as_deref(), Some("kept"));
    }

    #[test]
    fn test_itxt_without_text_continues_scan() {
        let mut data = b"Description\0\0\0".to_vec();
        data.extend_from_slice(b"en");
        let buf = png(&[chunk(b"iTXt", &data), chunk(b"PngP", b"later")]);
        assert_eq!(extract(&buf).as_deref(), Some("later"));
    }

    #[test]
    fn test_truncated_chunk_returns_none() {
        let mut buf = png(&[chunk(b"IHDR", &[0; 13])]);
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(b"PngP");
        buf.extend_from_slice(b"short");
        assert_eq!(extract(&buf), None);
    }

    #[test]
    fn test_partial_header_returns_none() {
        let mut buf = SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, 0, 0]);
        assert_eq!(extract(&buf), None);
    }

    #[test]
    fn test_huge_declared_length_does_not_overflow() {
        let mut buf = SIGNATURE.to_vec();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        buf.extend_from_slice(b"tEXt");
        assert_eq!(extract(&buf), None);
    }

    #[test]
    fn test_missing_trailing_crc_after_match_still_returns() {
        let mut buf = SIGNATURE.to_vec();
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(b"PngP");
        buf.extend_from_slice(b"{}");
        assert_eq!(extract(&buf).as_deref(), Some("{}"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let buf = png(&[chunk(b"PngP", &[b'a', 0xFF, b'b'])]);
        assert_eq!(extract(&buf).as_deref(), Some("a\u{FFFD}b"));
    }

    #[test]
    fn test_should_extract_by_extension() {
        assert!(should_extract("shot.png"));
        assert!(should_extract("SHOT.PNG"));
        assert!(!should_extract("shot.jpg"));
        assert!(!should_extract("png"));
        assert!(!should_extract("archive.png.zip"));
    }
}
