//! Content-type detection and the MIME extension table.

/// Map a content type to a file extension.
///
/// Unknown types map to `.bin`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    // Strip any parameters (e.g. "text/plain; charset=utf-8").
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    match essence {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/json" => ".json",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "video/mp4" => ".mp4",
        "audio/mpeg" => ".mp3",
        _ => ".bin",
    }
}

/// Detect a content type from the first bytes of a file.
///
/// Checks well-known magic numbers for the formats the service handles and
/// falls back to `text/plain; charset=utf-8` for valid UTF-8, otherwise
/// `application/octet-stream`. Callers pass at most the first 512 bytes.
pub fn detect_content_type(head: &[u8]) -> &'static str {
    if head.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return "image/png";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(&[b'P', b'K', 0x03, 0x04]) {
        return "application/zip";
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if head.starts_with(b"ID3") || head.starts_with(&[0xff, 0xfb]) {
        return "audio/mpeg";
    }

    let text = strip_bom(head);
    if let Ok(s) = std::str::from_utf8(text) {
        let trimmed = s.trim_start();
        if trimmed.starts_with("<!DOCTYPE html") || trimmed.starts_with("<html") {
            return "text/html; charset=utf-8";
        }
        if (trimmed.starts_with("<?xml") && s.contains("<svg")) || trimmed.starts_with("<svg") {
            return "image/svg+xml";
        }
        return "text/plain; charset=utf-8";
    }

    "application/octet-stream"
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(data)
}
