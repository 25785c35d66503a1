//! Object path and filename sanitization.
//!
//! Final object keys are forward-slash-joined segments. Segments never
//! contain `..`, backslashes, or empty components; everything user-supplied
//! is normalized here before it reaches storage.

use crate::error::{Error, Result};

/// Normalize a caller-supplied folder path.
///
/// Trims leading/trailing slashes and backslashes, converts backslashes to
/// forward slashes, collapses repeated slashes, and rejects any path
/// containing `..`. Returns the cleaned path, which may be empty.
pub fn sanitize_custom_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '/' || c == '\\');
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let mut path = trimmed.replace('\\', "/");
    while path.contains("//") {
        path = path.replace("//", "/");
    }

    if path.contains("..") {
        return Err(Error::InvalidPath(
            "path cannot contain '..'".to_string(),
        ));
    }

    Ok(path)
}

/// Sanitize an original filename into a safe object-key component.
///
/// Keeps `[A-Za-z0-9_-]` in the stem (everything else becomes `_`),
/// collapses runs of underscores, trims them from the ends, and falls back
/// to `file` when nothing survives. The extension is cleaned the same way
/// and reattached.
pub fn sanitize_file_name(filename: &str) -> String {
    if filename.is_empty() {
        return "file".to_string();
    }

    let (stem, ext) = match file_extension(filename) {
        Some(ext) => (&filename[..filename.len() - ext.len()], ext),
        None => (filename, ""),
    };

    let mut clean = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            clean.push(c);
        } else {
            clean.push('_');
        }
    }
    while clean.contains("__") {
        clean = clean.replace("__", "_");
    }
    let mut clean = clean.trim_matches('_').to_string();
    if clean.is_empty() {
        clean = "file".to_string();
    }

    let clean_ext: String = ext
        .chars()
        .skip(1)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if clean_ext.is_empty() {
        clean
    } else {
        format!("{clean}.{clean_ext}")
    }
}

/// Extension of a filename including the leading dot, if present.
///
/// Mirrors `filepath.Ext` semantics: the suffix from the last dot in the
/// final path element. A filename ending in a bare dot yields `Some(".")`.
pub fn file_extension(filename: &str) -> Option<&str> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let dot = base.rfind('.')?;
    let offset = filename.len() - base.len();
    Some(&filename[offset + dot..])
}

/// Join an optional folder path with a file name.
pub fn join_path(custom_path: &str, file_name: &str) -> String {
    if custom_path.is_empty() {
        file_name.to_string()
    } else {
        format!("{custom_path}/{file_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_custom_path_normalizes() {
        assert_eq!(sanitize_custom_path("").unwrap(), "");
        assert_eq!(sanitize_custom_path("  ").unwrap(), "");
        assert_eq!(sanitize_custom_path("/a/b/").unwrap(), "a/b");
        assert_eq!(sanitize_custom_path("a\\b").unwrap(), "a/b");
        assert_eq!(sanitize_custom_path("a//b///c").unwrap(), "a/b/c");
        assert_eq!(sanitize_custom_path("\\\\a\\b\\\\").unwrap(), "a/b");
    }

    #[test]
    fn test_sanitize_custom_path_rejects_traversal() {
        assert!(sanitize_custom_path("../etc").is_err());
        assert!(sanitize_custom_path("a/../b").is_err());
        assert!(sanitize_custom_path("a/..").is_err());
        // Any dot-dot sequence is rejected, even inside a segment name.
        assert!(sanitize_custom_path("a..b/c").is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My File!.PNG"), "My_File.PNG");
        assert_eq!(sanitize_file_name("report v2 (final).pdf"), "report_v2_final.pdf");
        assert_eq!(sanitize_file_name("___.txt"), "file.txt");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("no-ext"), "no-ext");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("out.bin"), Some(".bin"));
        assert_eq!(file_extension("archive.tar.gz"), Some(".gz"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("a/b.c/noext"), None);
        assert_eq!(file_extension("dir/file.txt"), Some(".txt"));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "f.txt"), "f.txt");
        assert_eq!(join_path("a/b", "f.txt"), "a/b/f.txt");
    }
}
