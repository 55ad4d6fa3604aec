//! Logical path and display-name rules.
//!
//! Logical paths are virtual: they never touch the local filesystem. The grammar is
//! `/` or `/seg(/seg)*` where a segment is non-empty, has no `/`, `\` or NUL, is not
//! `.` or `..`, and is at most [`MAX_SEGMENT_LEN`] bytes.

use crate::error::{Error, Result};

/// Maximum length of a single path segment or display name, in bytes.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Highest numeric suffix probed before falling back to a random one.
pub const MAX_NAME_PROBES: u32 = 10_000;

/// Normalize a client-supplied folder path to absolute form.
///
/// Empty input means `/`. Backslashes become slashes, and `.`, `..` and repeated
/// slashes are resolved lexically. Returns an empty string when the input contains
/// a NUL byte, climbs above the root, or has an over-long segment; callers treat
/// that as a bad request.
pub fn sanitize_logical_path(input: &str) -> String {
    if input.contains('\0') {
        return String::new();
    }
    let normalized = input.trim().replace('\\', "/");
    if normalized.is_empty() {
        return "/".to_string();
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return String::new();
                }
            }
            seg if seg.len() > MAX_SEGMENT_LEN => return String::new(),
            seg => segments.push(seg),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Validate a new folder leaf name.
pub fn sanitize_folder_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidName("folder name is empty".to_string()));
    }
    if name.contains('/') || name.contains("..") {
        return Err(Error::InvalidName(format!(
            "folder name may not contain '/' or '..': {name}"
        )));
    }
    if name.contains('\\') || name.contains('\0') || name == "." {
        return Err(Error::InvalidName(format!("invalid folder name: {name}")));
    }
    if name.len() > MAX_SEGMENT_LEN {
        return Err(Error::InvalidName(format!(
            "folder name exceeds {MAX_SEGMENT_LEN} bytes"
        )));
    }
    Ok(name.to_string())
}

/// Reduce a client-supplied filename to a safe display name.
///
/// Browsers sometimes send full client paths; only the final component is kept.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(Error::InvalidName("filename contains a NUL byte".to_string()));
    }
    let normalized = raw.replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => Err(Error::InvalidName(format!("invalid filename: {raw:?}"))),
        name if name.len() > MAX_SEGMENT_LEN => Err(Error::InvalidName(format!(
            "filename exceeds {MAX_SEGMENT_LEN} bytes"
        ))),
        name => Ok(name.to_string()),
    }
}

/// Escape `\`, `%` and `_` for use in a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `LIKE` pattern matching every strict descendant of `folder`.
pub fn descendant_pattern(folder: &str) -> String {
    if folder == "/" {
        "/%".to_string()
    } else {
        format!("{}/%", escape_like(folder))
    }
}

/// Join a sanitized folder and a validated leaf name.
pub fn join(folder: &str, name: &str) -> String {
    if folder == "/" {
        format!("/{name}")
    } else {
        format!("{folder}/{name}")
    }
}

/// Split a display name into stem and extension (`"a.tar.gz"` → `("a.tar", ".gz")`).
/// Dotfiles keep their leading dot in the stem.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Extension of a filename including the dot, or an empty string.
pub fn extension(name: &str) -> &str {
    split_extension(name).1
}

/// The `n`-th collision candidate: `"{stem} ({n}){ext}"`.
pub fn numbered_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem} ({n}){ext}")
}

/// Fallback candidate once numeric probes are exhausted: `"{stem} ({suffix}){ext}"`.
pub fn suffixed_name(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem} ({suffix}){ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_logical_path_normalizes() {
        assert_eq!(sanitize_logical_path(""), "/");
        assert_eq!(sanitize_logical_path("/"), "/");
        assert_eq!(sanitize_logical_path("docs"), "/docs");
        assert_eq!(sanitize_logical_path("/docs/"), "/docs");
        assert_eq!(sanitize_logical_path("//docs///2024//"), "/docs/2024");
        assert_eq!(sanitize_logical_path("\\docs\\2024"), "/docs/2024");
        assert_eq!(sanitize_logical_path("/docs/./a/../b"), "/docs/b");
    }

    #[test]
    fn test_sanitize_logical_path_rejects() {
        assert_eq!(sanitize_logical_path("../etc"), "");
        assert_eq!(sanitize_logical_path("/a/../../etc"), "");
        assert_eq!(sanitize_logical_path("/docs\0/x"), "");
        assert_eq!(sanitize_logical_path(&format!("/{}", "a".repeat(256))), "");
    }

    #[test]
    fn test_sanitize_logical_path_is_idempotent() {
        let inputs = [
            "",
            "a/b/c",
            "/a//b/",
            "\\x\\y",
            "/a/./b/../c",
            "/with space/ok",
            "/100%_done",
        ];
        for input in inputs {
            let once = sanitize_logical_path(input);
            assert!(!once.is_empty(), "{input:?} should be accepted");
            assert_eq!(sanitize_logical_path(&once), once);
            assert!(!once.contains("//"));
            assert!(!once.contains(".."));
            assert!(once == "/" || !once.ends_with('/'));
        }
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("  photos ").unwrap(), "photos");
        assert!(sanitize_folder_name("").is_err());
        assert!(sanitize_folder_name("a/b").is_err());
        assert!(sanitize_folder_name("..").is_err());
        assert!(sanitize_folder_name("x..y").is_err());
        assert!(sanitize_folder_name(&"n".repeat(256)).is_err());
        assert!(sanitize_folder_name(&"n".repeat(255)).is_ok());
    }

    #[test]
    fn test_sanitize_filename_keeps_basename() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\report.pdf").unwrap(),
            "report.pdf"
        );
        assert_eq!(sanitize_filename("/tmp/x/notes.txt").unwrap(), "notes.txt");
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("/a_b"), "/a\\_b");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(descendant_pattern("/a_b"), "/a\\_b/%");
        assert_eq!(descendant_pattern("/"), "/%");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(numbered_name("report.pdf", 1), "report (1).pdf");
        assert_eq!(numbered_name("archive.tar.gz", 2), "archive.tar (2).gz");
        assert_eq!(numbered_name("README", 3), "README (3)");
        assert_eq!(numbered_name(".env", 1), ".env (1)");
        assert_eq!(suffixed_name("a.txt", "deadbeef"), "a (deadbeef).txt");
        assert_eq!(extension("photo.JPG"), ".JPG");
        assert_eq!(extension("noext"), "");
    }
}
