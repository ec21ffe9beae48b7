//! Canonical path forms for `/`-rooted backends (virtual, remote)

/// Normalize a `/`-separated path to its rooted canonical form.
///
/// Empty and `.` segments are dropped, `..` pops a segment (never above
/// the root). With `backslash_separates`, `\` is treated as `/`.
pub fn normalize_slashed(raw: &str, backslash_separates: bool) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let is_sep = |c: char| c == '/' || (backslash_separates && c == '\\');

    for segment in raw.split(is_sep) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Split a canonical path into its parent and final segment.
///
/// The root has no parent and an empty name.
pub fn split_slashed(canonical: &str) -> (Option<String>, String) {
    if canonical == "/" {
        return (None, String::new());
    }
    match canonical.rfind('/') {
        Some(0) => (Some("/".to_string()), canonical[1..].to_string()),
        Some(idx) => (
            Some(canonical[..idx].to_string()),
            canonical[idx + 1..].to_string(),
        ),
        None => (Some("/".to_string()), canonical.to_string()),
    }
}

/// Join a canonical directory path and a child name
pub fn join_slashed(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether `path` lies strictly below `dir`
pub fn is_below(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path != "/";
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Names that cannot be created as a single path segment
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}
