use std::path::{Path, PathBuf};

/// Characters that are never allowed in a stored filename.
pub const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Sanitize a title for safe filesystem usage.
///
/// Every run of whitespace becomes a single underscore, then the reserved
/// characters `< > : " / \ | ? *` are removed. The information separators
/// U+001C..U+001F count as whitespace.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;

    for c in name.chars() {
        if is_separator(c) {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if !RESERVED_CHARS.contains(&c) {
            out.push(c);
        }
    }

    out
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Remove reserved and control characters but keep the title readable.
///
/// Leading dots are trimmed so the result can never name a hidden file or
/// a parent directory.
pub fn strip_reserved(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !RESERVED_CHARS.contains(c) && !c.is_control())
        .collect();

    stripped.trim().trim_start_matches('.').trim().to_string()
}

/// Check that a name refers to a plain file directly inside a directory
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Pick a filename that does not exist yet in `dir`.
///
/// `stem.ext` is tried first, then `stem (1).ext`, `stem (2).ext`, ...
pub fn unique_file_name(dir: &Path, stem: &str, extension: &str) -> String {
    let candidate = format!("{}.{}", stem, extension);
    if !dir.join(&candidate).exists() {
        return candidate;
    }

    let mut n = 1u32;
    loop {
        let candidate = format!("{} ({}).{}", stem, n, extension);
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Convert a byte count to megabytes
pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format a size stored in megabytes
pub fn format_megabytes(size_mb: f64) -> String {
    format_file_size((size_mb.max(0.0) * BYTES_PER_MEGABYTE).round() as u64)
}

/// Check if a command is available, either in PATH or at an explicit location
pub async fn check_command_available(
    command: impl AsRef<std::ffi::OsStr>,
    version_flag: &str,
) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Locate an executable by name in the directories listed in `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
