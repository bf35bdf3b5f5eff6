//! Single-token access to kernel pseudo-files.
//!
//! cgroupfs and sysfs files hold one short value each. These helpers read the
//! first whitespace-delimited token (or the first line), write a token, or
//! swap a token while remembering the previous one so it can be restored.

use std::path::Path;

use runexcl_common::error::{Result, RunexclError};

fn io_error(path: &Path, source: std::io::Error) -> RunexclError {
    RunexclError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn first_token(content: &str) -> String {
    content.split_whitespace().next().unwrap_or_default().to_owned()
}

/// Reads the whole content of a pseudo-file.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if the file cannot be opened or read.
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| io_error(path, e))
}

/// Reads the first whitespace-delimited token. An empty file yields an empty
/// string.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if the file cannot be opened or read.
pub fn read(path: &Path) -> Result<String> {
    read_to_string(path).map(|content| first_token(&content))
}

/// Reads the first line without its terminator.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if the file cannot be opened or read.
pub fn read_line(path: &Path) -> Result<String> {
    let content = read_to_string(path)?;
    Ok(content.lines().next().unwrap_or_default().to_owned())
}

/// Writes `token` to a pseudo-file in a single write.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if the file cannot be opened or the kernel
/// rejects the value.
pub fn write(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, token).map_err(|e| io_error(path, e))?;
    tracing::trace!(path = %path.display(), token, "sysfs write");
    Ok(())
}

/// Replaces the token in a pseudo-file and returns the one it held before.
///
/// # Errors
///
/// Returns [`RunexclError::Io`] if reading the old value or writing the new
/// one fails.
pub fn change(path: &Path, token: &str) -> Result<String> {
    let previous = read(path)?;
    write(path, token)?;
    tracing::debug!(path = %path.display(), previous, token, "sysfs value changed");
    Ok(previous)
}
