//! Composition of search-path variables (`LD_LIBRARY_PATH`, `RUBYLIB`, ...).

use std::ffi::{OsStr, OsString};

use crate::error::LaunchError;
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Build-tree paths go in front of the existing value.
    Prepend,
    /// Build-tree paths go after the existing value.
    Append,
}

/// Strips leading and trailing runs of `sep`. Inner separators are kept.
pub fn trim_separators(value: &OsStr, sep: u8) -> &OsStr {
    debug_assert!(sep.is_ascii());
    let bytes = value.as_encoded_bytes();
    let start = bytes.iter().position(|&b| b != sep).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != sep).map_or(start, |last| last + 1);
    // SAFETY: both cut points sit at an end of the string or next to an ASCII
    // byte, which are valid boundaries of the encoding.
    unsafe { OsStr::from_encoded_bytes_unchecked(&bytes[start..end]) }
}

/// New value for a search-path variable whose current value is `current`.
pub fn compose(
    current: Option<&OsStr>,
    paths: &str,
    sep: u8,
    position: Position,
) -> Result<OsString, LaunchError> {
    let existing = current.map_or(OsStr::new(""), |value| trim_separators(value, sep));
    if existing.is_empty() {
        return Ok(OsString::from(paths));
    }

    let mut value = OsString::new();
    value
        .try_reserve_exact(paths.len() + 1 + existing.len())
        .map_err(|_| LaunchError::OutOfMemory { what: "environment value" })?;

    let mut sep_buf = [0u8; 4];
    let sep = char::from(sep).encode_utf8(&mut sep_buf);
    match position {
        Position::Prepend => {
            value.push(paths);
            value.push(&*sep);
            value.push(existing);
        }
        Position::Append => {
            value.push(existing);
            value.push(&*sep);
            value.push(paths);
        }
    }
    Ok(value)
}

/// Reads `name`, composes it with `paths` and writes the result back.
pub fn insert_env_path<H: Host + ?Sized>(
    host: &mut H,
    name: &str,
    paths: &str,
    sep: u8,
    position: Position,
) -> Result<OsString, LaunchError> {
    let current = host.var_os(name);
    let value = compose(current.as_deref(), paths, sep, position)?;
    host.set_var(name, &value, true);
    tracing::debug!(name, value = ?value, ?position, "composed search path");
    Ok(value)
}
