//! Target path resolution and `argv[0]` rewriting.
//!
//! Some callers decide which interpreter they are talking to from the simple
//! program name, so `argv[0]` is made to end in the real binary's name while
//! keeping whatever directory the user typed.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::layout::BuildLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argv0Outcome {
    /// `argv[0]` now ends in the real binary's name.
    Rewritten,
    /// The invoked name was at least as long as the real name; kept verbatim.
    LeftAsIs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub program: PathBuf,
    pub argv0: OsString,
    pub outcome: Argv0Outcome,
}

fn is_dir_separator(b: u8) -> bool {
    b == b'/' || (cfg!(windows) && b == b'\\')
}

/// Splits a program name into the directory prefix (trailing separator
/// included, possibly empty) and the simple name.
pub fn split_program_name(arg0: &OsStr) -> (&OsStr, &OsStr) {
    let bytes = arg0.as_encoded_bytes();
    let cut = bytes.iter().rposition(|&b| is_dir_separator(b)).map_or(0, |pos| pos + 1);
    let (dir, base) = bytes.split_at(cut);
    // SAFETY: `cut` is 0 or directly follows an ASCII separator byte.
    unsafe {
        (
            OsStr::from_encoded_bytes_unchecked(dir),
            OsStr::from_encoded_bytes_unchecked(base),
        )
    }
}

/// Replaces the simple name in `arg0` with `real_name` when the invoked name
/// is strictly shorter; otherwise `arg0` is returned unchanged.
pub fn rewrite_argv0(arg0: &OsStr, real_name: &str) -> (OsString, Argv0Outcome) {
    let (dir, base) = split_program_name(arg0);
    if base.len() < real_name.len() {
        let mut rewritten = OsString::with_capacity(dir.len() + real_name.len());
        rewritten.push(dir);
        rewritten.push(real_name);
        (rewritten, Argv0Outcome::Rewritten)
    } else {
        (arg0.to_os_string(), Argv0Outcome::LeftAsIs)
    }
}

pub fn resolve(layout: &BuildLayout, arg0: &OsStr) -> Resolution {
    let (argv0, outcome) = rewrite_argv0(arg0, &layout.ruby_install_name);
    Resolution {
        program: layout.ruby_path(),
        argv0,
        outcome,
    }
}
