//! Access to the process environment, the filesystem and process replacement.
//!
//! The launcher only touches global process state through [`Host`], so the
//! whole launch sequence can run against [`MemoryHost`] in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

pub trait Host {
    fn var_os(&self, name: &str) -> Option<OsString>;

    /// With `overwrite == false` an existing value is kept.
    fn set_var(&mut self, name: &str, value: &OsStr, overwrite: bool);

    fn exists(&self, path: &Path) -> bool;

    /// Replaces the current process image. Only returns on failure.
    fn exec(&mut self, program: &Path, argv: &[OsString]) -> io::Error;
}

/// The real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHost;

impl Host for ProcessHost {
    fn var_os(&self, name: &str) -> Option<OsString> {
        env::var_os(name)
    }

    fn set_var(&mut self, name: &str, value: &OsStr, overwrite: bool) {
        if !overwrite && env::var_os(name).is_some() {
            return;
        }
        env::set_var(name, value);
    }

    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    #[cfg(unix)]
    fn exec(&mut self, program: &Path, argv: &[OsString]) -> io::Error {
        use std::os::unix::process::CommandExt;

        let mut command = Command::new(program);
        if let Some((arg0, args)) = argv.split_first() {
            command.arg0(arg0).args(args);
        }
        command.exec()
    }

    #[cfg(not(unix))]
    fn exec(&mut self, program: &Path, argv: &[OsString]) -> io::Error {
        // No image replacement here: run the interpreter and hand its status back.
        let mut command = Command::new(program);
        command.args(argv.iter().skip(1));
        match command.status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(-1)),
            Err(err) => err,
        }
    }
}

/// In-memory host that records every mutation.
#[derive(Debug, Default, Clone)]
pub struct MemoryHost {
    vars: BTreeMap<String, OsString>,
    paths: BTreeSet<PathBuf>,
    writes: Vec<String>,
    exec_call: Option<(PathBuf, Vec<OsString>)>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: &str, value: impl Into<OsString>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(path.into());
        self
    }

    /// Variable names passed to `set_var`, in call order.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// The program and argument vector of the last `exec` call.
    pub fn exec_call(&self) -> Option<(&Path, &[OsString])> {
        self.exec_call
            .as_ref()
            .map(|(program, argv)| (program.as_path(), argv.as_slice()))
    }
}

impl Host for MemoryHost {
    fn var_os(&self, name: &str) -> Option<OsString> {
        self.vars.get(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: &OsStr, overwrite: bool) {
        self.writes.push(name.to_string());
        if !overwrite && self.vars.contains_key(name) {
            return;
        }
        self.vars.insert(name.to_string(), value.to_os_string());
    }

    fn exists(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    fn exec(&mut self, program: &Path, argv: &[OsString]) -> io::Error {
        self.exec_call = Some((program.to_path_buf(), argv.to_vec()));
        io::Error::from(io::ErrorKind::NotFound)
    }
}
