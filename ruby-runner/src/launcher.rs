use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::argv;
use crate::error::LaunchError;
use crate::exe_path::{self, Argv0Outcome};
use crate::host::Host;
use crate::layout::BuildLayout;
use crate::path_env::{insert_env_path, Position};

pub const RUBYLIB_ENV: &str = "RUBYLIB";
pub const JIT_SEARCH_BUILD_DIR_ENV: &str = "MJIT_SEARCH_BUILD_DIR";

/// Everything needed for the final process-replace call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: PathBuf,
    pub argv: Vec<OsString>,
    pub argv0: Argv0Outcome,
}

/// Runs a build-tree interpreter as though it were installed.
pub struct Launcher<H: Host> {
    layout: BuildLayout,
    host: H,
}

impl<H: Host> Launcher<H> {
    pub fn new(layout: BuildLayout, host: H) -> Self {
        Self { layout, host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Updates the environment and builds the argument vector. Every step
    /// is terminal on failure; nothing is retried.
    pub fn prepare(&mut self, mut args: Vec<OsString>) -> Result<Launch, LaunchError> {
        let layout = &self.layout;
        let sep = layout.path_sep;

        insert_env_path(
            &mut self.host,
            &layout.lib_path_env,
            &layout.build_dir,
            sep,
            Position::Prepend,
        )?;
        insert_env_path(
            &mut self.host,
            RUBYLIB_ENV,
            &layout.ruby_lib(),
            sep,
            Position::Append,
        )?;

        if !layout.load_relative && !layout.preload_env.is_empty() {
            let jit_build_dir = layout.jit_build_dir();
            if self.host.exists(Path::new(&jit_build_dir)) {
                insert_env_path(
                    &mut self.host,
                    &layout.preload_env,
                    &jit_build_dir,
                    sep,
                    Position::Prepend,
                )?;
                self.host
                    .set_var(JIT_SEARCH_BUILD_DIR_ENV, OsStr::new("true"), false);
                tracing::debug!(%jit_build_dir, "enabled JIT header search in build dir");
            }
        }

        let bootstrap = layout.bootstrap_path();
        if !self.host.exists(&bootstrap) {
            return Err(LaunchError::BootstrapMissing { path: bootstrap });
        }
        tracing::debug!(bootstrap = %bootstrap.display(), "found bootstrap script");

        argv::check_argc(args.len())?;

        if args.is_empty() {
            args.push(layout.ruby_path().into_os_string());
        }
        let mut new_argv = argv::inject(&args, OsStr::new(&layout.bootstrap_option()))?;

        let resolution = exe_path::resolve(layout, &new_argv[0]);
        tracing::debug!(
            argv0 = ?resolution.argv0,
            outcome = ?resolution.outcome,
            "resolved program name"
        );
        new_argv[0] = resolution.argv0;

        Ok(Launch {
            program: resolution.program,
            argv: new_argv,
            argv0: resolution.outcome,
        })
    }

    /// Hands control to the interpreter. Returns only when that failed.
    pub fn exec(&mut self, launch: Launch) -> LaunchError {
        tracing::debug!(program = %launch.program.display(), argc = launch.argv.len(), "exec");
        let source = self.host.exec(&launch.program, &launch.argv);
        LaunchError::Exec {
            program: launch.program,
            source,
        }
    }

    pub fn run(&mut self, args: Vec<OsString>) -> LaunchError {
        match self.prepare(args) {
            Ok(launch) => self.exec(launch),
            Err(err) => err,
        }
    }
}
