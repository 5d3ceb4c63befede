use std::ffi::OsString;
use std::path::{Path, PathBuf};

use ruby_runner::launcher::{JIT_SEARCH_BUILD_DIR_ENV, RUBYLIB_ENV};
use ruby_runner::{Argv0Outcome, BuildLayout, Host, LaunchError, Launcher, MemoryHost};

const BOOTSTRAP: &str = "/work/build/x86_64-linux-fake.rb";
const JIT_BUILD_DIR: &str = "/work/build/mjit_build_dir.so";

fn layout() -> BuildLayout {
    BuildLayout {
        build_dir: "/work/build".to_string(),
        src_dir: "/work/src".to_string(),
        ext_out: ".ext".to_string(),
        arch: "x86_64-linux".to_string(),
        ruby_install_name: "ruby".to_string(),
        so_ext: "so".to_string(),
        lib_path_env: "LD_LIBRARY_PATH".to_string(),
        preload_env: "LD_PRELOAD".to_string(),
        path_sep: b':',
        load_relative: false,
    }
}

fn args(list: &[&str]) -> Vec<OsString> {
    list.iter().map(OsString::from).collect()
}

fn var(host: &MemoryHost, name: &str) -> Option<String> {
    host.var_os(name).map(|value| value.to_string_lossy().into_owned())
}

#[test]
fn bootstrap_present_execs_real_binary() {
    let host = MemoryHost::new().with_path(BOOTSTRAP);
    let mut launcher = Launcher::new(layout(), host);

    let err = launcher.run(args(&["./rr"]));

    assert!(matches!(err, LaunchError::Exec { .. }));
    let (program, argv) = launcher.host().exec_call().expect("exec was attempted");
    assert_eq!(program, Path::new("/work/build/ruby"));
    assert_eq!(argv, args(&["./ruby", "-r/work/build/x86_64-linux-fake.rb"]));

    assert_eq!(var(launcher.host(), "LD_LIBRARY_PATH").as_deref(), Some("/work/build"));
    assert_eq!(
        var(launcher.host(), RUBYLIB_ENV).as_deref(),
        Some("/work/src/lib:/work/build/.ext/common:/work/build/.ext/x86_64-linux")
    );
    assert_eq!(var(launcher.host(), "LD_PRELOAD"), None);
    assert_eq!(var(launcher.host(), JIT_SEARCH_BUILD_DIR_ENV), None);
}

#[test]
fn existing_search_paths_are_trimmed_and_kept() {
    let host = MemoryHost::new()
        .with_path(BOOTSTRAP)
        .with_var("LD_LIBRARY_PATH", "::/usr/lib:/opt/lib:")
        .with_var(RUBYLIB_ENV, ":/site");
    let mut launcher = Launcher::new(layout(), host);

    launcher.prepare(args(&["rr"])).unwrap();

    assert_eq!(
        var(launcher.host(), "LD_LIBRARY_PATH").as_deref(),
        Some("/work/build:/usr/lib:/opt/lib")
    );
    assert_eq!(
        var(launcher.host(), RUBYLIB_ENV).as_deref(),
        Some("/site:/work/src/lib:/work/build/.ext/common:/work/build/.ext/x86_64-linux")
    );
}

#[test]
fn forwards_arguments_in_order() {
    let host = MemoryHost::new().with_path(BOOTSTRAP);
    let mut launcher = Launcher::new(layout(), host);

    let launch = launcher
        .prepare(args(&["/usr/bin/ruby-runner", "-w", "test/runner.rb", "--", "-x"]))
        .unwrap();

    assert_eq!(launch.program, PathBuf::from("/work/build/ruby"));
    assert_eq!(launch.argv0, Argv0Outcome::LeftAsIs);
    assert_eq!(
        launch.argv,
        args(&[
            "/usr/bin/ruby-runner",
            "-r/work/build/x86_64-linux-fake.rb",
            "-w",
            "test/runner.rb",
            "--",
            "-x",
        ])
    );
}

#[test]
fn jit_build_dir_enables_preload_and_search_flag() {
    let host = MemoryHost::new()
        .with_path(BOOTSTRAP)
        .with_path(JIT_BUILD_DIR)
        .with_var("LD_PRELOAD", "libfoo.so");
    let mut launcher = Launcher::new(layout(), host);

    launcher.prepare(args(&["rr"])).unwrap();

    assert_eq!(
        var(launcher.host(), "LD_PRELOAD").as_deref(),
        Some("/work/build/mjit_build_dir.so:libfoo.so")
    );
    assert_eq!(var(launcher.host(), JIT_SEARCH_BUILD_DIR_ENV).as_deref(), Some("true"));
    assert_eq!(
        launcher.host().writes(),
        ["LD_LIBRARY_PATH", RUBYLIB_ENV, "LD_PRELOAD", JIT_SEARCH_BUILD_DIR_ENV]
    );
}

#[test]
fn jit_search_flag_does_not_overwrite_caller_value() {
    let host = MemoryHost::new()
        .with_path(BOOTSTRAP)
        .with_path(JIT_BUILD_DIR)
        .with_var(JIT_SEARCH_BUILD_DIR_ENV, "false");
    let mut launcher = Launcher::new(layout(), host);

    launcher.prepare(args(&["rr"])).unwrap();

    assert_eq!(var(launcher.host(), JIT_SEARCH_BUILD_DIR_ENV).as_deref(), Some("false"));
}

#[test]
fn missing_bootstrap_is_fatal_before_exec() {
    let mut launcher = Launcher::new(layout(), MemoryHost::new());

    let err = launcher.run(args(&["rr", "-e", "1"]));

    match &err {
        LaunchError::BootstrapMissing { path } => assert_eq!(path, Path::new(BOOTSTRAP)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "fake file not found: /work/build/x86_64-linux-fake.rb"
    );
    assert!(launcher.host().exec_call().is_none());
}

#[test]
fn exec_failure_reports_target_and_os_error() {
    let host = MemoryHost::new().with_path(BOOTSTRAP);
    let mut launcher = Launcher::new(layout(), host);

    let err = launcher.run(args(&["rr"]));

    let LaunchError::Exec { program, source } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(program, Path::new("/work/build/ruby"));
    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
    assert!(err.to_string().starts_with("/work/build/ruby: "));
}

#[test]
fn too_many_arguments_is_fatal_before_allocation() {
    // The bound is checked on the count alone, so no vector of that size is built.
    let err = ruby_runner::argv::check_argc(usize::MAX).unwrap_err();
    assert!(matches!(err, LaunchError::TooManyArguments { argc: usize::MAX }));
    assert!(err.to_string().starts_with("cannot insert fake.rb path"));
}
