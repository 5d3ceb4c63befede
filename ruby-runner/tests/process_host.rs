use std::ffi::{OsStr, OsString};
use std::fs;

use ruby_runner::{Host, ProcessHost};

#[test]
fn exists_tracks_real_files_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    let host = ProcessHost;

    assert!(host.exists(dir.path()));

    let script = dir.path().join("x86_64-linux-fake.rb");
    assert!(!host.exists(&script));
    fs::write(&script, "# fake\n").unwrap();
    assert!(host.exists(&script));
}

#[test]
fn set_var_without_overwrite_keeps_existing_value() {
    let mut host = ProcessHost;
    let name = "RUBY_RUNNER_TEST_KEEP";

    host.set_var(name, OsStr::new("first"), false);
    host.set_var(name, OsStr::new("second"), false);
    assert_eq!(host.var_os(name), Some(OsString::from("first")));

    host.set_var(name, OsStr::new("third"), true);
    assert_eq!(host.var_os(name), Some(OsString::from("third")));
}

#[test]
fn exec_of_missing_binary_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = ProcessHost;

    let err = host.exec(&dir.path().join("ruby"), &[OsString::from("ruby")]);

    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}
