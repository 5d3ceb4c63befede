//! Test runner for ruby-runner
//!
//! This test runner validates the trampoline end to end by:
//! 1. Setting up a scratch build tree (interpreter binary, fake.rb, source dir)
//! 2. Using the finalizer to bake that layout into a copy of the template
//! 3. Running the finalized runner with the `fake-ruby` stand-in interpreter
//! 4. Checking the argv and environment the stand-in reports back as JSON
//!
//! Usage: test-runner --template <path> --finalizer <path> --fake-ruby <path> [--work-dir <dir>]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use ruby_runner::launcher::{JIT_SEARCH_BUILD_DIR_ENV, RUBYLIB_ENV};
use ruby_runner::layout::platform::{LIB_PATH_ENV, PATH_SEP};
use serde_json::Value;

/// Executable extension
#[cfg(windows)]
const EXE_EXT: &str = ".exe";
#[cfg(not(windows))]
const EXE_EXT: &str = "";

const ARCH: &str = "x86_64-testos";
const SO_EXT: &str = "so";
const EXT_OUT: &str = ".ext";

/// Preload variable used by the tests, so nothing is really preloaded.
const TEST_PRELOAD_ENV: &str = "RUBY_RUNNER_TEST_PRELOAD";

/// Test configuration
struct TestConfig {
    /// Path to the ruby-runner template binary
    template_path: PathBuf,
    /// Path to the finalize-runner binary
    finalizer_path: PathBuf,
    /// Path to the fake-ruby stand-in interpreter
    fake_ruby_path: PathBuf,
    /// Working directory for test artifacts
    work_dir: PathBuf,
}

/// Scratch build and source tree for a single test
struct BuildTree {
    build_dir: PathBuf,
    src_dir: PathBuf,
}

/// What fake-ruby saw
struct Report {
    argv: Vec<String>,
    env: serde_json::Map<String, Value>,
}

/// Outcome of running a finalized runner
struct RunOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl TestConfig {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        let mut template_path = None;
        let mut finalizer_path = None;
        let mut fake_ruby_path = None;
        let mut work_dir = None;

        let mut i = 1;
        while i < args.len() {
            let value = || {
                args.get(i + 1)
                    .map(PathBuf::from)
                    .ok_or_else(|| format!("{} requires a value", args[i]))
            };
            match args[i].as_str() {
                "--template" => template_path = Some(value()?),
                "--finalizer" => finalizer_path = Some(value()?),
                "--fake-ruby" => fake_ruby_path = Some(value()?),
                "--work-dir" => work_dir = Some(value()?),
                "--help" | "-h" => {
                    println!("Usage: test-runner --template <path> --finalizer <path> --fake-ruby <path> [--work-dir <dir>]");
                    println!();
                    println!("Options:");
                    println!("  --template    Path to ruby-runner template binary");
                    println!("  --finalizer   Path to finalize-runner binary");
                    println!("  --fake-ruby   Path to fake-ruby binary");
                    println!("  --work-dir    Working directory for test artifacts (default: temp dir)");
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("Unknown argument: {}", args[i]));
                }
            }
            i += 2;
        }

        let template_path = template_path.ok_or("--template is required")?;
        let finalizer_path = finalizer_path.ok_or("--finalizer is required")?;
        let fake_ruby_path = fake_ruby_path.ok_or("--fake-ruby is required")?;
        let work_dir = work_dir.unwrap_or_else(|| env::temp_dir().join("ruby-runner-tests"));

        for (what, path) in [
            ("Template", &template_path),
            ("Finalizer", &finalizer_path),
            ("fake-ruby", &fake_ruby_path),
        ] {
            if !path.exists() {
                return Err(format!("{} not found: {}", what, path.display()));
            }
        }

        Ok(Self {
            template_path,
            finalizer_path,
            fake_ruby_path,
            work_dir,
        })
    }
}

impl BuildTree {
    /// Create an empty build and source tree under `base_dir`
    fn new(base_dir: &Path) -> Result<Self, String> {
        let build_dir = base_dir.join("build");
        let src_dir = base_dir.join("src");
        for dir in [&build_dir, &src_dir.join("lib")] {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(Self { build_dir, src_dir })
    }

    fn ruby_install_name() -> String {
        format!("ruby{}", EXE_EXT)
    }

    fn ruby_path(&self) -> PathBuf {
        self.build_dir.join(Self::ruby_install_name())
    }

    fn bootstrap_path(&self) -> String {
        format!("{}/{}-fake.rb", self.build_dir.display(), ARCH)
    }

    fn jit_build_dir(&self) -> String {
        format!("{}/mjit_build_dir.{}", self.build_dir.display(), SO_EXT)
    }

    /// Install fake-ruby as the build tree's interpreter binary
    fn install_interpreter(&self, config: &TestConfig) -> Result<(), String> {
        let dest = self.ruby_path();
        fs::copy(&config.fake_ruby_path, &dest)
            .map_err(|e| format!("Failed to install interpreter: {}", e))?;
        make_executable(&dest)
    }

    fn add_bootstrap(&self) -> Result<(), String> {
        fs::write(self.bootstrap_path(), "# fake.rb\n")
            .map_err(|e| format!("Failed to write fake.rb: {}", e))
    }

    fn add_jit_build_dir(&self) -> Result<(), String> {
        fs::create_dir_all(self.jit_build_dir())
            .map_err(|e| format!("Failed to create JIT build dir: {}", e))
    }

    fn expected_ruby_lib(&self) -> String {
        let sep = char::from(PATH_SEP);
        let ext = format!("{}/{}", self.build_dir.display(), EXT_OUT);
        format!("{}/lib{sep}{ext}/common{sep}{ext}/{}", self.src_dir.display(), ARCH)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| format!("Failed to get permissions: {}", e))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).map_err(|e| format!("Failed to set permissions: {}", e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}

fn test_dir(config: &TestConfig, name: &str) -> Result<PathBuf, String> {
    let dir = config.work_dir.join(name);
    fs::create_dir_all(dir.join("bin")).map_err(|e| format!("Failed to create test dir: {}", e))?;
    Ok(dir)
}

/// Finalize a runner for `tree`, written to `output_path`
fn finalize_runner(
    config: &TestConfig,
    tree: &BuildTree,
    output_path: &Path,
    extra_flags: &[&str],
) -> Result<(), String> {
    let mut cmd = Command::new(&config.finalizer_path);
    cmd.arg("--template").arg(&config.template_path);
    cmd.arg("--output").arg(output_path);
    cmd.arg("--build-dir").arg(&tree.build_dir);
    cmd.arg("--src-dir").arg(&tree.src_dir);
    cmd.arg("--arch").arg(ARCH);
    cmd.arg("--ext-out").arg(EXT_OUT);
    cmd.arg("--ruby-install-name").arg(BuildTree::ruby_install_name());
    cmd.arg("--so-ext").arg(SO_EXT);
    cmd.arg("--preload-env").arg(TEST_PRELOAD_ENV);
    cmd.args(extra_flags);

    let output = cmd.output().map_err(|e| format!("Failed to run finalizer: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("Finalizer failed: {}", stderr));
    }

    Ok(())
}

/// Run a runner with a controlled environment. `None` removes the variable.
fn run_runner(
    runner_path: &Path,
    args: &[&str],
    vars: &[(&str, Option<&str>)],
) -> Result<RunOutput, String> {
    let mut cmd = Command::new(runner_path);
    cmd.args(args);

    for name in [LIB_PATH_ENV, RUBYLIB_ENV, TEST_PRELOAD_ENV, JIT_SEARCH_BUILD_DIR_ENV] {
        // PATH is the library path on Windows and must stay usable
        if name != "PATH" {
            cmd.env_remove(name);
        }
    }
    for (name, value) in vars {
        match value {
            Some(value) => cmd.env(name, value),
            None => cmd.env_remove(name),
        };
    }

    let output = cmd.output().map_err(|e| format!("Failed to run runner: {}", e))?;

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

fn parse_report(output: &RunOutput) -> Result<Report, String> {
    if output.exit_code != 0 {
        return Err(format!(
            "Runner failed with exit code {}: {}",
            output.exit_code, output.stderr
        ));
    }

    let value: Value = serde_json::from_str(output.stdout.trim())
        .map_err(|e| format!("Unexpected output {:?}: {}", output.stdout, e))?;

    let argv = value["argv"]
        .as_array()
        .ok_or("Report has no argv")?
        .iter()
        .map(|arg| arg.as_str().unwrap_or_default().to_string())
        .collect();
    let env = value["env"].as_object().ok_or("Report has no env")?.clone();

    Ok(Report { argv, env })
}

impl Report {
    fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).and_then(Value::as_str)
    }

    fn expect_var(&self, name: &str, expected: Option<&str>) -> Result<(), String> {
        if self.var(name) != expected {
            return Err(format!(
                "{} should be {:?} but was {:?}",
                name,
                expected,
                self.var(name)
            ));
        }
        Ok(())
    }
}

/// Test: runner execs the interpreter with fake.rb injected and paths composed
fn test_bootstrap_present(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: bootstrap_present");

    let dir = test_dir(config, "test_bootstrap_present")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;
    tree.add_bootstrap()?;

    // shorter than the interpreter's name, so argv[0] gets rewritten
    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let sep = char::from(PATH_SEP);
    let existing = format!("{sep}/usr/lib{sep}");
    let vars: Vec<(&str, Option<&str>)> = if LIB_PATH_ENV != "PATH" {
        vec![(LIB_PATH_ENV, Some(existing.as_str()))]
    } else {
        Vec::new()
    };
    let output = run_runner(&runner, &["-e", "p 1", "--", "arg with spaces"], &vars)?;
    let report = parse_report(&output)?;

    let fake_opt = format!("-r{}", tree.bootstrap_path());
    if report.argv.len() != 6 {
        return Err(format!("Expected 6 arguments but got: {:?}", report.argv));
    }
    if report.argv[1..] != [fake_opt.as_str(), "-e", "p 1", "--", "arg with spaces"] {
        return Err(format!("Arguments not forwarded in order: {:?}", report.argv));
    }

    if cfg!(unix) {
        let expected_arg0 = dir.join("bin").join(BuildTree::ruby_install_name());
        if report.argv[0] != expected_arg0.to_string_lossy() {
            return Err(format!(
                "argv[0] should be {} but was {}",
                expected_arg0.display(),
                report.argv[0]
            ));
        }
    }

    if LIB_PATH_ENV != "PATH" {
        let expected = format!("{}{sep}/usr/lib", tree.build_dir.display());
        report.expect_var(LIB_PATH_ENV, Some(expected.as_str()))?;
    }
    report.expect_var(RUBYLIB_ENV, Some(tree.expected_ruby_lib().as_str()))?;
    report.expect_var(TEST_PRELOAD_ENV, None)?;
    report.expect_var(JIT_SEARCH_BUILD_DIR_ENV, None)?;

    println!("    PASS");

    Ok(())
}

/// Test: a program name at least as long as the interpreter's is kept
fn test_long_program_name(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: long_program_name");

    let dir = test_dir(config, "test_long_program_name")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;
    tree.add_bootstrap()?;

    let runner = dir.join("bin").join(format!("ruby-runner{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let output = run_runner(&runner, &[], &[(RUBYLIB_ENV, Some("/site"))])?;
    let report = parse_report(&output)?;

    if cfg!(unix) && report.argv[0] != runner.to_string_lossy() {
        return Err(format!(
            "argv[0] should be left as {} but was {}",
            runner.display(),
            report.argv[0]
        ));
    }

    let expected = format!("/site{}{}", char::from(PATH_SEP), tree.expected_ruby_lib());
    report.expect_var(RUBYLIB_ENV, Some(expected.as_str()))?;

    println!("    PASS");

    Ok(())
}

/// Test: missing fake.rb is fatal and the interpreter never runs
fn test_bootstrap_missing(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: bootstrap_missing");

    let dir = test_dir(config, "test_bootstrap_missing")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;

    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let output = run_runner(&runner, &["-v"], &[])?;

    if output.exit_code == 0 {
        return Err("Runner should fail without fake.rb".to_string());
    }
    if !output.stderr.contains("fake file not found") {
        return Err(format!("Unexpected diagnostic: {}", output.stderr));
    }
    if !output.stdout.is_empty() {
        return Err(format!("Interpreter should not have run: {}", output.stdout));
    }

    println!("    PASS");

    Ok(())
}

/// Test: JIT build dir present enables preload and the search flag
fn test_jit_build_dir(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: jit_build_dir");

    let dir = test_dir(config, "test_jit_build_dir")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;
    tree.add_bootstrap()?;
    tree.add_jit_build_dir()?;

    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let output = run_runner(&runner, &[], &[(TEST_PRELOAD_ENV, Some("/opt/libfoo.so"))])?;
    let report = parse_report(&output)?;

    let expected = format!("{}{}/opt/libfoo.so", tree.jit_build_dir(), char::from(PATH_SEP));
    report.expect_var(TEST_PRELOAD_ENV, Some(expected.as_str()))?;
    report.expect_var(JIT_SEARCH_BUILD_DIR_ENV, Some("true"))?;

    println!("    PASS (flag set)");

    // A caller-provided flag wins
    let output = run_runner(&runner, &[], &[(JIT_SEARCH_BUILD_DIR_ENV, Some("false"))])?;
    let report = parse_report(&output)?;
    report.expect_var(TEST_PRELOAD_ENV, Some(tree.jit_build_dir().as_str()))?;
    report.expect_var(JIT_SEARCH_BUILD_DIR_ENV, Some("false"))?;

    println!("    PASS (flag kept)");

    Ok(())
}

/// Test: relocatable builds ignore the JIT build dir
fn test_load_relative(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: load_relative");

    let dir = test_dir(config, "test_load_relative")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;
    tree.add_bootstrap()?;
    tree.add_jit_build_dir()?;

    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &["--load-relative"])?;

    let output = run_runner(&runner, &[], &[])?;
    let report = parse_report(&output)?;

    report.expect_var(TEST_PRELOAD_ENV, None)?;
    report.expect_var(JIT_SEARCH_BUILD_DIR_ENV, None)?;

    println!("    PASS");

    Ok(())
}

/// Test: exec failure reports the target and the OS error
fn test_interpreter_missing(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: interpreter_missing");

    let dir = test_dir(config, "test_interpreter_missing")?;
    let tree = BuildTree::new(&dir)?;
    tree.add_bootstrap()?;

    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let output = run_runner(&runner, &[], &[])?;

    if output.exit_code == 0 {
        return Err("Runner should fail without an interpreter binary".to_string());
    }
    let ruby_path = format!("{}/{}", tree.build_dir.display(), BuildTree::ruby_install_name());
    if !output.stderr.contains(&ruby_path) {
        return Err(format!("Diagnostic should name {}: {}", ruby_path, output.stderr));
    }

    println!("    PASS");

    Ok(())
}

/// Test: the interpreter's exit status is what the caller sees
fn test_exit_status(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: exit_status");

    let dir = test_dir(config, "test_exit_status")?;
    let tree = BuildTree::new(&dir)?;
    tree.install_interpreter(config)?;
    tree.add_bootstrap()?;

    let runner = dir.join("bin").join(format!("rr{}", EXE_EXT));
    finalize_runner(config, &tree, &runner, &[])?;

    let output = run_runner(&runner, &[], &[("FAKE_RUBY_EXIT", Some("3"))])?;

    if output.exit_code != 3 {
        return Err(format!(
            "Expected exit code 3 but got {}: {}",
            output.exit_code, output.stderr
        ));
    }

    println!("    PASS");

    Ok(())
}

/// Test: an unfinalized template refuses to run
fn test_template_not_finalized(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: template_not_finalized");

    let output = run_runner(&config.template_path, &[], &[])?;

    if output.exit_code == 0 {
        return Err("Template should not run".to_string());
    }
    if !output.stderr.contains("has not been finalized") {
        return Err(format!("Unexpected diagnostic: {}", output.stderr));
    }

    println!("    PASS");

    Ok(())
}

fn main() -> ExitCode {
    println!("=== Ruby Runner Test Suite ===");
    println!();

    let config = match TestConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            return ExitCode::from(1);
        }
    };

    // Clean and recreate work directory
    if config.work_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&config.work_dir) {
            eprintln!("Warning: Failed to clean work dir: {}", e);
        }
    }
    if let Err(e) = fs::create_dir_all(&config.work_dir) {
        eprintln!("Error: Failed to create work dir: {}", e);
        return ExitCode::from(1);
    }

    println!("Configuration:");
    println!("  Template:  {}", config.template_path.display());
    println!("  Finalizer: {}", config.finalizer_path.display());
    println!("  fake-ruby: {}", config.fake_ruby_path.display());
    println!("  Work dir:  {}", config.work_dir.display());
    println!();

    let tests: Vec<(&str, fn(&TestConfig) -> Result<(), String>)> = vec![
        ("bootstrap_present", test_bootstrap_present),
        ("long_program_name", test_long_program_name),
        ("bootstrap_missing", test_bootstrap_missing),
        ("jit_build_dir", test_jit_build_dir),
        ("load_relative", test_load_relative),
        ("interpreter_missing", test_interpreter_missing),
        ("exit_status", test_exit_status),
        ("template_not_finalized", test_template_not_finalized),
    ];

    let mut passed = 0;
    let mut failed = 0;

    println!("Running {} tests...", tests.len());
    println!();

    for (name, test_fn) in &tests {
        match test_fn(&config) {
            Ok(()) => {
                passed += 1;
            }
            Err(e) => {
                println!("  FAILED ({}): {}", name, e);
                failed += 1;
            }
        }
    }

    println!();
    println!("=== Results ===");
    println!("Passed: {}", passed);
    println!("Failed: {}", failed);
    println!();

    if failed > 0 {
        ExitCode::from(1)
    } else {
        println!("All tests passed!");
        ExitCode::SUCCESS
    }
}
