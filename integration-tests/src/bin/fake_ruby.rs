//! Stand-in interpreter: prints its argv and environment as one JSON object
//! on stdout.
//!
//! Usage: fake-ruby [args...]
//! Outputs: {"argv": [...], "env": {"NAME": "value", ...}}
//!
//! Exits with the status given by `FAKE_RUBY_EXIT` (default 0), which lets
//! the harness see that the runner really handed over control.

use std::env;
use std::process::ExitCode;

use serde_json::{json, Map, Value};

fn main() -> ExitCode {
    let args: Vec<String> = env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let mut vars = Map::new();
    for (name, value) in env::vars_os() {
        vars.insert(
            name.to_string_lossy().into_owned(),
            Value::String(value.to_string_lossy().into_owned()),
        );
    }

    println!("{}", json!({ "argv": args, "env": vars }));

    let status = env::var("FAKE_RUBY_EXIT")
        .ok()
        .and_then(|code| code.parse::<u8>().ok())
        .unwrap_or(0);
    ExitCode::from(status)
}
