use std::env;
use std::io;
use std::process;

use ruby_runner::{BuildLayout, LaunchError, Launcher, ProcessHost};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RUBY_RUNNER_LOG";

fn init_logging() {
    // stderr belongs to the interpreter unless logging was asked for
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .without_time()
            .init();
    }
}

fn main() {
    init_logging();

    let err = match BuildLayout::embedded() {
        Ok(layout) => Launcher::new(layout, ProcessHost).run(env::args_os().collect()),
        Err(err) => LaunchError::from(err),
    };

    eprintln!("{err}");
    process::exit(LaunchError::EXIT_STATUS);
}
