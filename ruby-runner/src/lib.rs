//! Launches an interpreter from its build tree as though it were installed.
//!
//! The runner points the library search paths at the build tree, forces the
//! `-r<ARCH>-fake.rb` bootstrap script onto the command line, makes `argv[0]`
//! carry the real binary's name and finally replaces itself with the real
//! interpreter.

pub mod argv;
pub mod error;
pub mod exe_path;
pub mod host;
pub mod launcher;
pub mod layout;
pub mod path_env;

pub use error::{LaunchError, LayoutError};
pub use exe_path::Argv0Outcome;
pub use host::{Host, MemoryHost, ProcessHost};
pub use launcher::{Launch, Launcher};
pub use layout::BuildLayout;
