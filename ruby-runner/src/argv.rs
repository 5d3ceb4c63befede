//! Argument vector reconstruction.

use std::ffi::{OsStr, OsString};
use std::mem;

use crate::error::LaunchError;

/// Largest argument count whose pointer array (with the injected option and
/// the terminating null) still fits in an allocation.
pub const fn max_argc() -> usize {
    isize::MAX as usize / mem::size_of::<*const u8>() - 2
}

pub fn check_argc(argc: usize) -> Result<(), LaunchError> {
    if argc > max_argc() {
        return Err(LaunchError::TooManyArguments { argc });
    }
    Ok(())
}

/// Returns `[argv[0], option, argv[1], ..., argv[n-1]]`. `argv` is left as is.
/// An empty `argv` yields the option alone.
pub fn inject(argv: &[OsString], option: &OsStr) -> Result<Vec<OsString>, LaunchError> {
    check_argc(argv.len())?;

    let mut injected = Vec::new();
    injected
        .try_reserve_exact(argv.len() + 1)
        .map_err(|_| LaunchError::OutOfMemory { what: "new argv" })?;

    let mut args = argv.iter();
    injected.extend(args.next().cloned());
    injected.push(option.to_os_string());
    injected.extend(args.cloned());
    Ok(injected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn inserts_option_after_program_name() {
        let argv = os(&["ruby", "-e", "p 1", "--", "x"]);
        let injected = inject(&argv, OsStr::new("-r/build/fake.rb")).unwrap();
        assert_eq!(injected, os(&["ruby", "-r/build/fake.rb", "-e", "p 1", "--", "x"]));
        assert_eq!(injected.len(), argv.len() + 1);
    }

    #[test]
    fn program_name_only() {
        let injected = inject(&os(&["./ruby"]), OsStr::new("-rfake")).unwrap();
        assert_eq!(injected, os(&["./ruby", "-rfake"]));
    }

    #[test]
    fn input_is_not_modified() {
        let argv = os(&["ruby", "a", "b"]);
        let before = argv.clone();
        let _ = inject(&argv, OsStr::new("-rfake")).unwrap();
        assert_eq!(argv, before);
    }

    #[test]
    fn empty_argv_yields_option_alone() {
        assert_eq!(inject(&[], OsStr::new("-rfake")).unwrap(), os(&["-rfake"]));
    }

    #[test]
    fn argc_bound() {
        assert!(check_argc(0).is_ok());
        assert!(check_argc(max_argc()).is_ok());
        assert!(matches!(
            check_argc(max_argc() + 1),
            Err(LaunchError::TooManyArguments { .. })
        ));
        assert!(matches!(
            check_argc(usize::MAX),
            Err(LaunchError::TooManyArguments { argc: usize::MAX })
        ));
    }

    #[test]
    fn bound_leaves_room_for_two_extra_slots() {
        let slots = (max_argc() + 2) * mem::size_of::<*const u8>();
        assert!(slots <= isize::MAX as usize);
    }
}
