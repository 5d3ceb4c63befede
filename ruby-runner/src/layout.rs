//! Build layout baked into the runner binary.
//!
//! The template binary carries one fixed-size, NUL-padded slot per
//! [`Field`]. Each slot starts out holding `@@RUBY_RUNNER_<FIELD>@@` and is
//! overwritten in place by `finalize-runner` when the build tree is set up.
//! Nothing writes the slots at runtime.

use std::path::PathBuf;
use std::ptr;

use crate::error::LayoutError;

pub const PLACEHOLDER_PREFIX: &[u8] = b"@@RUBY_RUNNER_";
const PLACEHOLDER_SUFFIX: &[u8] = b"@@";

pub const PATH_SLOT_SIZE: usize = 1024;
pub const NAME_SLOT_SIZE: usize = 64;

/// Platform defaults used when an optional slot was left untouched.
pub mod platform {
    #[cfg(target_os = "macos")]
    pub const LIB_PATH_ENV: &str = "DYLD_LIBRARY_PATH";
    #[cfg(target_os = "macos")]
    pub const PRELOAD_ENV: &str = "DYLD_INSERT_LIBRARIES";

    #[cfg(windows)]
    pub const LIB_PATH_ENV: &str = "PATH";
    #[cfg(windows)]
    pub const PRELOAD_ENV: &str = "";

    #[cfg(not(any(windows, target_os = "macos")))]
    pub const LIB_PATH_ENV: &str = "LD_LIBRARY_PATH";
    #[cfg(not(any(windows, target_os = "macos")))]
    pub const PRELOAD_ENV: &str = "LD_PRELOAD";

    #[cfg(windows)]
    pub const PATH_SEP: u8 = b';';
    #[cfg(not(windows))]
    pub const PATH_SEP: u8 = b':';
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    BuildDir,
    AbsSrcDir,
    ExtOut,
    Arch,
    RubyInstallName,
    SoExt,
    LibPathEnv,
    PreloadEnv,
    PathSep,
    LoadRelative,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::BuildDir,
        Field::AbsSrcDir,
        Field::ExtOut,
        Field::Arch,
        Field::RubyInstallName,
        Field::SoExt,
        Field::LibPathEnv,
        Field::PreloadEnv,
        Field::PathSep,
        Field::LoadRelative,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::BuildDir => "BUILDDIR",
            Field::AbsSrcDir => "ABS_SRCDIR",
            Field::ExtOut => "EXTOUT",
            Field::Arch => "ARCH",
            Field::RubyInstallName => "RUBY_INSTALL_NAME",
            Field::SoExt => "SOEXT",
            Field::LibPathEnv => "LIBPATHENV",
            Field::PreloadEnv => "PRELOADENV",
            Field::PathSep => "PATH_SEP",
            Field::LoadRelative => "LOAD_RELATIVE",
        }
    }

    /// Size of the slot in bytes, NUL padding included.
    pub fn capacity(self) -> usize {
        match self {
            Field::BuildDir | Field::AbsSrcDir | Field::ExtOut => PATH_SLOT_SIZE,
            _ => NAME_SLOT_SIZE,
        }
    }

    /// The marker a template slot starts with. Assembled at runtime so the
    /// full marker only ever appears in the slot itself.
    pub fn marker(self) -> Vec<u8> {
        let name = self.name().as_bytes();
        let mut marker =
            Vec::with_capacity(PLACEHOLDER_PREFIX.len() + name.len() + PLACEHOLDER_SUFFIX.len());
        marker.extend_from_slice(PLACEHOLDER_PREFIX);
        marker.extend_from_slice(name);
        marker.extend_from_slice(PLACEHOLDER_SUFFIX);
        marker
    }
}

const fn placeholder<const N: usize>(name: &[u8]) -> [u8; N] {
    let mut slot = [0u8; N];
    let mut pos = 0;
    let mut i = 0;
    while i < PLACEHOLDER_PREFIX.len() {
        slot[pos] = PLACEHOLDER_PREFIX[i];
        pos += 1;
        i += 1;
    }
    i = 0;
    while i < name.len() {
        slot[pos] = name[i];
        pos += 1;
        i += 1;
    }
    i = 0;
    while i < PLACEHOLDER_SUFFIX.len() {
        slot[pos] = PLACEHOLDER_SUFFIX[i];
        pos += 1;
        i += 1;
    }
    slot
}

macro_rules! layout_slot {
    ($slot:ident, $size:expr, $name:literal) => {
        #[used]
        #[cfg_attr(target_os = "macos", link_section = "__DATA,__ruby_runner")]
        #[cfg_attr(
            all(unix, not(target_os = "macos")),
            link_section = ".ruby_runner_layout"
        )]
        static mut $slot: [u8; $size] = placeholder($name);
    };
}

layout_slot!(BUILDDIR, PATH_SLOT_SIZE, b"BUILDDIR");
layout_slot!(ABS_SRCDIR, PATH_SLOT_SIZE, b"ABS_SRCDIR");
layout_slot!(EXTOUT, PATH_SLOT_SIZE, b"EXTOUT");
layout_slot!(ARCH, NAME_SLOT_SIZE, b"ARCH");
layout_slot!(RUBY_INSTALL_NAME, NAME_SLOT_SIZE, b"RUBY_INSTALL_NAME");
layout_slot!(SOEXT, NAME_SLOT_SIZE, b"SOEXT");
layout_slot!(LIBPATHENV, NAME_SLOT_SIZE, b"LIBPATHENV");
layout_slot!(PRELOADENV, NAME_SLOT_SIZE, b"PRELOADENV");
layout_slot!(PATH_SEP, NAME_SLOT_SIZE, b"PATH_SEP");
layout_slot!(LOAD_RELATIVE, NAME_SLOT_SIZE, b"LOAD_RELATIVE");

fn embedded_slot(field: Field) -> Vec<u8> {
    // SAFETY: the slots are patched on disk before the binary runs and never
    // written by the process; volatile reads keep the compiler from folding
    // the template contents into the code.
    unsafe {
        match field {
            Field::BuildDir => ptr::read_volatile(ptr::addr_of!(BUILDDIR)).to_vec(),
            Field::AbsSrcDir => ptr::read_volatile(ptr::addr_of!(ABS_SRCDIR)).to_vec(),
            Field::ExtOut => ptr::read_volatile(ptr::addr_of!(EXTOUT)).to_vec(),
            Field::Arch => ptr::read_volatile(ptr::addr_of!(ARCH)).to_vec(),
            Field::RubyInstallName => {
                ptr::read_volatile(ptr::addr_of!(RUBY_INSTALL_NAME)).to_vec()
            }
            Field::SoExt => ptr::read_volatile(ptr::addr_of!(SOEXT)).to_vec(),
            Field::LibPathEnv => ptr::read_volatile(ptr::addr_of!(LIBPATHENV)).to_vec(),
            Field::PreloadEnv => ptr::read_volatile(ptr::addr_of!(PRELOADENV)).to_vec(),
            Field::PathSep => ptr::read_volatile(ptr::addr_of!(PATH_SEP)).to_vec(),
            Field::LoadRelative => ptr::read_volatile(ptr::addr_of!(LOAD_RELATIVE)).to_vec(),
        }
    }
}

/// Length of the value stored in a NUL-padded slot: everything before the
/// first NUL, or the whole slot when it has none.
pub fn logical_len(slot: &[u8]) -> usize {
    slot.iter().position(|&b| b == 0).unwrap_or(slot.len())
}

pub fn is_template(slot: &[u8]) -> bool {
    slot.starts_with(PLACEHOLDER_PREFIX)
}

/// `None` while the slot still holds its marker.
fn decode(field: Field, slot: &[u8]) -> Result<Option<String>, LayoutError> {
    if is_template(slot) {
        return Ok(None);
    }
    let value = &slot[..logical_len(slot)];
    String::from_utf8(value.to_vec())
        .map(Some)
        .map_err(|_| LayoutError::InvalidUtf8 { field: field.name() })
}

fn required(field: Field, slot: &[u8]) -> Result<String, LayoutError> {
    match decode(field, slot)? {
        None => Err(LayoutError::NotFinalized { field: field.name() }),
        Some(value) if value.is_empty() => Err(LayoutError::Empty { field: field.name() }),
        Some(value) => Ok(value),
    }
}

/// Build-time constants describing where the uninstalled interpreter lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub build_dir: String,
    pub src_dir: String,
    /// Extension output directory, relative to `build_dir`.
    pub ext_out: String,
    pub arch: String,
    /// Simple file name of the real interpreter binary.
    pub ruby_install_name: String,
    pub so_ext: String,
    /// Dynamic-library search-path variable (`LD_LIBRARY_PATH` and friends).
    pub lib_path_env: String,
    /// Preload variable; empty when the platform has none.
    pub preload_env: String,
    pub path_sep: u8,
    pub load_relative: bool,
}

impl BuildLayout {
    /// Reads the layout compiled into this binary.
    pub fn embedded() -> Result<Self, LayoutError> {
        Self::from_slots(embedded_slot)
    }

    /// Decodes a layout from raw slot contents.
    pub fn from_slots(mut slot: impl FnMut(Field) -> Vec<u8>) -> Result<Self, LayoutError> {
        let build_dir = required(Field::BuildDir, &slot(Field::BuildDir))?;
        let src_dir = required(Field::AbsSrcDir, &slot(Field::AbsSrcDir))?;
        let ext_out = required(Field::ExtOut, &slot(Field::ExtOut))?;
        let arch = required(Field::Arch, &slot(Field::Arch))?;
        let ruby_install_name = required(Field::RubyInstallName, &slot(Field::RubyInstallName))?;
        let so_ext = required(Field::SoExt, &slot(Field::SoExt))?;

        let lib_path_env = match decode(Field::LibPathEnv, &slot(Field::LibPathEnv))? {
            None => platform::LIB_PATH_ENV.to_string(),
            Some(value) if value.is_empty() => {
                return Err(LayoutError::Empty { field: Field::LibPathEnv.name() })
            }
            Some(value) => value,
        };

        let preload_env = decode(Field::PreloadEnv, &slot(Field::PreloadEnv))?
            .unwrap_or_else(|| platform::PRELOAD_ENV.to_string());

        let path_sep = match decode(Field::PathSep, &slot(Field::PathSep))? {
            None => platform::PATH_SEP,
            Some(value) => match value.as_bytes() {
                [sep] if sep.is_ascii() => *sep,
                _ => return Err(LayoutError::InvalidPathSep { value }),
            },
        };

        let load_relative = match decode(Field::LoadRelative, &slot(Field::LoadRelative))? {
            None => false,
            Some(value) => match value.as_str() {
                "0" => false,
                "1" => true,
                _ => {
                    return Err(LayoutError::InvalidFlag {
                        field: Field::LoadRelative.name(),
                        value,
                    })
                }
            },
        };

        Ok(Self {
            build_dir,
            src_dir,
            ext_out,
            arch,
            ruby_install_name,
            so_ext,
            lib_path_env,
            preload_env,
            path_sep,
            load_relative,
        })
    }

    /// `BUILDDIR/RUBY_INSTALL_NAME`
    pub fn ruby_path(&self) -> PathBuf {
        PathBuf::from(format!("{}/{}", self.build_dir, self.ruby_install_name))
    }

    /// Library search list appended to `RUBYLIB`.
    pub fn ruby_lib(&self) -> String {
        let sep = char::from(self.path_sep);
        let ext_out_dir = format!("{}/{}", self.build_dir, self.ext_out);
        format!(
            "{src}/lib{sep}{ext}/common{sep}{ext}/{arch}",
            src = self.src_dir,
            ext = ext_out_dir,
            arch = self.arch,
        )
    }

    /// Marker whose presence enables the JIT header search in the build tree.
    pub fn jit_build_dir(&self) -> String {
        format!("{}/mjit_build_dir.{}", self.build_dir, self.so_ext)
    }

    pub fn bootstrap_path(&self) -> PathBuf {
        PathBuf::from(format!("{}/{}-fake.rb", self.build_dir, self.arch))
    }

    /// The `-r<bootstrap>` option forced onto every launch.
    pub fn bootstrap_option(&self) -> String {
        format!("-r{}", self.bootstrap_path().display())
    }
}
