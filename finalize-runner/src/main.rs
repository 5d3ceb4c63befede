use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use ruby_runner::layout::Field;
use ruby_runner::BuildLayout;

/// Write a build layout into a template ruby-runner binary.
#[derive(Debug, Parser)]
#[command(name = "finalize-runner", version)]
struct Cli {
    /// Template ruby-runner binary
    #[arg(long)]
    template: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build directory holding the real interpreter binary
    #[arg(long)]
    build_dir: String,

    /// Absolute source directory
    #[arg(long)]
    src_dir: String,

    /// Architecture tag, e.g. x86_64-linux
    #[arg(long)]
    arch: String,

    /// Extension output directory, relative to the build directory
    #[arg(long)]
    ext_out: String,

    /// File name of the real interpreter binary
    #[arg(long)]
    ruby_install_name: String,

    /// Shared object suffix
    #[arg(long)]
    so_ext: String,

    /// Dynamic-library search-path variable (platform default if omitted)
    #[arg(long)]
    lib_path_env: Option<String>,

    /// Preload variable; pass "" to disable the JIT build dir lookup
    #[arg(long)]
    preload_env: Option<String>,

    /// Search-path separator (platform default if omitted)
    #[arg(long)]
    path_sep: Option<char>,

    /// Relocatable build: never look for the JIT build dir
    #[arg(long)]
    load_relative: bool,
}

impl Cli {
    fn layout_values(&self) -> Vec<(Field, String)> {
        let mut values = vec![
            (Field::BuildDir, self.build_dir.clone()),
            (Field::AbsSrcDir, self.src_dir.clone()),
            (Field::ExtOut, self.ext_out.clone()),
            (Field::Arch, self.arch.clone()),
            (Field::RubyInstallName, self.ruby_install_name.clone()),
            (Field::SoExt, self.so_ext.clone()),
            (Field::LoadRelative, if self.load_relative { "1" } else { "0" }.to_string()),
        ];
        if let Some(name) = &self.lib_path_env {
            values.push((Field::LibPathEnv, name.clone()));
        }
        if let Some(name) = &self.preload_env {
            values.push((Field::PreloadEnv, name.clone()));
        }
        if let Some(sep) = self.path_sep {
            values.push((Field::PathSep, sep.to_string()));
        }
        values
    }
}

fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len())
        .position(|window| window == pattern)
}

/// Offset of the slot for `field`: its marker followed by NUL padding up to
/// the slot's capacity. Stray copies of the marker text are skipped.
fn find_slot(data: &[u8], field: Field) -> Option<usize> {
    let marker = field.marker();
    let mut pos = 0;

    while let Some(offset) = find_pattern(&data[pos..], &marker) {
        let start = pos + offset;
        let padding = data.get(start + marker.len()..start + field.capacity())?;
        if padding.iter().all(|&b| b == 0) {
            return Some(start);
        }
        pos = start + 1;
    }
    None
}

fn replace_at(data: &mut [u8], offset: usize, new_value: &[u8], fixed_size: usize) -> Result<()> {
    // one byte stays NUL so the runner can find the end of the value
    if new_value.len() >= fixed_size {
        bail!(
            "Value too long: {} bytes, at most {} fit",
            new_value.len(),
            fixed_size - 1
        );
    }
    if new_value.contains(&0) {
        bail!("Value contains a NUL byte");
    }

    data[offset..offset + fixed_size].fill(0);
    data[offset..offset + new_value.len()].copy_from_slice(new_value);

    Ok(())
}

fn finalize_runner(template: &[u8], values: &[(Field, String)]) -> Result<(Vec<u8>, BuildLayout)> {
    let mut data = template.to_vec();

    let mut offsets = HashMap::new();
    for field in Field::ALL {
        let offset = find_slot(&data, field)
            .with_context(|| format!("{} placeholder not found in template", field.name()))?;
        offsets.insert(field, offset);
    }

    for (field, value) in values {
        replace_at(&mut data, offsets[field], value.as_bytes(), field.capacity())
            .with_context(|| format!("Cannot store {}", field.name()))?;
        eprintln!("Replaced {} with: {}", field.name(), value);
    }

    let layout = BuildLayout::from_slots(|field| {
        let offset = offsets[&field];
        data[offset..offset + field.capacity()].to_vec()
    })
    .context("Finalized layout is invalid")?;

    Ok((data, layout))
}

fn write_output(output: &Path, template: &Path, data: &[u8]) -> Result<()> {
    // Prevent overwriting the input file
    let template_canon = fs::canonicalize(template)
        .with_context(|| format!("Failed to resolve template path {}", template.display()))?;
    if fs::canonicalize(output).ok().as_ref() == Some(&template_canon) {
        bail!("Output path cannot be the same as template path (would overwrite input)");
    }

    fs::write(output, data)
        .with_context(|| format!("Failed to write output {}", output.display()))?;

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(output)
            .context("Failed to get metadata")?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(output, perms).context("Failed to set permissions")?;
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let template = fs::read(&cli.template)
        .with_context(|| format!("Failed to read template {}", cli.template.display()))?;

    let (data, layout) = finalize_runner(&template, &cli.layout_values())?;

    match &cli.output {
        Some(output) => {
            write_output(output, &cli.template, &data)?;
            eprintln!("\nFinalized runner written to: {}", output.display());
            eprintln!("Interpreter: {}", layout.ruby_path().display());
            eprintln!("Bootstrap:   {}", layout.bootstrap_path().display());
        }
        None => {
            // binary data goes to stdout, so no trailing summary
            io::stdout()
                .write_all(&data)
                .context("Failed to write to stdout")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruby_runner::layout::{NAME_SLOT_SIZE, PATH_SLOT_SIZE};

    fn template_with_decoy() -> Vec<u8> {
        let mut data = b"\x7fELF junk".to_vec();
        // marker text without its padding, as string merging might leave behind
        data.extend_from_slice(&Field::BuildDir.marker());
        data.extend_from_slice(b"trailing code");
        for field in Field::ALL {
            let mut slot = vec![0u8; field.capacity()];
            let marker = field.marker();
            slot[..marker.len()].copy_from_slice(&marker);
            data.extend_from_slice(&slot);
            data.extend_from_slice(b"\xde\xad");
        }
        data
    }

    fn values() -> Vec<(Field, String)> {
        vec![
            (Field::BuildDir, "/work/build".to_string()),
            (Field::AbsSrcDir, "/work/src".to_string()),
            (Field::ExtOut, ".ext".to_string()),
            (Field::Arch, "x86_64-linux".to_string()),
            (Field::RubyInstallName, "ruby".to_string()),
            (Field::SoExt, "so".to_string()),
            (Field::LoadRelative, "0".to_string()),
            (Field::PreloadEnv, String::new()),
        ]
    }

    #[test]
    fn find_slot_skips_unpadded_marker() {
        let data = template_with_decoy();
        let offset = find_slot(&data, Field::BuildDir).unwrap();
        assert!(offset > b"\x7fELF junk".len());
        assert!(data[offset + Field::BuildDir.marker().len()..offset + PATH_SLOT_SIZE]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn find_slot_missing() {
        assert_eq!(find_slot(b"no placeholders here", Field::Arch), None);
    }

    #[test]
    fn replace_at_zero_fills_and_keeps_terminator() {
        let mut data = vec![b'@'; 8];
        replace_at(&mut data, 0, b"ab", 8).unwrap();
        assert_eq!(data, b"ab\0\0\0\0\0\0");

        assert!(replace_at(&mut data, 0, b"12345678", 8).is_err());
        assert!(replace_at(&mut data, 0, b"1234567", 8).is_ok());
        assert!(replace_at(&mut data, 0, b"a\0b", 8).is_err());
    }

    #[test]
    fn finalizes_template() {
        let template = template_with_decoy();
        let (data, layout) = finalize_runner(&template, &values()).unwrap();

        assert_eq!(data.len(), template.len());
        assert_eq!(layout.build_dir, "/work/build");
        assert_eq!(layout.ruby_install_name, "ruby");
        assert_eq!(layout.preload_env, "");
        assert_eq!(layout.ruby_path(), PathBuf::from("/work/build/ruby"));
        // the decoy is untouched
        assert!(find_pattern(&data, &Field::BuildDir.marker()).is_some());
        assert!(find_slot(&data, Field::BuildDir).is_none());
    }

    #[test]
    fn rejects_missing_required_value() {
        let template = template_with_decoy();
        let values: Vec<_> = values()
            .into_iter()
            .filter(|(field, _)| *field != Field::SoExt)
            .collect();
        let err = finalize_runner(&template, &values).unwrap_err();
        assert!(format!("{err:#}").contains("SOEXT has not been finalized"));
    }

    #[test]
    fn rejects_oversized_value() {
        let template = template_with_decoy();
        let mut values = values();
        values.push((Field::Arch, "x".repeat(NAME_SLOT_SIZE)));
        let err = finalize_runner(&template, &values).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot store ARCH"));
    }

    #[test]
    fn cli_collects_optional_values_only_when_given() {
        let cli = Cli::parse_from([
            "finalize-runner",
            "--template", "tmpl",
            "--build-dir", "/b",
            "--src-dir", "/s",
            "--arch", "x86_64-linux",
            "--ext-out", ".ext",
            "--ruby-install-name", "ruby",
            "--so-ext", "so",
            "--preload-env", "",
            "--load-relative",
        ]);
        let values = cli.layout_values();
        assert!(values.contains(&(Field::PreloadEnv, String::new())));
        assert!(values.contains(&(Field::LoadRelative, "1".to_string())));
        assert!(!values.iter().any(|(field, _)| *field == Field::LibPathEnv));
        assert!(!values.iter().any(|(field, _)| *field == Field::PathSep));
    }
}
