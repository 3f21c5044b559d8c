//! Firmware descriptor builder.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use pxflash::Descriptor;
use pxflash::image::git_identity;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Cli;

/// Options for `pxflash mkfw`.
#[derive(Args, Debug, Default)]
pub(crate) struct MkfwArgs {
    /// Start from this descriptor instead of an empty one.
    #[arg(long, value_name = "FILE")]
    prototype: Option<PathBuf>,

    /// Board type the firmware requires.
    #[arg(long)]
    board_id: Option<u32>,

    /// Board revision the firmware was built for.
    #[arg(long)]
    board_revision: Option<u32>,

    /// Version string.
    #[arg(long = "version", value_name = "VERSION")]
    fw_version: Option<String>,

    /// One-line summary.
    #[arg(long)]
    summary: Option<String>,

    /// Longer description.
    #[arg(long)]
    description: Option<String>,

    /// Stamp `git describe` output from the repository in this directory.
    #[arg(long, value_name = "DIR")]
    git_identity: Option<PathBuf>,

    /// Raw firmware image to embed.
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Write the descriptor here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

/// Apply the flags on top of a starting descriptor.
fn build_descriptor(args: &MkfwArgs, build_time: u64) -> Result<Descriptor> {
    let mut desc = match &args.prototype {
        Some(path) => Descriptor::from_file(path)
            .with_context(|| format!("Failed to read prototype {}", path.display()))?,
        None => Descriptor::new(),
    };

    desc.build_time = build_time;

    if let Some(board_id) = args.board_id {
        desc.board_id = board_id;
    }
    if let Some(board_revision) = args.board_revision {
        desc.board_revision = board_revision;
    }
    if let Some(version) = &args.fw_version {
        desc.version = version.clone();
    }
    if let Some(summary) = &args.summary {
        desc.summary = summary.clone();
    }
    if let Some(description) = &args.description {
        desc.description = description.clone();
    }
    if let Some(dir) = &args.git_identity {
        desc.git_identity = git_identity(dir)
            .with_context(|| format!("Failed to describe git checkout {}", dir.display()))?;
    }
    if let Some(path) = &args.image {
        let payload = fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        desc.set_image(&payload)?;
    }

    Ok(desc)
}

/// Mkfw command implementation.
pub(crate) fn cmd_mkfw(cli: &Cli, args: &MkfwArgs) -> Result<()> {
    let build_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the unix epoch")?
        .as_secs();

    let desc = build_descriptor(args, build_time)?;
    let json = desc.to_json_pretty()?;

    match &args.output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Wrote descriptor for board {} ({} byte image) to {}",
                    style("✓").green(),
                    desc.board_id,
                    desc.image_size,
                    path.display()
                );
            }
        },
        None => println!("{json}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir
            .path()
            .join("fw.bin");
        fs::write(&image, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let args = MkfwArgs {
            board_id: Some(9),
            summary: Some("PX4FMUv2".into()),
            image: Some(image),
            ..MkfwArgs::default()
        };
        let desc = build_descriptor(&args, 1_700_000_000).unwrap();

        assert_eq!(desc.magic, "PX4FWv1");
        assert_eq!(desc.board_id, 9);
        assert_eq!(desc.summary, "PX4FMUv2");
        assert_eq!(desc.build_time, 1_700_000_000);
        assert_eq!(desc.image_size, 8);
        assert_eq!(desc.decode_image().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_flags_override_prototype() {
        let dir = tempfile::tempdir().unwrap();
        let prototype = dir
            .path()
            .join("board.prototype");
        fs::write(
            &prototype,
            r#"{
                "magic": "PX4FWv1",
                "board_id": 5,
                "board_revision": 0,
                "version": "",
                "summary": "PX4FMU",
                "description": "Firmware for the PX4FMU board",
                "git_identity": "",
                "build_time": 0,
                "image": "",
                "image_size": 0
            }"#,
        )
        .unwrap();

        let args = MkfwArgs {
            prototype: Some(prototype),
            board_revision: Some(2),
            ..MkfwArgs::default()
        };
        let desc = build_descriptor(&args, 42).unwrap();

        assert_eq!(desc.board_id, 5);
        assert_eq!(desc.board_revision, 2);
        assert_eq!(desc.summary, "PX4FMU");
        assert_eq!(desc.description, "Firmware for the PX4FMU board");
        assert_eq!(desc.build_time, 42);
    }

    #[test]
    fn test_missing_image_reports_path() {
        let args = MkfwArgs {
            image: Some(PathBuf::from("/nonexistent/fw.bin")),
            ..MkfwArgs::default()
        };
        let err = build_descriptor(&args, 0).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/fw.bin"));
    }
}
