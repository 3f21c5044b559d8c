//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pxflash::port::DEFAULT_BAUD;
use pxflash::{
    LocatorConfig, NativeOpener, PortLocator, UploadEvent, UploadSession, UploadState,
    candidate_ports, image,
};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Bootloader wait used when neither the flag nor the config sets one.
const DEFAULT_WAIT_SECS: f64 = 12.0;

/// Turn a library interruption into the CLI's cancellation error.
fn cancelled_on_interrupt(err: pxflash::Error) -> anyhow::Error {
    if matches!(err, pxflash::Error::Interrupted) {
        CliError::Cancelled("Upload cancelled".to_string()).into()
    } else {
        err.into()
    }
}

/// Resolve candidate ports: flag/env, then config, then detection.
fn resolve_candidates(cli: &Cli, config: &Config) -> Vec<String> {
    if !cli
        .port
        .is_empty()
    {
        return cli
            .port
            .clone();
    }
    if !config
        .port
        .serial
        .is_empty()
    {
        return config
            .port
            .serial
            .clone();
    }
    candidate_ports()
}

fn resolve_wait(wait: Option<f64>, config: &Config) -> Result<Duration> {
    let secs = wait
        .or(config
            .upload
            .wait_secs)
        .unwrap_or(DEFAULT_WAIT_SECS);
    if !secs.is_finite() || secs <= 0.0 {
        return Err(CliError::Usage(format!(
            "wait must be a positive number of seconds, got {secs}"
        ))
        .into());
    }
    Ok(Duration::from_secs_f64(secs))
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn spinner(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.yellow} {msg}")
            .unwrap(),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Percentage for a progress event; programming fills the first half of
/// the bar and verification the second.
fn percent(done: usize, total: usize, base: u64) -> u64 {
    if total == 0 {
        return base + 50;
    }
    base + (done as u64 * 50) / total as u64
}

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    wait: Option<f64>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = image::load(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} firmware for board {}, rev {} ({} bytes)",
            style("ℹ").blue(),
            image.format,
            image.board_id,
            image.board_revision,
            image.len()
        );
    }

    let max_wait = resolve_wait(wait, config)?;
    let baud = cli
        .baud
        .or(config
            .port
            .baud)
        .unwrap_or(DEFAULT_BAUD);
    let candidates = resolve_candidates(cli, config);
    if candidates.is_empty() {
        return Err(CliError::Usage(
            "No serial ports detected; connect the board or pass --port".to_string(),
        )
        .into());
    }

    if !cli.quiet {
        eprintln!(
            "{} Waiting up to {:.1}s for a bootloader on {} at {} baud. Reset the board now.",
            style("⏳").yellow(),
            max_wait.as_secs_f64(),
            candidates.join(", "),
            baud
        );
    }

    let waiting = spinner(cli);
    let mut locator = PortLocator::new(
        NativeOpener,
        LocatorConfig::default().with_max_wait(max_wait),
    );
    let located = locator.locate(&candidates, baud, |elapsed| {
        waiting.set_message(format!("Probing ports ({:.1}s)", elapsed.as_secs_f64()));
        waiting.tick();
    });
    waiting.finish_and_clear();
    let (port, identity) = located.map_err(cancelled_on_interrupt)?;

    if !cli.quiet {
        eprintln!(
            "{} Found board type {} rev {} (bootloader rev {}) on {}",
            style("✓").green(),
            identity.board_type,
            identity.board_revision,
            identity.bootloader_revision,
            pxflash::Port::name(&port)
        );
    }

    let pb = progress_bar(cli);
    let quiet = cli.quiet;
    let result = UploadSession::new(port, identity).upload(&image, |event| match event {
        UploadEvent::State(state) => {
            let message = match state {
                UploadState::Synced => "Erasing",
                UploadState::Erased => "Programming",
                UploadState::Programmed => "Verifying",
                UploadState::Verified => "Rebooting",
                UploadState::Rebooted => "Done",
                UploadState::Idle | UploadState::Failed => return,
            };
            pb.set_message(message);
            if !quiet && !use_fancy_output() {
                eprintln!("{} {message}", style("•").dim());
            }
        },
        UploadEvent::Programming { written, total } => pb.set_position(percent(written, total, 0)),
        UploadEvent::Verifying { verified, total } => {
            pb.set_position(percent(verified, total, 50));
        },
        UploadEvent::Identified(_) => {},
    });

    match result {
        Ok(_) => pb.finish_with_message("Complete"),
        Err(e) => {
            pb.abandon();
            return Err(cancelled_on_interrupt(e).context("Upload failed"));
        },
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Upload complete, application is starting",
            style("🎉")
                .green()
                .bold()
        );
    }

    Ok(())
}
