//! Firmware info and port listing command implementations.

use anyhow::{Context, Result};
use console::style;
use pxflash::device::rank_candidates;
use pxflash::image::Trailer;
use pxflash::{ContainerFormat, FirmwareImage, detect_ports, format_port_list};
use serde_json::json;
use std::fs;
use std::path::Path;

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = rank_candidates(detect_ports());

    if json {
        let output = json!({
            "ok": true,
            "data": {
                "ports": detected,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for (port, line) in detected
        .iter()
        .zip(format_port_list(&detected))
    {
        let marker = if port
            .device
            .is_autopilot()
        {
            style("→")
                .green()
                .bold()
        } else {
            style("•").dim()
        };
        eprintln!("  {marker} {line}");
    }

    Ok(())
}

fn sha1_hex(sha1: &[u8]) -> String {
    sha1.iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let data = fs::read(firmware)
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?;
    let image = FirmwareImage::from_bytes(&data)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    // Legacy files carry fields the common image does not keep.
    let trailer = match image.format {
        ContainerFormat::LegacyTrailer => Some(Trailer::split(&data)?.1),
        ContainerFormat::Descriptor => None,
    };

    if json {
        let mut info = json!({
            "file": firmware.display().to_string(),
            "format": image.format,
            "board_id": image.board_id,
            "board_revision": image.board_revision,
            "version": image.version,
            "summary": image.summary,
            "description": image.description,
            "build_identity": image.build_identity,
            "build_time": image.build_time,
            "image_size": image.len(),
        });
        if let Some(trailer) = &trailer {
            info["trailer"] = json!({
                "commit_tag": format!("{:08x}", trailer.commit_tag),
                "sha1": sha1_hex(&trailer.sha1),
            });
        }
        let output = json!({
            "ok": true,
            "data": info,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Firmware Information:")
            .bold()
            .underlined()
    );
    eprintln!("  File:           {}", firmware.display());
    eprintln!("  Format:         {}", image.format);
    eprintln!(
        "  Board:          {} rev {}",
        style(image.board_id).cyan(),
        image.board_revision
    );
    if !image
        .version
        .is_empty()
    {
        eprintln!("  Version:        {}", image.version);
    }
    if !image
        .summary
        .is_empty()
    {
        eprintln!("  Summary:        {}", image.summary);
    }
    if !image
        .description
        .is_empty()
    {
        eprintln!("  Description:    {}", image.description);
    }
    eprintln!("  Build identity: {}", image.build_identity);
    eprintln!("  Build time:     {}", image.build_time);
    eprintln!(
        "  Image size:     {} bytes ({:.1} KB)",
        image.len(),
        image.len() as f64 / 1024.0
    );
    if let Some(trailer) = &trailer {
        eprintln!("  Commit tag:     {:08x}", trailer.commit_tag);
        eprintln!("  SHA-1:          {}", style(sha1_hex(&trailer.sha1)).dim());
    }

    Ok(())
}
