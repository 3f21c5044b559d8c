//! # pxflash
//!
//! A library for uploading firmware to PX4 autopilot bootloaders.
//!
//! This crate provides the core functionality for talking to the PX4
//! bootloader over a serial link, including:
//!
//! - Firmware containers: JSON descriptors and legacy trailer binaries
//! - The bootloader's sync/command protocol
//! - Port discovery with bounded retry while the board resets
//! - An erase/program/verify/reboot upload state machine
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use pxflash::{LocatorConfig, NativeOpener, PortLocator, UploadSession, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = image::load("px4fmu-v2_default.px4")?;
//!
//!     let mut locator = PortLocator::new(NativeOpener, LocatorConfig::default());
//!     let candidates = vec!["/dev/ttyACM0".to_string()];
//!     let (port, identity) = locator.locate(&candidates, 115_200, |_| {})?;
//!     println!("Found board type {}", identity.board_type);
//!
//!     UploadSession::new(port, identity).upload(&firmware, |event| {
//!         println!("{event:?}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod locate;
pub mod port;
pub mod protocol;
pub mod upload;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The port
/// locator polls it once per tick and an upload polls it before every
/// command.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort};
pub use {
    device::{DetectedPort, DeviceKind, candidate_ports, detect_ports, format_port_list},
    error::{Error, Result},
    image::{ContainerFormat, Descriptor, FirmwareImage},
    locate::{Clock, LocatorConfig, PortLocator, SystemClock},
    port::{Port, PortOpener, SerialConfig},
    protocol::{BoardIdentity, SyncStrategy},
    upload::{UploadEvent, UploadSession, UploadState},
};
