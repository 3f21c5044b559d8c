//! Serial port discovery and classification.
//!
//! Discovery only lists ports and guesses what sits behind them from the USB
//! vendor/product ids. Whether a bootloader actually answers is decided by
//! the [port locator](crate::locate).

use serde::Serialize;

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB device kinds an autopilot may show up as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    /// PX4 board in its USB bootloader or application (3D Robotics VID).
    Px4,
    /// Hex/ProfiCNC Cube family.
    CubePilot,
    /// Holybro flight controllers.
    Holybro,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x26AC, &[], DeviceKind::Px4),
    (0x2DAE, &[], DeviceKind::CubePilot),
    (0x3162, &[], DeviceKind::Holybro),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Px4 => "PX4",
            Self::CubePilot => "CubePilot",
            Self::Holybro => "Holybro",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this is a flight controller's own USB interface rather than
    /// a UART bridge.
    pub fn is_autopilot(&self) -> bool {
        matches!(self, Self::Px4 | Self::CubePilot | Self::Holybro)
    }

    /// Probe order: autopilots first, then bridges, then everything else.
    fn rank(self) -> u8 {
        if self.is_autopilot() {
            0
        } else if self.is_known() {
            1
        } else {
            2
        }
    }
}

/// Discovered serial port information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with nothing known about it beyond its name.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }
}

/// List all serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::plain(port_info.port_name);

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        detected.name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// List all serial ports (no enumeration backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Order ports for probing, most likely bootloader first.
///
/// The sort is stable, so ports of equal rank keep enumeration order.
pub fn rank_candidates(mut ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    ports.sort_by_key(|p| {
        p.device
            .rank()
    });
    ports
}

/// Names of every detected port, in probe order.
pub fn candidate_ports() -> Vec<String> {
    rank_candidates(detect_ports())
        .into_iter()
        .map(|p| p.name)
        .collect()
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port
            .device
            .is_known()
        {
            format!(
                " [{}]",
                port.device
                    .name()
            )
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}
