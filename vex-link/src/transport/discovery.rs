//! USB discovery of the robot controller's user port

use crate::error::{Error, Result};
use serialport::{SerialPortInfo, SerialPortType};

/// VEX Robotics USB vendor id (10376)
pub const VEX_USB_VID: u16 = 0x2888;
/// Brain user-port product id (1281)
pub const VEX_USB_PID: u16 = 0x0501;
/// Interface description of the user (program I/O) port
pub const USER_PORT_DESCRIPTION: &str = "VEX Robotics User Port";

/// Platform-neutral view of an attached serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub description: Option<String>,
}

impl From<&SerialPortInfo> for PortCandidate {
    fn from(info: &SerialPortInfo) -> Self {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => PortCandidate {
                name: info.port_name.clone(),
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                description: usb.product.clone(),
            },
            _ => PortCandidate {
                name: info.port_name.clone(),
                vid: None,
                pid: None,
                description: None,
            },
        }
    }
}

impl PortCandidate {
    pub fn is_user_port(&self) -> bool {
        self.vid == Some(VEX_USB_VID)
            && self.pid == Some(VEX_USB_PID)
            && self
                .description
                .as_deref()
                .is_some_and(|d| d.contains(USER_PORT_DESCRIPTION))
    }
}

/// First candidate that is a robot user port
pub fn find_user_port(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates.iter().find(|c| c.is_user_port())
}

/// Scan attached serial devices for the robot user port
pub fn discover_user_port() -> Result<String> {
    let candidates: Vec<PortCandidate> = serialport::available_ports()?
        .iter()
        .map(PortCandidate::from)
        .collect();
    log::debug!("Scanned {} serial devices", candidates.len());

    match find_user_port(&candidates) {
        Some(port) => {
            log::info!("Found robot user port: {}", port.name);
            Ok(port.name.clone())
        }
        None => Err(Error::DeviceNotFound),
    }
}
