use std::fmt;

use serialport::{SerialPortInfo, SerialPortType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortId(String);

impl PortId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

pub trait PortDiscovery: Send + Sync {
    /// Candidate ports in the order they should be tried.
    ///
    /// An empty list means "nothing right now", not an error.
    fn list_candidate_ports(&self) -> Vec<PortId>;
}

/// Enumerates the OS serial ports, or returns a fixed list when one is configured.
#[derive(Debug, Clone, Default)]
pub struct SerialPortDiscovery {
    fixed: Vec<PortId>,
}

impl SerialPortDiscovery {
    /// An empty list means enumerate the OS on every sweep.
    pub fn with_ports(ports: Vec<PortId>) -> Self {
        Self { fixed: ports }
    }
}

impl PortDiscovery for SerialPortDiscovery {
    fn list_candidate_ports(&self) -> Vec<PortId> {
        if !self.fixed.is_empty() {
            return self.fixed.clone();
        }

        match serialport::available_ports() {
            Ok(ports) => rank_ports(ports),
            Err(err) => {
                tracing::warn!("failed to enumerate serial ports: {err}");
                Vec::new()
            }
        }
    }
}

/// Bluetooth serial ports first, then USB adapters, then everything else,
/// each group sorted by name.
pub fn rank_ports(mut ports: Vec<SerialPortInfo>) -> Vec<PortId> {
    ports.sort_by(|a, b| {
        port_rank(&a.port_type)
            .cmp(&port_rank(&b.port_type))
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    ports.dedup_by(|a, b| a.port_name == b.port_name);

    ports.into_iter().map(|p| PortId(p.port_name)).collect()
}

fn port_rank(port_type: &SerialPortType) -> u8 {
    match port_type {
        SerialPortType::BluetoothPort => 0,
        SerialPortType::UsbPort(_) => 1,
        SerialPortType::PciPort => 2,
        SerialPortType::Unknown => 3,
    }
}
