//! Serial port access: the async byte pipe ([`channel`]) plus port enumeration
//! for `comftp list-coms`.

pub mod channel;

pub use channel::{SerialChannel, SerialError};

/// List the device paths of all serial ports the OS can see, sorted for
/// stable output, used by `comftp list-coms`.
pub fn list_port_names() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default();
    names.sort();
    names
}
