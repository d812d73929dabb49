//! USB enumeration as the modem liveness signal.

use std::path::{Path, PathBuf};

/// USB enumeration facility.
pub trait UsbProbe: Send {
    fn is_present(&self, vendor_id: u16, product_id: u16) -> bool;
}

/// Scans `/sys/bus/usb/devices/*/{idVendor,idProduct}`.
#[derive(Debug, Clone)]
pub struct SysfsUsb {
    root: PathBuf,
}

impl SysfsUsb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let text = std::fs::read_to_string(path).ok()?;
    u16::from_str_radix(text.trim(), 16).ok()
}

impl UsbProbe for SysfsUsb {
    fn is_present(&self, vendor_id: u16, product_id: u16) -> bool {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "cannot list usb devices");
                return false;
            }
        };

        dir.flatten().any(|entry| {
            // Interface entries ("1-1:1.0") carry no id files and fall out here.
            let path = entry.path();
            read_hex_id(&path.join("idVendor")) == Some(vendor_id)
                && read_hex_id(&path.join("idProduct")) == Some(product_id)
        })
    }
}

/// Answers "is the modem enumerated right now". Holds no state beyond the
/// identifiers, so every call reflects the bus at that instant.
pub struct PresenceMonitor {
    probe: Box<dyn UsbProbe>,
    vendor_id: u16,
    product_id: u16,
}

impl PresenceMonitor {
    pub fn new(probe: Box<dyn UsbProbe>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            probe,
            vendor_id,
            product_id,
        }
    }

    pub fn is_enumerated(&self) -> bool {
        let present = self.probe.is_present(self.vendor_id, self.product_id);
        tracing::trace!(
            vendor_id = self.vendor_id,
            product_id = self.product_id,
            present,
            "usb enumeration check"
        );
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_device(root: &Path, name: &str, vid: &str, pid: &str) {
        let d = root.join(name);
        std::fs::create_dir(&d).unwrap();
        std::fs::write(d.join("idVendor"), format!("{vid}\n")).unwrap();
        std::fs::write(d.join("idProduct"), format!("{pid}\n")).unwrap();
    }

    #[test]
    fn finds_matching_device() {
        let dir = TempDir::new().unwrap();
        add_device(dir.path(), "usb1", "1d6b", "0002");
        add_device(dir.path(), "1-1.3", "1199", "68c0");
        std::fs::create_dir(dir.path().join("1-1.3:1.0")).unwrap();

        let usb = SysfsUsb::new(dir.path());
        assert!(usb.is_present(0x1199, 0x68c0));
        assert!(!usb.is_present(0x1199, 0x9091));
    }

    #[test]
    fn empty_bus_is_absent() {
        let dir = TempDir::new().unwrap();
        add_device(dir.path(), "usb1", "1d6b", "0002");
        let monitor = PresenceMonitor::new(Box::new(SysfsUsb::new(dir.path())), 0x1199, 0x68c0);
        assert!(!monitor.is_enumerated());
    }

    #[test]
    fn missing_root_is_absent() {
        let usb = SysfsUsb::new("/nonexistent/usb/devices");
        assert!(!usb.is_present(0x1199, 0x68c0));
    }
}
