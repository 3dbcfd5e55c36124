//! Cross-process exclusive device claim
//!
//! An advisory OS file lock per device descriptor. The OS drops the lock when
//! the holding process exits, so a crashed worker never leaves a device claimed.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use contracts::{DeviceDescriptor, DeviceError};
use tracing::debug;

#[derive(Debug)]
pub struct DeviceLock {
    path: PathBuf,
    _file: File,
}

impl DeviceLock {
    /// Claim `descriptor`, failing with `Busy` if another holder exists
    pub fn acquire(lock_dir: &Path, descriptor: &DeviceDescriptor) -> Result<Self, DeviceError> {
        std::fs::create_dir_all(lock_dir).map_err(|e| {
            DeviceError::driver(descriptor.as_str(), format!("lock dir {}: {e}", lock_dir.display()))
        })?;
        let path = lock_dir.join(lock_file_name(descriptor));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| DeviceError::driver(descriptor.as_str(), format!("lock file: {e}")))?;

        match file.try_lock() {
            Ok(()) => {
                debug!(device = %descriptor, lock = %path.display(), "device claimed");
                Ok(Self { path, _file: file })
            }
            Err(TryLockError::WouldBlock) => Err(DeviceError::busy(descriptor.as_str())),
            Err(TryLockError::Error(e)) => Err(DeviceError::driver(
                descriptor.as_str(),
                format!("lock {}: {e}", path.display()),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `/dev/ttyACM1` → `dev_ttyACM1.lock`, `COM3` → `COM3.lock`
fn lock_file_name(descriptor: &DeviceDescriptor) -> String {
    let sanitized: String = descriptor
        .as_str()
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{sanitized}.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_busy_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DeviceDescriptor::new("COM3");

        let first = DeviceLock::acquire(dir.path(), &descriptor).unwrap();
        let second = DeviceLock::acquire(dir.path(), &descriptor);
        assert!(matches!(second, Err(DeviceError::Busy { .. })));

        drop(first);
        assert!(DeviceLock::acquire(dir.path(), &descriptor).is_ok());
    }

    #[test]
    fn test_distinct_devices_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = DeviceLock::acquire(dir.path(), &"/dev/ttyACM0".into()).unwrap();
        let _b = DeviceLock::acquire(dir.path(), &"/dev/ttyACM1".into()).unwrap();
    }

    #[test]
    fn test_lock_file_name() {
        assert_eq!(lock_file_name(&"/dev/ttyACM1".into()), "dev_ttyACM1.lock");
        assert_eq!(lock_file_name(&"synthetic:cam".into()), "synthetic_cam.lock");
    }
}
