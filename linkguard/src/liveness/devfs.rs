//! Linux watchdog device (`/dev/watchdog`).
//!
//! Opening the device arms it. Each keepalive ioctl restarts the countdown.
//! Writing the magic character `V` before closing stops it, unless the
//! driver was built with `nowayout`.

use nix::libc::c_int;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::LivenessTimer;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

// linux/watchdog.h
nix::ioctl_read!(wdioc_keepalive, b'W', 5, c_int);
nix::ioctl_readwrite!(wdioc_settimeout, b'W', 6, c_int);

const MAGIC_CLOSE: &[u8] = b"V";

pub struct DevWatchdog {
    path: PathBuf,
    file: Option<File>,
}

impl DevWatchdog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| Error::Liveness(format!("cannot open {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Opened watchdog device");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| Error::Liveness(format!("{} already disarmed", self.path.display())))
    }
}

impl LivenessTimer for DevWatchdog {
    fn configure(&mut self, timeout: Duration) -> Result<()> {
        let requested = c_int::try_from(timeout.as_secs())
            .map_err(|_| Error::Liveness(format!("timeout {:?} out of range", timeout)))?;
        let fd = self.file()?.as_raw_fd();
        let mut granted = requested;
        // SAFETY: fd is an open descriptor and `granted` outlives the call.
        unsafe { wdioc_settimeout(fd, &mut granted) }?;
        if granted != requested {
            warn!(requested, granted, "Watchdog adjusted the timeout");
        }
        Ok(())
    }

    fn confirm(&mut self) -> Result<()> {
        let fd = self.file()?.as_raw_fd();
        let mut unused: c_int = 0;
        // SAFETY: as above.
        unsafe { wdioc_keepalive(fd, &mut unused) }?;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(MAGIC_CLOSE)?;
        }
        Ok(())
    }
}
