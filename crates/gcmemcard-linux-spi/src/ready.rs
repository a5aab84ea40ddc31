//! Card INT line via the GPIO character device
//!
//! The card pulls INT low when a status-changing command completes, so the
//! line is requested as an input with falling edge detection and the kernel
//! queues the edges for us.

use std::time::Duration;

use gpiocdev::line::{EdgeDetection, Offset};
use gpiocdev::request::{Config, Request};

use crate::error::{LinuxSpiError, Result};

/// Consumer label shown by `gpioinfo`
const CONSUMER: &str = "gcmemcard";

/// Requested INT line
pub struct ReadyLine {
    request: Request,
    offset: Offset,
}

impl ReadyLine {
    /// Request `line` on `chip` (path such as `/dev/gpiochip0` or chip name)
    pub fn open(chip: &str, line: Offset) -> Result<Self> {
        log::debug!("linux_spi: Requesting INT line {} on {}", line, chip);

        let mut config = Config::default();
        config
            .with_line(line)
            .as_input()
            .with_edge_detection(EdgeDetection::FallingEdge);

        let request = Request::from_config(config)
            .on_chip(chip)
            .with_consumer(CONSUMER)
            .request()
            .map_err(|e| LinuxSpiError::LineRequestFailed {
                chip: chip.to_string(),
                line,
                source: e,
            })?;

        Ok(Self {
            request,
            offset: line,
        })
    }

    /// Line offset on its chip
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Wait for the next falling edge
    ///
    /// Returns `Ok(false)` if none arrived within `timeout`.
    pub fn wait_falling_edge(&mut self, timeout: Duration) -> Result<bool> {
        let ready = self
            .request
            .wait_edge_event(timeout)
            .map_err(LinuxSpiError::EdgeEventFailed)?;
        if !ready {
            return Ok(false);
        }
        let event = self
            .request
            .read_edge_event()
            .map_err(LinuxSpiError::EdgeEventFailed)?;
        log::trace!("linux_spi: INT {:?} at {} ns", event.kind, event.timestamp_ns);
        Ok(true)
    }
}
