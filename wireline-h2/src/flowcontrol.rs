//! HTTP/2 flow control window tracking (RFC 7540 Section 6.9).
//!
//! Two layers: `FlowControl` is the raw signed window, `ReceiveWindow` adds
//! the WINDOW_UPDATE emission policy for inbound data. Every session has one
//! of each pair (send/receive), and so does every stream.

use crate::error::H2Error;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Largest legal window value, 2^31 - 1 (RFC 7540 Section 6.9.1).
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// A send or receive flow control window.
///
/// The window is signed: a SETTINGS change to INITIAL_WINDOW_SIZE may push
/// a send window below zero (RFC 7540 Section 6.9.2), in which case the
/// sender must wait for WINDOW_UPDATEs before emitting more DATA.
#[derive(Debug, Clone)]
pub struct FlowControl {
    window: i64,
}

impl FlowControl {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    /// Current window size.
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Consume `amount` bytes from the window. Fails if the window would
    /// go below zero; the window is left unchanged on failure.
    pub fn consume(&mut self, amount: u32) -> Result<(), H2Error> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(H2Error::FlowControl);
        }
        self.window = new;
        Ok(())
    }

    /// Add a WINDOW_UPDATE increment. Fails when the window would exceed
    /// 2^31 - 1.
    pub fn increase(&mut self, increment: u32) -> Result<(), H2Error> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(H2Error::FlowControl);
        }
        self.window = new;
        Ok(())
    }

    /// Apply a SETTINGS delta to INITIAL_WINDOW_SIZE. `delta` is
    /// (new_initial - old_initial) and may be negative; the resulting
    /// window may be negative too. Fails only above 2^31 - 1.
    pub fn adjust(&mut self, delta: i64) -> Result<(), H2Error> {
        let new = self.window + delta;
        if new > MAX_WINDOW_SIZE {
            return Err(H2Error::FlowControl);
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// A receive window plus the WINDOW_UPDATE emission policy.
///
/// Policy: once the window has fallen below half of its configured size and
/// at least one DATA frame has been delivered since the last update, restore
/// the window to the configured size with a single WINDOW_UPDATE. One update
/// per half-window keeps the peer fed without producing a frame per byte.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    window: FlowControl,
    configured: i64,
    data_delivered: bool,
}

impl ReceiveWindow {
    pub fn new(configured: i64) -> Self {
        Self {
            window: FlowControl::new(configured),
            configured,
            data_delivered: false,
        }
    }

    pub fn window(&self) -> i64 {
        self.window.window()
    }

    /// Account for one inbound DATA frame of `len` payload bytes. Fails
    /// when the peer overruns the advertised window.
    pub fn on_data(&mut self, len: u32) -> Result<(), H2Error> {
        self.window.consume(len)?;
        self.data_delivered = true;
        Ok(())
    }

    /// Returns the WINDOW_UPDATE increment to emit now, if the policy says
    /// one is due. The increment is applied to the local account before
    /// returning, so callers just encode the frame.
    pub fn poll_update(&mut self) -> Option<u32> {
        if !self.data_delivered || self.window.window() >= self.configured / 2 {
            return None;
        }
        let increment = self.configured - self.window.window();
        debug_assert!(increment > 0);
        self.window.increase(increment as u32).ok()?;
        self.data_delivered = false;
        Some(increment as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_consume_and_increase() {
        let mut fc = FlowControl::default();
        assert_eq!(fc.window(), 65_535);
        fc.consume(1000).unwrap();
        assert_eq!(fc.window(), 64_535);
        fc.increase(500).unwrap();
        assert_eq!(fc.window(), 65_035);
    }

    #[test]
    fn consume_underflow() {
        let mut fc = FlowControl::new(100);
        assert!(fc.consume(101).is_err());
        assert_eq!(fc.window(), 100); // unchanged
    }

    #[test]
    fn increase_overflow() {
        let mut fc = FlowControl::new(MAX_WINDOW_SIZE);
        assert!(fc.increase(1).is_err());
    }

    #[test]
    fn adjust_may_go_negative() {
        let mut fc = FlowControl::new(100);
        fc.adjust(-200).unwrap();
        assert_eq!(fc.window(), -100);
        assert!(fc.consume(1).is_err());
        fc.increase(101).unwrap();
        fc.consume(1).unwrap();
        assert_eq!(fc.window(), 0);
    }

    #[test]
    fn adjust_overflow() {
        let mut fc = FlowControl::new(MAX_WINDOW_SIZE - 1);
        assert!(fc.adjust(2).is_err());
    }

    #[test]
    fn no_update_before_any_data() {
        let mut rw = ReceiveWindow::new(1000);
        assert_eq!(rw.poll_update(), None);
    }

    #[test]
    fn no_update_above_half_window() {
        let mut rw = ReceiveWindow::new(1000);
        rw.on_data(400).unwrap();
        assert_eq!(rw.poll_update(), None);
    }

    #[test]
    fn update_restores_configured_size() {
        let mut rw = ReceiveWindow::new(1000);
        rw.on_data(600).unwrap();
        assert_eq!(rw.poll_update(), Some(600));
        assert_eq!(rw.window(), 1000);
        // Nothing more due until new data arrives.
        assert_eq!(rw.poll_update(), None);
    }

    #[test]
    fn updates_are_not_per_byte() {
        let mut rw = ReceiveWindow::new(1000);
        let mut updates = 0;
        for _ in 0..100 {
            rw.on_data(10).unwrap();
            if rw.poll_update().is_some() {
                updates += 1;
            }
        }
        // 1000 bytes delivered against a 1000-byte window: exactly one
        // update fires (at the half-window mark), not one per frame.
        assert_eq!(updates, 1);
    }

    #[test]
    fn overrun_is_an_error() {
        let mut rw = ReceiveWindow::new(10);
        assert!(rw.on_data(11).is_err());
    }
}
