use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    FailedOver,
}

/// Judges whether the control stream is alive from the time elapsed
/// since the last successfully decoded frame. Dropped or malformed
/// frames never feed this; only successful decodes refresh the
/// timestamp, and only elapsed time trips the failover.
#[derive(Debug)]
pub struct Watchdog {
    state: Liveness,
    last_frame: Option<Instant>,
}

impl Watchdog {
    /// Starts failed over: no frame has been seen yet, so the strip
    /// shows the default state until the first decode.
    pub fn new() -> Self {
        Watchdog {
            state: Liveness::FailedOver,
            last_frame: None,
        }
    }

    pub fn state(&self) -> Liveness {
        self.state
    }

    /// Records a successful decode. Returns true when this brought the
    /// stream back from failover.
    pub fn frame_received(&mut self, now: Instant) -> bool {
        self.last_frame = Some(now);
        let recovered = self.state == Liveness::FailedOver;
        self.state = Liveness::Live;
        recovered
    }

    /// Evaluates the timeout; called unconditionally every control
    /// loop iteration. Returns true exactly once per Live to
    /// FailedOver transition, so the caller renders the default state
    /// once and not on every quiet iteration.
    pub fn check(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.state != Liveness::Live {
            return false;
        }

        match self.last_frame {
            Some(last) if now.duration_since(last) > timeout => {
                self.state = Liveness::FailedOver;
                true
            }
            _ => false,
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Watchdog::new()
    }
}
