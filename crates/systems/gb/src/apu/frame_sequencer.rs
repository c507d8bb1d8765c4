//! 512 Hz frame sequencer, stepped every 8192 clocks.
//!
//! | Step | Length | Sweep | Envelope |
//! |------|--------|-------|----------|
//! | 0    | x      |       |          |
//! | 2    | x      | x     |          |
//! | 4    | x      |       |          |
//! | 6    | x      | x     |          |
//! | 7    |        |       | x        |

pub const STEP_PERIOD: u32 = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequencer {
    pub(super) position: u8,
    timer: u32,
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self {
            position: 0,
            timer: STEP_PERIOD,
        }
    }
}

/// Units clocked on one sequencer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepEvents {
    pub length: bool,
    pub sweep: bool,
    pub envelope: bool,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clocks left until the next step.
    pub fn until_step(&self) -> u32 {
        self.timer
    }

    /// Advance by at most `until_step()` clocks.
    pub fn advance(&mut self, dots: u32) -> Option<StepEvents> {
        self.timer -= dots.min(self.timer);
        if self.timer > 0 {
            return None;
        }
        self.timer = STEP_PERIOD;
        let step = self.position;
        self.position = (self.position + 1) & 7;
        Some(StepEvents {
            length: step & 1 == 0,
            sweep: step == 2 || step == 6,
            envelope: step == 7,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_every_8192() {
        let mut seq = FrameSequencer::new();
        assert_eq!(seq.advance(8191), None);
        let events = seq.advance(1).unwrap();
        assert!(events.length);
        assert!(!events.sweep);
        assert_eq!(seq.position, 1);
    }

    #[test]
    fn full_cycle_schedule() {
        let mut seq = FrameSequencer::new();
        let mut lengths = 0;
        let mut sweeps = 0;
        let mut envelopes = 0;
        for _ in 0..8 {
            let ev = seq.advance(STEP_PERIOD).unwrap();
            lengths += ev.length as u32;
            sweeps += ev.sweep as u32;
            envelopes += ev.envelope as u32;
        }
        assert_eq!((lengths, sweeps, envelopes), (4, 2, 1));
        assert_eq!(seq.position, 0);
    }
}
