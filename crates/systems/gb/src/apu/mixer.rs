//! Stereo mixer: NR50 master volume and NR51 panning.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mixer {
    pub nr50: u8,
    pub nr51: u8,
    /// Per-side pre-volume sums of channel output integrated over the window
    left: i64,
    right: i64,
    dots: u32,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add each channel's integrated level (`areas[n]` for channel n+1).
    pub fn accumulate(&mut self, areas: [i32; 4], dots: u32) {
        for (ch, &area) in areas.iter().enumerate() {
            if self.nr51 & (0x10 << ch) != 0 {
                self.left += area as i64;
            }
            if self.nr51 & (0x01 << ch) != 0 {
                self.right += area as i64;
            }
        }
        self.dots += dots;
    }

    pub fn window_dots(&self) -> u32 {
        self.dots
    }

    /// Average the window into one stereo sample and start a new window.
    pub fn take_sample(&mut self) -> (i16, i16) {
        if self.dots == 0 {
            return (0, 0);
        }
        let scale = |sum: i64, vol: u8| -> i16 {
            let v = sum * (vol as i64 + 1) * 64 / self.dots as i64;
            v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
        };
        let out = (
            scale(self.left, (self.nr50 >> 4) & 7),
            scale(self.right, self.nr50 & 7),
        );
        self.left = 0;
        self.right = 0;
        self.dots = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panning_routes_channels() {
        let mut mixer = Mixer::new();
        mixer.nr50 = 0x77;
        mixer.nr51 = 0x21; // ch2 left, ch1 right
        mixer.accumulate([15 * 10, -15 * 10, 15 * 10, 15 * 10], 10);
        let (l, r) = mixer.take_sample();
        assert_eq!(l, -15 * 8 * 64);
        assert_eq!(r, 15 * 8 * 64);
    }

    #[test]
    fn master_volume_scales() {
        let mut mixer = Mixer::new();
        mixer.nr50 = 0x30;
        mixer.nr51 = 0x11;
        mixer.accumulate([10 * 4, 0, 0, 0], 4);
        assert_eq!(mixer.take_sample(), (10 * 4 * 64, 10 * 64));
    }

    #[test]
    fn silent_window() {
        let mut mixer = Mixer::new();
        mixer.nr50 = 0x77;
        mixer.nr51 = 0xFF;
        mixer.accumulate([0; 4], 95);
        assert_eq!(mixer.take_sample(), (0, 0));
        assert_eq!(mixer.window_dots(), 0);
    }
}
