//! Linear-interpolating resampler from the fixed emulated rate to the host
//! rate, buffering interleaved stereo output.

use chroma_core::types::AudioSample;

#[derive(Debug, Clone)]
pub struct Resampler {
    input_rate: f64,
    output_rate: u32,
    speed: f64,
    /// Input samples consumed per output sample
    step: f64,
    /// Position of the next output between `prev` and the incoming sample
    pos: f64,
    prev: (i16, i16),
    out: Vec<AudioSample>,
}

impl Resampler {
    pub fn new(input_rate: f64, output_rate: u32) -> Self {
        let mut resampler = Self {
            input_rate,
            output_rate: output_rate.max(1),
            speed: 1.0,
            step: 1.0,
            pos: 0.0,
            prev: (0, 0),
            out: Vec::new(),
        };
        resampler.retune();
        resampler
    }

    fn retune(&mut self) {
        self.step = self.input_rate * self.speed / self.output_rate as f64;
    }

    /// Faster emulation consumes more input per output sample, raising pitch.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
        self.retune();
    }

    pub fn push(&mut self, left: i16, right: i16) {
        while self.pos < 1.0 {
            let lerp = |a: i16, b: i16| -> i16 { (a as f64 + (b as f64 - a as f64) * self.pos) as i16 };
            self.out.push(lerp(self.prev.0, left));
            self.out.push(lerp(self.prev.1, right));
            self.pos += self.step;
        }
        self.pos -= 1.0;
        self.prev = (left, right);
    }

    /// Hand out complete chunks of `frames` stereo frames.
    pub fn drain_chunks(&mut self, frames: usize, mut deliver: impl FnMut(&[AudioSample])) {
        let chunk = frames.max(1) * 2;
        let mut start = 0;
        while self.out.len() - start >= chunk {
            deliver(&self.out[start..start + chunk]);
            start += chunk;
        }
        self.out.drain(..start);
    }

    pub fn clear(&mut self) {
        self.out.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_passes_through() {
        let mut rs = Resampler::new(100.0, 100);
        rs.push(100, -100);
        rs.push(200, -200);
        assert_eq!(rs.out.len(), 4);
        let mut got = Vec::new();
        rs.drain_chunks(2, |c| got.extend_from_slice(c));
        assert_eq!(got, vec![0, 0, 100, -100]);
    }

    #[test]
    fn halves_rate() {
        let mut rs = Resampler::new(200.0, 100);
        for _ in 0..100 {
            rs.push(1000, 1000);
        }
        assert_eq!(rs.out.len(), 100);
    }

    #[test]
    fn interpolates_between_inputs() {
        let mut rs = Resampler::new(50.0, 100);
        rs.push(0, 0);
        rs.push(100, 100);
        let mut got = Vec::new();
        rs.drain_chunks(1, |c| got.push(c[0]));
        assert_eq!(got, vec![0, 0, 0, 50]);
    }

    #[test]
    fn speed_shrinks_output() {
        let mut normal = Resampler::new(1000.0, 1000);
        let mut fast = Resampler::new(1000.0, 1000);
        fast.set_speed(2.0);
        for _ in 0..1000 {
            normal.push(1, 1);
            fast.push(1, 1);
        }
        assert_eq!(normal.out.len(), 2000);
        assert_eq!(fast.out.len(), 1000);
    }

    #[test]
    fn partial_chunks_stay_buffered() {
        let mut rs = Resampler::new(100.0, 100);
        for i in 0..5 {
            rs.push(i, i);
        }
        let mut chunks = 0;
        rs.drain_chunks(2, |_| chunks += 1);
        assert_eq!(chunks, 2);
        assert_eq!(rs.out.len(), 2);
    }
}
