//! Output handles a system writes finished frames and samples into.
//!
//! The core never presents anything itself: a host passes sinks in at
//! construction and the system calls them synchronously from inside its
//! run loop, once per completed frame and once per filled audio chunk.

use crate::types::{AudioSample, Frame};

/// Receives one finished frame per vertical blank.
pub trait VideoSink: Send {
    fn frame_ready(&mut self, frame: &Frame);
}

/// Receives interleaved stereo samples (left, right, left, ...).
pub trait AudioSink: Send {
    fn push_samples(&mut self, samples: &[AudioSample]);

    /// Output rate the sink plays back at, in frames per second.
    fn sample_rate(&self) -> Option<u32> {
        None
    }
}

/// Discards everything; for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl VideoSink for NullSink {
    fn frame_ready(&mut self, _frame: &Frame) {}
}

impl AudioSink for NullSink {
    fn push_samples(&mut self, _samples: &[AudioSample]) {}
}

impl<T: VideoSink + ?Sized> VideoSink for Box<T> {
    fn frame_ready(&mut self, frame: &Frame) {
        (**self).frame_ready(frame);
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn push_samples(&mut self, samples: &[AudioSample]) {
        (**self).push_samples(samples);
    }

    fn sample_rate(&self) -> Option<u32> {
        (**self).sample_rate()
    }
}
