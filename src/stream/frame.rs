//! Frames stored in ring slots.

use std::time::{Duration, Instant};

/// Per-frame payload of a ring slot.
///
/// `reset` clears the payload for reuse when the writer reclaims the slot; the payload's
/// storage itself belongs to whatever produced it.
pub trait Payload: Default + Send + Sync + 'static {
    /// Clears the payload before the slot is written again.
    fn reset(&mut self);
}

impl Payload for () {
    fn reset(&mut self) {}
}

impl<T: Send + Sync + 'static> Payload for Option<T> {
    fn reset(&mut self) {
        *self = None;
    }
}

impl<T: Send + Sync + 'static> Payload for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// One media frame.
#[derive(Debug, Default)]
pub struct AVFrame<T> {
    /// Position in the track, assigned by the writer; strictly increasing.
    pub sequence: u32,
    /// Absolute timestamp of the frame.
    pub timestamp: Duration,
    /// Keyframe flag; a reader can resynchronize here.
    pub idr: bool,
    /// When the writer published the frame.
    pub write_time: Option<Instant>,
    /// Frame payload.
    pub payload: T,
}

impl<T: Payload> AVFrame<T> {
    pub(crate) fn reset(&mut self) {
        self.timestamp = Duration::ZERO;
        self.idr = false;
        self.write_time = None;
        self.payload.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_frame_but_keeps_sequence() {
        let mut frame = AVFrame {
            sequence: 7,
            timestamp: Duration::from_millis(40),
            idr: true,
            write_time: Some(Instant::now()),
            payload: vec![1u8, 2, 3],
        };
        frame.reset();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.timestamp, Duration::ZERO);
        assert!(!frame.idr);
        assert!(frame.payload.is_empty());
    }
}
