use std::time::Instant;

/// Where elapsed time comes from.
///
/// `reset` marks the start of a freshly built program; `seconds` is measured
/// from the most recent reset and is called once per drawn frame.
pub trait TimeSource: Send {
    fn reset(&mut self);
    fn seconds(&mut self) -> f32;
}

/// Monotonic wall clock, used while rendering to a window.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn seconds(&mut self) -> f32 {
        self.origin.elapsed().as_secs_f32()
    }
}

/// Advances by a constant step per frame, for deterministic output.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    step: f32,
    frame: u64,
}

impl FixedTimeSource {
    /// `step` is the number of seconds between consecutive frames.
    pub fn new(step: f32) -> Self {
        Self { step, frame: 0 }
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn seconds(&mut self) -> f32 {
        let seconds = self.step * self.frame as f32;
        self.frame = self.frame.saturating_add(1);
        seconds
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;
