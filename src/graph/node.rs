/// Context passed to graph nodes during rendering.
///
/// - sample_rate: audio sample rate (e.g., 48000.0)
/// - time: context time of the block's first frame, in seconds
pub struct RenderCtx {
    pub sample_rate: f32,
    pub time: f64,
}

/// Core trait for render-side graph nodes.
///
/// `params` holds this block's effective parameter values, ordered as
/// `NodeKind::params` for the node's kind. `input` is the sum of every audio
/// edge into the node (silence when nothing is connected); source nodes
/// ignore it.
pub trait GraphNode: Send {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx);

    /// Gate high. Default implementation does nothing (ungated nodes).
    fn note_on(&mut self, _velocity: f32) {}

    /// Gate low. Default implementation does nothing (ungated nodes).
    fn note_off(&mut self, _sample_rate: f32) {}
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f32,
    to: f32,
    start: f64,
    end: f64,
}

/// A parameter's base value with an optional linear ramp in flight.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    value: f32,
    ramp: Option<Ramp>,
}

impl Param {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    pub fn value_at(&self, time: f64) -> f32 {
        match self.ramp {
            None => self.value,
            Some(r) if time <= r.start => r.from,
            Some(r) if time >= r.end => r.to,
            Some(r) => {
                let t = ((time - r.start) / (r.end - r.start)) as f32;
                r.from + (r.to - r.from) * t
            }
        }
    }

    /// Jump to `value`, cancelling any ramp.
    pub fn set(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    pub fn ramp_to(&mut self, value: f32, start: f64, duration: f64) {
        if duration <= 0.0 {
            self.set(value);
            return;
        }
        let from = self.value_at(start);
        self.value = value;
        self.ramp = Some(Ramp {
            from,
            to: value,
            start,
            end: start + duration,
        });
    }

    /// Forget a ramp that has finished by `time`.
    pub fn settle(&mut self, time: f64) {
        if matches!(self.ramp, Some(r) if time >= r.end) {
            self.ramp = None;
        }
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }
}
