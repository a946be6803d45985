use rtrb::Consumer;

/// Pitch-addressed note events from an input thread. Times are in the
/// audio context's clock; a time already past plays as soon as possible.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum NoteMessage {
    NoteOn { note: u8, velocity: u8, at: f64 },
    NoteOff { note: u8, at: f64 },
    /// Move the voice holding `from` to `to` (a legato slide).
    SetNote { from: u8, to: u8, velocity: u8, at: f64 },
    AllNotesOff { at: f64 },
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<NoteMessage>;
}

impl MessageReceiver for Consumer<NoteMessage> {
    fn pop(&mut self) -> Option<NoteMessage> {
        Consumer::pop(self).ok()
    }
}

/// MIDI velocity to a 0..=1 gain.
pub fn velocity_to_gain(velocity: u8) -> f32 {
    velocity.min(127) as f32 / 127.0
}
