//! Note source running on its own thread, feeding the pool's message queue.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::Producer;
use voicegraph::synth::NoteMessage;

pub struct Arpeggio {
    notes: Vec<u8>,
    bpm: f64,
    /// Fraction of each step the note is held.
    gate: f64,
    repeats: usize,
    velocity: u8,
}

impl Arpeggio {
    pub fn new(notes: &[u8]) -> Self {
        Self {
            notes: notes.to_vec(),
            bpm: 120.0,
            gate: 0.5,
            repeats: 1,
            velocity: 100,
        }
    }

    pub fn bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn gate(mut self, gate: f64) -> Self {
        self.gate = gate.clamp(0.05, 1.0);
        self
    }

    pub fn repeat(mut self, repeats: usize) -> Self {
        self.repeats = repeats.max(1);
        self
    }

    /// Sixteenth-note step length.
    fn step(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.bpm / 4.0)
    }

    pub fn duration(&self) -> Duration {
        self.step() * (self.notes.len() * self.repeats) as u32
    }

    /// Play on a new thread. Messages carry no timestamp and sound as soon
    /// as the control loop picks them up.
    pub fn spawn(self, mut tx: Producer<NoteMessage>) -> JoinHandle<()> {
        thread::spawn(move || {
            let step = self.step();
            let held = step.mul_f64(self.gate);
            for _ in 0..self.repeats {
                for &note in &self.notes {
                    push(&mut tx, NoteMessage::NoteOn { note, velocity: self.velocity, at: 0.0 });
                    thread::sleep(held);
                    push(&mut tx, NoteMessage::NoteOff { note, at: 0.0 });
                    thread::sleep(step.saturating_sub(held));
                }
            }
            push(&mut tx, NoteMessage::AllNotesOff { at: 0.0 });
        })
    }
}

fn push(tx: &mut Producer<NoteMessage>, message: NoteMessage) {
    if tx.push(message).is_err() {
        log::warn!("note queue full, dropping {message:?}");
    }
}
