//! Polyphony: a fixed set of voice slots and the note events that move them
//! between Idle, Building, Sounding and Releasing.
//!
//! When every slot is taken and stealing is on, the victim is the oldest
//! sounding voice by trigger time, else the oldest releasing one, ties going
//! to the lowest slot. Building voices are never stolen. A stolen voice is
//! faded through its output stage and disposed; the new note's attack waits
//! for the fade to finish.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;

use thiserror::Error;

use crate::component::{ComponentError, ComponentKind, Settings};
use crate::dsp::tuning::note_to_frequency;
use crate::graph::{AudioContext, ContextResult, NodeId, NodeSpec};
use crate::EngineConfig;

use super::builder::{BuildError, BuildPoll, VoiceBuild, VoiceBuilder};
use super::chain::VoicePreset;
use super::message::{velocity_to_gain, MessageReceiver, NoteMessage};
use super::voice::Voice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceState {
    Idle,
    Building,
    Sounding,
    Releasing,
}

/// Addresses one occupancy of a slot. A handle goes stale once its slot is
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    slot: usize,
    generation: u64,
}

impl VoiceHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice {}.{}", self.slot, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    StateChanged {
        handle: VoiceHandle,
        from: VoiceState,
        to: VoiceState,
    },
    Stolen {
        victim: VoiceHandle,
        by: VoiceHandle,
    },
    BuildFailed {
        handle: VoiceHandle,
        error: BuildError,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoteOnError {
    #[error("voice pool is not initialized")]
    NotInitialized,
    #[error("every voice slot is busy")]
    PolyphonyExhausted,
    #[error(transparent)]
    Build(#[from] BuildError),
}

#[derive(Debug, Clone, Copy)]
struct Note {
    pitch: u8,
    velocity: f32,
    at: f64,
}

enum Phase {
    Idle,
    Building { build: VoiceBuild, note: Note },
    Sounding { voice: Voice, note: Note },
    Releasing { voice: Voice, note: Note, until: f64 },
}

impl Phase {
    fn state(&self) -> VoiceState {
        match self {
            Phase::Idle => VoiceState::Idle,
            Phase::Building { .. } => VoiceState::Building,
            Phase::Sounding { .. } => VoiceState::Sounding,
            Phase::Releasing { .. } => VoiceState::Releasing,
        }
    }

    fn note(&self) -> Option<&Note> {
        match self {
            Phase::Idle => None,
            Phase::Building { note, .. } | Phase::Sounding { note, .. } | Phase::Releasing { note, .. } => {
                Some(note)
            }
        }
    }

    fn voice(&self) -> Option<&Voice> {
        match self {
            Phase::Sounding { voice, .. } | Phase::Releasing { voice, .. } => Some(voice),
            _ => None,
        }
    }

    fn voice_mut(&mut self) -> Option<&mut Voice> {
        match self {
            Phase::Sounding { voice, .. } | Phase::Releasing { voice, .. } => Some(voice),
            _ => None,
        }
    }
}

struct Slot {
    generation: u64,
    phase: Phase,
}

/// Fixed-size set of voices summed into one mixer node.
pub struct VoicePool {
    config: EngineConfig,
    builder: VoiceBuilder,
    preset: Arc<VoicePreset>,
    slots: Vec<Slot>,
    mixer: Option<NodeId>,
    events: VecDeque<PoolEvent>,
}

impl VoicePool {
    pub fn new(config: EngineConfig, builder: VoiceBuilder, preset: Arc<VoicePreset>) -> Self {
        let slots = (0..config.polyphony)
            .map(|_| Slot {
                generation: 0,
                phase: Phase::Idle,
            })
            .collect();
        Self {
            config,
            builder,
            preset,
            slots,
            mixer: None,
            events: VecDeque::new(),
        }
    }

    /// Create the mixer and connect it to the destination. Idempotent.
    pub fn ensure_initialized(&mut self, ctx: &mut dyn AudioContext) -> ContextResult {
        if self.mixer.is_some() {
            return Ok(());
        }
        let mixer = ctx.create_node(NodeSpec::Gain { gain: 1.0 })?;
        if let Err(err) = ctx.connect_destination(mixer) {
            let now = ctx.now();
            if let Err(release) = ctx.release_node(mixer, now) {
                log::warn!(target: "voicegraph::pool", "releasing unconnected mixer: {release}");
            }
            return Err(err);
        }
        log::debug!(target: "voicegraph::pool", "initialized with {} slots", self.slots.len());
        self.mixer = Some(mixer);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.mixer.is_some()
    }

    pub fn mixer(&self) -> Option<NodeId> {
        self.mixer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn polyphony(&self) -> usize {
        self.slots.len()
    }

    /// Dispose every voice, cancel every build, then release the mixer once
    /// the last fade is over.
    pub fn teardown(&mut self, ctx: &mut dyn AudioContext) {
        let mut silent = ctx.now();
        for index in 0..self.slots.len() {
            silent = silent.max(self.retire(ctx, index));
        }
        if let Some(mixer) = self.mixer.take() {
            if let Err(err) = ctx.disconnect_all(mixer, silent) {
                log::warn!(target: "voicegraph::pool", "disconnecting mixer: {err}");
            }
            if let Err(err) = ctx.release_node(mixer, silent) {
                log::warn!(target: "voicegraph::pool", "releasing mixer: {err}");
            }
        }
        log::debug!(target: "voicegraph::pool", "torn down");
    }

    /// Start a note. Takes the lowest idle slot, or steals when allowed. A
    /// voice whose assets are still loading stays Building until `poll`
    /// settles it.
    pub fn note_on(
        &mut self,
        ctx: &mut dyn AudioContext,
        pitch: u8,
        velocity: f32,
        at: f64,
    ) -> Result<VoiceHandle, NoteOnError> {
        if self.mixer.is_none() {
            return Err(NoteOnError::NotInitialized);
        }
        let now = ctx.now();
        self.reap(ctx, now);

        let (index, start, victim) = match self.idle_slot() {
            Some(index) => (index, at, None),
            None if !self.config.steal => {
                log::debug!(target: "voicegraph::pool", "note {pitch} dropped: no free slot");
                return Err(NoteOnError::PolyphonyExhausted);
            }
            None => {
                let index = self.steal_candidate().ok_or(NoteOnError::PolyphonyExhausted)?;
                let (victim, silent) = self.steal(ctx, index);
                (index, at.max(silent), Some(victim))
            }
        };

        self.slots[index].generation += 1;
        let handle = self.handle(index);
        if let Some(victim) = victim {
            log::debug!(target: "voicegraph::pool", "{victim} stolen by note {pitch}");
            self.emit(PoolEvent::Stolen { victim, by: handle });
        }
        self.emit_state(index, VoiceState::Idle, VoiceState::Building);

        let note = Note {
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
            at: start,
        };
        let build = match self.builder.start(ctx, &self.preset) {
            Ok(build) => build,
            Err(err) => return Err(self.fail_build(index, err)),
        };
        self.advance(ctx, index, build, note)?;
        Ok(handle)
    }

    /// Release a note. A building voice is cancelled outright. Returns false
    /// for stale handles and voices already releasing.
    pub fn note_off(&mut self, ctx: &mut dyn AudioContext, handle: VoiceHandle, at: f64) -> bool {
        let Some(index) = self.index_of(handle) else {
            return false;
        };
        match self.slots[index].phase.state() {
            VoiceState::Building => {
                self.retire(ctx, index);
                true
            }
            VoiceState::Sounding => {
                let (mut voice, note) = match mem::replace(&mut self.slots[index].phase, Phase::Idle) {
                    Phase::Sounding { voice, note } => (voice, note),
                    other => {
                        self.slots[index].phase = other;
                        return false;
                    }
                };
                let at = at.max(note.at);
                let until = voice.trigger_release(ctx, at) + self.config.release_margin_secs;
                self.slots[index].phase = Phase::Releasing { voice, note, until };
                self.emit_state(index, VoiceState::Sounding, VoiceState::Releasing);
                true
            }
            VoiceState::Idle | VoiceState::Releasing => false,
        }
    }

    /// Move a held note to `pitch`. A sounding voice re-pitches its
    /// key-tracking parts, gliding where portamento is set; a building one
    /// attacks at the new pitch once ready. Returns false for stale handles,
    /// releasing voices and re-pitch failures.
    pub fn set_note(&mut self, ctx: &mut dyn AudioContext, handle: VoiceHandle, pitch: u8, at: f64) -> bool {
        let Some(index) = self.index_of(handle) else {
            return false;
        };
        let frequency = note_to_frequency(f32::from(pitch), self.config.tuning_a4);
        match &mut self.slots[index].phase {
            Phase::Building { note, .. } => {
                note.pitch = pitch;
                true
            }
            Phase::Sounding { voice, note } => match voice.set_pitch(ctx, frequency, at.max(note.at)) {
                Ok(()) => {
                    note.pitch = pitch;
                    true
                }
                Err(err) => {
                    log::warn!(target: "voicegraph::pool", "re-pitching {handle}: {err}");
                    false
                }
            },
            Phase::Idle | Phase::Releasing { .. } => false,
        }
    }

    /// Release every sounding voice and cancel every build.
    pub fn all_notes_off(&mut self, ctx: &mut dyn AudioContext, at: f64) -> usize {
        let handles: Vec<VoiceHandle> = (0..self.slots.len())
            .filter(|&index| {
                matches!(
                    self.slots[index].phase.state(),
                    VoiceState::Building | VoiceState::Sounding
                )
            })
            .map(|index| self.handle(index))
            .collect();
        handles
            .into_iter()
            .filter(|&handle| self.note_off(ctx, handle, at))
            .count()
    }

    /// Settle building voices whose assets arrived, then dispose released
    /// voices whose tails are over.
    pub fn poll(&mut self, ctx: &mut dyn AudioContext) {
        let now = ctx.now();
        for index in 0..self.slots.len() {
            if self.slots[index].phase.state() != VoiceState::Building {
                continue;
            }
            let phase = mem::replace(&mut self.slots[index].phase, Phase::Idle);
            if let Phase::Building { build, note } = phase {
                if let Err(err) = self.advance(ctx, index, build, note) {
                    log::debug!(target: "voicegraph::pool", "slot {index} build settled with error: {err}");
                }
            }
        }
        self.reap(ctx, now);
    }

    /// Apply one note message. Note-off, a zero-velocity note-on and a
    /// note change address the most recent voice playing that pitch. A note
    /// change with no such voice starts a new note.
    pub fn handle_message(&mut self, ctx: &mut dyn AudioContext, message: NoteMessage) {
        match message {
            NoteMessage::NoteOn { note, velocity: 0, at } | NoteMessage::NoteOff { note, at } => {
                if let Some(handle) = self.find_pitch(note) {
                    self.note_off(ctx, handle, at);
                }
            }
            NoteMessage::NoteOn { note, velocity, at } => {
                if let Err(err) = self.note_on(ctx, note, velocity_to_gain(velocity), at) {
                    log::warn!(target: "voicegraph::pool", "note {note}: {err}");
                }
            }
            NoteMessage::SetNote { from, to, velocity, at } => match self.find_pitch(from) {
                Some(handle) => {
                    self.set_note(ctx, handle, to, at);
                }
                None => {
                    if let Err(err) = self.note_on(ctx, to, velocity_to_gain(velocity), at) {
                        log::warn!(target: "voicegraph::pool", "note {to}: {err}");
                    }
                }
            },
            NoteMessage::AllNotesOff { at } => {
                self.all_notes_off(ctx, at);
            }
        }
    }

    /// Drain a message queue. Returns how many messages were handled.
    pub fn process_messages(&mut self, ctx: &mut dyn AudioContext, receiver: &mut impl MessageReceiver) -> usize {
        let mut handled = 0;
        while let Some(message) = receiver.pop() {
            self.handle_message(ctx, message);
            handled += 1;
        }
        handled
    }

    pub fn preset(&self) -> &VoicePreset {
        &self.preset
    }

    /// Replace the preset for voices started from now on.
    pub fn set_preset(&mut self, preset: Arc<VoicePreset>) {
        self.preset = preset;
    }

    /// Patch `kind` in the preset and in every live voice that has it.
    /// Returns how many voices took the patch.
    pub fn update_component(&mut self, ctx: &mut dyn AudioContext, kind: &str, patch: &Settings) -> usize {
        Arc::make_mut(&mut self.preset).patch(kind, patch);
        let mut updated = 0;
        for slot in &mut self.slots {
            let Some(voice) = slot.phase.voice_mut() else {
                continue;
            };
            if voice.part(kind).is_none() {
                continue;
            }
            match voice.update(ctx, kind, patch) {
                Ok(()) => updated += 1,
                Err(err) => log::warn!(target: "voicegraph::pool", "updating `{kind}`: {err}"),
            }
        }
        updated
    }

    /// Toggle `kind` in the preset and in every live voice that has it.
    pub fn enable_component(&mut self, ctx: &mut dyn AudioContext, kind: &str, enabled: bool) -> usize {
        Arc::make_mut(&mut self.preset)
            .components
            .entry(ComponentKind::new(kind))
            .or_default()
            .enabled = enabled;
        let mut toggled = 0;
        for slot in &mut self.slots {
            let Some(voice) = slot.phase.voice_mut() else {
                continue;
            };
            if voice.part(kind).is_none() {
                continue;
            }
            match voice.enable(ctx, kind, enabled) {
                Ok(()) => toggled += 1,
                Err(ComponentError::Unsupported(_)) => {
                    log::debug!(target: "voicegraph::pool", "`{kind}` cannot be bypassed; future voices only");
                }
                Err(err) => log::warn!(target: "voicegraph::pool", "toggling `{kind}`: {err}"),
            }
        }
        toggled
    }

    /// Current state of a handle's voice; `None` once the handle is stale.
    pub fn state(&self, handle: VoiceHandle) -> Option<VoiceState> {
        self.index_of(handle).map(|index| self.slots[index].phase.state())
    }

    pub fn states(&self) -> Vec<VoiceState> {
        self.slots.iter().map(|slot| slot.phase.state()).collect()
    }

    /// Slots not Idle.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.phase.state() != VoiceState::Idle)
            .count()
    }

    pub fn voice(&self, handle: VoiceHandle) -> Option<&Voice> {
        self.index_of(handle).and_then(|index| self.slots[index].phase.voice())
    }

    pub fn handle_for_slot(&self, slot: usize) -> Option<VoiceHandle> {
        match self.slots.get(slot)?.phase {
            Phase::Idle => None,
            _ => Some(self.handle(slot)),
        }
    }

    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        self.events.drain(..).collect()
    }

    fn handle(&self, index: usize) -> VoiceHandle {
        VoiceHandle {
            slot: index,
            generation: self.slots[index].generation,
        }
    }

    fn index_of(&self, handle: VoiceHandle) -> Option<usize> {
        self.slots
            .get(handle.slot)
            .filter(|slot| slot.generation == handle.generation && !matches!(slot.phase, Phase::Idle))
            .map(|_| handle.slot)
    }

    fn idle_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot.phase, Phase::Idle))
    }

    fn steal_candidate(&self) -> Option<usize> {
        let oldest = |state: VoiceState| {
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.phase.state() == state)
                .filter_map(|(index, slot)| slot.phase.note().map(|note| (index, note.at)))
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(index, _)| index)
        };
        oldest(VoiceState::Sounding).or_else(|| oldest(VoiceState::Releasing))
    }

    fn find_pitch(&self, pitch: u8) -> Option<VoiceHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                matches!(slot.phase.state(), VoiceState::Building | VoiceState::Sounding)
            })
            .filter_map(|(index, slot)| slot.phase.note().map(|note| (index, note)))
            .filter(|(_, note)| note.pitch == pitch)
            .max_by(|a, b| a.1.at.total_cmp(&b.1.at).then(a.0.cmp(&b.0)))
            .map(|(index, _)| self.handle(index))
    }

    /// Release (if sounding) and dispose the voice in `index`. Returns the
    /// victim's handle and when it is silent.
    fn steal(&mut self, ctx: &mut dyn AudioContext, index: usize) -> (VoiceHandle, f64) {
        let victim = self.handle(index);
        let now = ctx.now();
        let phase = match mem::replace(&mut self.slots[index].phase, Phase::Idle) {
            Phase::Sounding { mut voice, note } => {
                let until = voice.trigger_release(ctx, now);
                self.emit_state(index, VoiceState::Sounding, VoiceState::Releasing);
                Phase::Releasing { voice, note, until }
            }
            other => other,
        };
        self.slots[index].phase = phase;
        let silent = self.retire(ctx, index);
        (victim, silent)
    }

    /// Return a slot to Idle, disposing or cancelling whatever it holds.
    /// Returns when the slot's output is silent.
    fn retire(&mut self, ctx: &mut dyn AudioContext, index: usize) -> f64 {
        let now = ctx.now();
        let phase = mem::replace(&mut self.slots[index].phase, Phase::Idle);
        let from = phase.state();
        let silent = match phase {
            Phase::Idle => return now,
            Phase::Building { build, .. } => {
                build.cancel(ctx);
                now
            }
            Phase::Sounding { mut voice, .. } | Phase::Releasing { mut voice, .. } => voice.dispose(ctx),
        };
        self.emit_state(index, from, VoiceState::Idle);
        silent
    }

    fn reap(&mut self, ctx: &mut dyn AudioContext, now: f64) {
        for index in 0..self.slots.len() {
            if matches!(self.slots[index].phase, Phase::Releasing { until, .. } if until <= now) {
                self.retire(ctx, index);
            }
        }
    }

    /// Poll a build once and move the slot according to the outcome.
    fn advance(
        &mut self,
        ctx: &mut dyn AudioContext,
        index: usize,
        build: VoiceBuild,
        note: Note,
    ) -> Result<(), NoteOnError> {
        match build.poll(ctx) {
            BuildPoll::Pending(build) => {
                log::debug!(target: "voicegraph::pool", "slot {index} waiting on assets");
                self.slots[index].phase = Phase::Building { build, note };
                Ok(())
            }
            BuildPoll::Ready(voice) => self.sound(ctx, index, voice, note),
            BuildPoll::Failed(err) => Err(self.fail_build(index, err)),
        }
    }

    fn sound(
        &mut self,
        ctx: &mut dyn AudioContext,
        index: usize,
        mut voice: Voice,
        note: Note,
    ) -> Result<(), NoteOnError> {
        let Some(mixer) = self.mixer else {
            voice.dispose(ctx);
            return Err(self.fail_build(index, BuildError::NoAudioOutput));
        };
        if let Err(err) = ctx.connect(voice.output(), mixer) {
            voice.dispose(ctx);
            let error = BuildError::ConnectFailed {
                kind: ComponentKind::new("mixer"),
                source: err.into(),
            };
            return Err(self.fail_build(index, error));
        }

        let at = note.at.max(ctx.now());
        let frequency = note_to_frequency(f32::from(note.pitch), self.config.tuning_a4);
        if let Err(err) = voice.trigger_attack(ctx, frequency, note.velocity, at) {
            log::warn!(target: "voicegraph::pool", "attack on slot {index}: {err}");
        }
        self.slots[index].phase = Phase::Sounding {
            voice,
            note: Note { at, ..note },
        };
        self.emit_state(index, VoiceState::Building, VoiceState::Sounding);
        Ok(())
    }

    fn fail_build(&mut self, index: usize, error: BuildError) -> NoteOnError {
        let handle = self.handle(index);
        log::warn!(target: "voicegraph::pool", "{handle} failed to build: {error}");
        self.slots[index].phase = Phase::Idle;
        self.emit_state(index, VoiceState::Building, VoiceState::Idle);
        self.emit(PoolEvent::BuildFailed {
            handle,
            error: error.clone(),
        });
        NoteOnError::Build(error)
    }

    fn emit_state(&mut self, index: usize, from: VoiceState, to: VoiceState) {
        let handle = self.handle(index);
        self.emit(PoolEvent::StateChanged { handle, from, to });
    }

    fn emit(&mut self, event: PoolEvent) {
        if self.events.len() >= self.config.queue_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::kinds;
    use crate::component::loader::DeferredSampleLibrary;
    use crate::component::ComponentRegistry;
    use crate::dsp::sample::SampleBuffer;
    use crate::graph::{ContextOp, NodeKind, RecordingContext};
    use crate::synth::chain::ChainConfiguration;
    use crate::RAMP_SECS;

    fn pool_with(config: EngineConfig, chain: ChainConfiguration, preset: VoicePreset) -> (VoicePool, Arc<DeferredSampleLibrary>) {
        let library = Arc::new(
            DeferredSampleLibrary::new().with("piano", SampleBuffer::new(vec![0.5; 64], 48_000.0)),
        );
        let registry = ComponentRegistry::standard(library.clone());
        let builder = VoiceBuilder::new(Arc::new(registry), Arc::new(chain));
        (VoicePool::new(config, builder, Arc::new(preset)), library)
    }

    fn pool(polyphony: usize) -> (VoicePool, RecordingContext) {
        let mut ctx = RecordingContext::new(48_000.0);
        let (mut pool, _) = pool_with(
            EngineConfig::default().with_polyphony(polyphony),
            ChainConfiguration::standard(),
            VoicePreset::standard(),
        );
        pool.ensure_initialized(&mut ctx).unwrap();
        (pool, ctx)
    }

    #[test]
    fn note_on_requires_initialization() {
        let mut ctx = RecordingContext::new(48_000.0);
        let (mut pool, _) = pool_with(
            EngineConfig::default(),
            ChainConfiguration::standard(),
            VoicePreset::standard(),
        );

        assert_eq!(pool.note_on(&mut ctx, 60, 1.0, 0.0), Err(NoteOnError::NotInitialized));
        pool.ensure_initialized(&mut ctx).unwrap();
        pool.ensure_initialized(&mut ctx).unwrap();
        assert_eq!(ctx.live_of_kind(NodeKind::Gain).len(), 1);
        assert!(ctx.reaches_destination(pool.mixer().unwrap()));
    }

    #[test]
    fn notes_take_the_lowest_free_slot() {
        let (mut pool, mut ctx) = pool(3);
        let a = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        let b = pool.note_on(&mut ctx, 64, 1.0, 0.1).unwrap();

        assert_eq!((a.slot(), b.slot()), (0, 1));
        assert_eq!(
            pool.states(),
            [VoiceState::Sounding, VoiceState::Sounding, VoiceState::Idle]
        );
        let osc = pool.voice(a).unwrap().bundle(kinds::OSCILLATOR).unwrap().node("osc").unwrap();
        assert!(ctx.reaches_destination(osc));
    }

    #[test]
    fn steals_the_oldest_sounding_voice() {
        let (mut pool, mut ctx) = pool(2);
        let first = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        let second = pool.note_on(&mut ctx, 62, 1.0, 0.1).unwrap();
        pool.drain_events();
        ctx.set_now(0.2);

        let third = pool.note_on(&mut ctx, 64, 1.0, 0.2).unwrap();

        assert_eq!(third.slot(), first.slot());
        assert_eq!(pool.state(first), None);
        assert_eq!(pool.state(second), Some(VoiceState::Sounding));
        assert!(pool
            .drain_events()
            .contains(&PoolEvent::Stolen { victim: first, by: third }));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn stolen_attack_waits_for_the_fade() {
        let (mut pool, mut ctx) = pool(1);
        pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        ctx.set_now(1.0);
        ctx.clear_ops();

        let handle = pool.note_on(&mut ctx, 67, 1.0, 1.0).unwrap();
        let env = pool.voice(handle).unwrap().bundle(kinds::AMPLITUDE_ENV).unwrap().node("env").unwrap();

        assert!(ctx.ops().iter().any(|op| matches!(
            op,
            ContextOp::TriggerAttack { node, at, .. } if *node == env && *at == 1.0 + RAMP_SECS
        )));
    }

    #[test]
    fn releasing_voices_are_stolen_before_none() {
        let (mut pool, mut ctx) = pool(2);
        let a = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        let b = pool.note_on(&mut ctx, 62, 1.0, 0.5).unwrap();
        pool.note_off(&mut ctx, a, 1.0);
        pool.note_off(&mut ctx, b, 1.0);

        let c = pool.note_on(&mut ctx, 64, 1.0, 1.1).unwrap();
        assert_eq!(c.slot(), a.slot());
        assert_eq!(pool.state(b), Some(VoiceState::Releasing));
    }

    #[test]
    fn ties_go_to_the_lowest_slot() {
        let (mut pool, mut ctx) = pool(3);
        for pitch in [60, 64, 67] {
            pool.note_on(&mut ctx, pitch, 1.0, 0.0).unwrap();
        }
        assert_eq!(pool.note_on(&mut ctx, 72, 1.0, 0.0).unwrap().slot(), 0);
    }

    #[test]
    fn exhausted_without_stealing() {
        let mut ctx = RecordingContext::new(48_000.0);
        let (mut pool, _) = pool_with(
            EngineConfig::default().with_polyphony(1).with_steal(false),
            ChainConfiguration::standard(),
            VoicePreset::standard(),
        );
        pool.ensure_initialized(&mut ctx).unwrap();
        pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();

        assert_eq!(
            pool.note_on(&mut ctx, 62, 1.0, 0.0),
            Err(NoteOnError::PolyphonyExhausted)
        );
    }

    #[test]
    fn released_voice_is_reaped_after_its_tail() {
        let preset = VoicePreset::standard().with(kinds::AMPLITUDE_ENV, Settings::new().with("release", 0.5));
        let mut ctx = RecordingContext::new(48_000.0);
        let (mut pool, _) = pool_with(EngineConfig::default(), ChainConfiguration::standard(), preset);
        pool.ensure_initialized(&mut ctx).unwrap();
        let handle = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();

        assert!(pool.note_off(&mut ctx, handle, 1.0));
        assert!(!pool.note_off(&mut ctx, handle, 1.0));

        ctx.set_now(1.5);
        pool.poll(&mut ctx);
        assert_eq!(pool.state(handle), Some(VoiceState::Releasing));

        ctx.set_now(1.5 + pool.config().release_margin_secs);
        pool.poll(&mut ctx);
        assert_eq!(pool.state(handle), None);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(ctx.live_count(), 1);
    }

    #[test]
    fn stale_handles_are_ignored() {
        let (mut pool, mut ctx) = pool(1);
        let old = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        let new = pool.note_on(&mut ctx, 62, 1.0, 0.0).unwrap();

        assert_eq!(old.slot(), new.slot());
        assert!(!pool.note_off(&mut ctx, old, 1.0));
        assert_eq!(pool.state(new), Some(VoiceState::Sounding));
    }

    #[test]
    fn building_voices_settle_on_poll_and_are_never_stolen() {
        let mut ctx = RecordingContext::new(48_000.0);
        let chain = ChainConfiguration::standard().with_source(kinds::SAMPLER).unwrap();
        let preset = VoicePreset::standard().with(kinds::SAMPLER, Settings::new());
        let (mut pool, library) = pool_with(EngineConfig::default().with_polyphony(1), chain, preset);
        pool.ensure_initialized(&mut ctx).unwrap();

        let handle = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        assert_eq!(pool.state(handle), Some(VoiceState::Building));
        assert_eq!(
            pool.note_on(&mut ctx, 62, 1.0, 0.0),
            Err(NoteOnError::PolyphonyExhausted)
        );

        library.complete_all();
        ctx.set_now(0.3);
        pool.poll(&mut ctx);

        assert_eq!(pool.state(handle), Some(VoiceState::Sounding));
        let sampler = pool.voice(handle).unwrap().bundle(kinds::SAMPLER).unwrap().node("sampler").unwrap();
        assert!(ctx.ops().iter().any(|op| matches!(
            op,
            ContextOp::TriggerAttack { node, at, .. } if *node == sampler && *at == 0.3
        )));
    }

    #[test]
    fn note_off_while_building_cancels() {
        let mut ctx = RecordingContext::new(48_000.0);
        let chain = ChainConfiguration::standard().with_source(kinds::SAMPLER).unwrap();
        let preset = VoicePreset::standard().with(kinds::SAMPLER, Settings::new());
        let (mut pool, library) = pool_with(EngineConfig::default(), chain, preset);
        pool.ensure_initialized(&mut ctx).unwrap();

        let handle = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        assert!(pool.note_off(&mut ctx, handle, 0.1));

        assert_eq!(pool.state(handle), None);
        assert_eq!(ctx.live_count(), 1);
        library.complete_all();
        pool.poll(&mut ctx);
        assert_eq!(ctx.live_count(), 1);
    }

    #[test]
    fn failed_build_frees_the_slot() {
        let (mut pool, mut ctx) = pool(2);
        ctx.fail_next_create(NodeKind::Filter);

        let err = pool.note_on(&mut ctx, 60, 1.0, 0.0).err();
        assert!(matches!(err, Some(NoteOnError::Build(BuildError::ComponentCreateFailed { .. }))));
        assert_eq!(pool.active_count(), 0);
        assert!(pool
            .drain_events()
            .iter()
            .any(|event| matches!(event, PoolEvent::BuildFailed { .. })));
        assert_eq!(ctx.live_count(), 1);
    }

    #[test]
    fn messages_address_voices_by_pitch() {
        let (mut pool, mut ctx) = pool(4);
        let (mut tx, mut rx) = rtrb::RingBuffer::<NoteMessage>::new(8);
        tx.push(NoteMessage::NoteOn { note: 60, velocity: 100, at: 0.0 }).unwrap();
        tx.push(NoteMessage::NoteOn { note: 64, velocity: 100, at: 0.0 }).unwrap();
        tx.push(NoteMessage::NoteOff { note: 60, at: 0.5 }).unwrap();
        tx.push(NoteMessage::NoteOn { note: 64, velocity: 0, at: 0.6 }).unwrap();

        assert_eq!(pool.process_messages(&mut ctx, &mut rx), 4);
        assert_eq!(
            pool.states(),
            [
                VoiceState::Releasing,
                VoiceState::Releasing,
                VoiceState::Idle,
                VoiceState::Idle
            ]
        );

        pool.handle_message(&mut ctx, NoteMessage::NoteOn { note: 67, velocity: 90, at: 1.0 });
        pool.handle_message(&mut ctx, NoteMessage::AllNotesOff { at: 1.2 });
        assert!(!pool.states().contains(&VoiceState::Sounding));
    }

    #[test]
    fn updates_reach_live_voices_and_later_ones() {
        let (mut pool, mut ctx) = pool(2);
        let first = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();

        let patch = Settings::new().with("frequency", 1200.0);
        assert_eq!(pool.update_component(&mut ctx, kinds::FILTER, &patch), 1);
        let second = pool.note_on(&mut ctx, 62, 1.0, 0.0).unwrap();

        for handle in [first, second] {
            let voice = pool.voice(handle).unwrap();
            assert_eq!(voice.part(kinds::FILTER).unwrap().settings().number("frequency", 0.0), 1200.0);
        }
    }

    #[test]
    fn enabling_an_optional_component_affects_new_voices() {
        let (mut pool, mut ctx) = pool(2);
        let first = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();

        assert_eq!(pool.enable_component(&mut ctx, kinds::DELAY, true), 0);
        let second = pool.note_on(&mut ctx, 62, 1.0, 0.0).unwrap();

        assert!(pool.voice(first).unwrap().bundle(kinds::DELAY).is_none());
        assert!(pool.voice(second).unwrap().bundle(kinds::DELAY).is_some());
    }

    #[test]
    fn teardown_releases_every_node() {
        let (mut pool, mut ctx) = pool(3);
        for pitch in [60, 64, 67] {
            pool.note_on(&mut ctx, pitch, 1.0, 0.0).unwrap();
        }

        pool.teardown(&mut ctx);

        assert_eq!(ctx.live_count(), 0);
        assert!(!pool.is_initialized());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn event_backlog_is_bounded() {
        let mut config = EngineConfig::default().with_polyphony(1);
        config.queue_capacity = 3;
        let mut ctx = RecordingContext::new(48_000.0);
        let (mut pool, _) = pool_with(config, ChainConfiguration::standard(), VoicePreset::standard());
        pool.ensure_initialized(&mut ctx).unwrap();
        for pitch in 60..66 {
            pool.note_on(&mut ctx, pitch, 1.0, 0.0).unwrap();
        }

        assert_eq!(pool.drain_events().len(), 3);
    }

    #[test]
    fn set_note_glides_a_sounding_voice() {
        let mut ctx = RecordingContext::new(48_000.0);
        let preset = VoicePreset::standard().with(kinds::OSCILLATOR, Settings::new().with("portamento", 0.2));
        let (mut pool, _) = pool_with(EngineConfig::default(), ChainConfiguration::standard(), preset);
        pool.ensure_initialized(&mut ctx).unwrap();
        let handle = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        let frequency = pool.voice(handle).unwrap().param("oscillator.frequency").unwrap();
        ctx.clear_ops();

        assert!(pool.set_note(&mut ctx, handle, 64, 0.25));

        let target = note_to_frequency(64.0, pool.config().tuning_a4);
        let glides: Vec<_> = ctx
            .ops()
            .iter()
            .filter(|op| matches!(
                op,
                ContextOp::RampParam { param, value, at, duration }
                    if *param == frequency && *value == target && *at == 0.25 && (*duration - 0.2).abs() < 1e-6
            ))
            .collect();
        assert_eq!(glides.len(), 1);

        // The moved voice now answers to its new pitch.
        pool.handle_message(&mut ctx, NoteMessage::NoteOff { note: 64, at: 0.5 });
        assert_eq!(pool.state(handle), Some(VoiceState::Releasing));
        assert!(!pool.set_note(&mut ctx, handle, 67, 0.6));
    }

    #[test]
    fn set_note_message_slides_or_starts_a_note() {
        let (mut pool, mut ctx) = pool(2);
        pool.handle_message(&mut ctx, NoteMessage::NoteOn { note: 60, velocity: 100, at: 0.0 });
        let held = pool.handle_for_slot(0).unwrap();

        pool.handle_message(&mut ctx, NoteMessage::SetNote { from: 60, to: 62, velocity: 100, at: 0.1 });
        assert_eq!(pool.active_count(), 1);
        let osc = pool.voice(held).unwrap().param("oscillator.frequency").unwrap();
        assert_eq!(ctx.param_value(osc), Some(note_to_frequency(62.0, pool.config().tuning_a4)));

        // Nothing holds 70, so the slide starts a fresh note at its target.
        pool.handle_message(&mut ctx, NoteMessage::SetNote { from: 70, to: 72, velocity: 100, at: 0.2 });
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn set_note_on_a_building_voice_attacks_at_the_new_pitch() {
        let mut ctx = RecordingContext::new(48_000.0);
        let chain = ChainConfiguration::standard().with_source(kinds::SAMPLER).unwrap();
        let preset = VoicePreset::standard().with(kinds::SAMPLER, Settings::new().with("instrument", "piano"));
        let (mut pool, library) = pool_with(EngineConfig::default(), chain, preset);
        pool.ensure_initialized(&mut ctx).unwrap();
        let handle = pool.note_on(&mut ctx, 60, 1.0, 0.0).unwrap();
        assert_eq!(pool.state(handle), Some(VoiceState::Building));

        assert!(pool.set_note(&mut ctx, handle, 67, 0.0));
        library.complete_all();
        pool.poll(&mut ctx);

        assert_eq!(pool.state(handle), Some(VoiceState::Sounding));
        pool.handle_message(&mut ctx, NoteMessage::NoteOff { note: 67, at: 0.1 });
        assert_eq!(pool.state(handle), Some(VoiceState::Releasing));
    }
}
