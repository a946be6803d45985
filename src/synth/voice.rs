use std::sync::Arc;

use crate::component::{
    Capabilities, ComponentError, ComponentKind, ComponentManager, ComponentResult, NodeBundle,
    Settings,
};
use crate::graph::{AudioContext, NodeId, ParamRef};
use crate::RAMP_SECS;

use super::builder::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// On the serial audio path.
    Chain,
    /// Beside it, feeding modulation inputs.
    Modulator,
}

/// One component instance owned by a voice.
pub struct Part {
    pub(crate) kind: ComponentKind,
    pub(crate) manager: Arc<dyn ComponentManager>,
    pub(crate) bundle: NodeBundle,
    /// Settings the component was built with, kept current across updates.
    pub(crate) settings: Settings,
    pub(crate) role: Role,
    pub(crate) optional: bool,
}

impl Part {
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn bundle(&self) -> &NodeBundle {
        &self.bundle
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn has(&self, capability: Capabilities) -> bool {
        self.manager.capabilities().contains(capability)
    }
}

/// One fully wired note's worth of components.
pub struct Voice {
    parts: Vec<Part>,
    input: Option<NodeId>,
    output: NodeId,
    diagnostics: Vec<Diagnostic>,
    disposed: bool,
}

impl Voice {
    pub(crate) fn new(
        parts: Vec<Part>,
        input: Option<NodeId>,
        output: NodeId,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            parts,
            input,
            output,
            diagnostics,
            disposed: false,
        }
    }

    /// Audio input of the first chain component, when the chain starts with
    /// a processor.
    pub fn input(&self) -> Option<NodeId> {
        self.input
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part(&self, kind: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.kind.as_str() == kind)
    }

    pub fn bundle(&self, kind: &str) -> Option<&NodeBundle> {
        self.part(kind).map(|p| &p.bundle)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Resolve a `component.param` path to a modulatable parameter.
    pub fn param(&self, path: &str) -> Option<ParamRef> {
        let (kind, param) = path.split_once('.')?;
        self.bundle(kind)?.mod_inputs.get(param).copied()
    }

    /// Pitch every key-tracking part, then open every temporal one.
    pub fn trigger_attack(
        &mut self,
        ctx: &mut dyn AudioContext,
        frequency: f32,
        velocity: f32,
        at: f64,
    ) -> ComponentResult {
        self.ensure_live()?;
        for part in self.parts.iter_mut().filter(|p| p.has(Capabilities::KEY_TRACKING)) {
            if let Err(err) = part.manager.set_pitch(ctx, &mut part.bundle, frequency, at) {
                log::warn!(target: "voicegraph::voice", "`{}` set_pitch: {err}", part.kind);
            }
        }
        for part in self.parts.iter().filter(|p| p.has(Capabilities::TEMPORAL)) {
            if let Err(err) = part.manager.trigger_attack(ctx, &part.bundle, at, velocity) {
                log::warn!(target: "voicegraph::voice", "`{}` trigger_attack: {err}", part.kind);
            }
        }
        Ok(())
    }

    /// Move a held voice to a new pitch. Key-tracking parts glide when their
    /// settings ask for portamento.
    pub fn set_pitch(&mut self, ctx: &mut dyn AudioContext, frequency: f32, at: f64) -> ComponentResult {
        self.ensure_live()?;
        for part in self.parts.iter_mut().filter(|p| p.has(Capabilities::KEY_TRACKING)) {
            part.manager.set_pitch(ctx, &mut part.bundle, frequency, at)?;
        }
        Ok(())
    }

    /// Release every temporal part. Returns when the slowest tail ends.
    pub fn trigger_release(&mut self, ctx: &mut dyn AudioContext, at: f64) -> f64 {
        if self.disposed {
            return at;
        }
        for part in self.parts.iter().filter(|p| p.has(Capabilities::TEMPORAL)) {
            if let Err(err) = part.manager.trigger_release(ctx, &part.bundle, at) {
                log::warn!(target: "voicegraph::voice", "`{}` trigger_release: {err}", part.kind);
            }
        }
        at + self.release_tail()
    }

    /// Longest release tail over the voice's parts.
    pub fn release_tail(&self) -> f64 {
        self.parts
            .iter()
            .map(|p| p.manager.release_tail(&p.settings))
            .fold(0.0, f64::max)
    }

    /// Ramp every modulator and the voice's output stage to zero through
    /// their bypasses. Returns the time at which the voice is silent.
    ///
    /// Modulation adds to a parameter's base value, so a route into the
    /// output stage would keep sounding through a fade of the base alone.
    pub fn silence(&mut self, ctx: &mut dyn AudioContext) -> f64 {
        let now = ctx.now();
        if self.disposed {
            return now;
        }
        for part in self.parts.iter_mut().filter(|p| p.role == Role::Modulator) {
            if part.manager.bypass().is_none() {
                continue;
            }
            if let Err(err) = part.manager.enable(ctx, &mut part.bundle, false) {
                log::warn!(target: "voicegraph::voice", "silencing modulator `{}`: {err}", part.kind);
            }
        }
        let stage = self
            .parts
            .iter_mut()
            .rev()
            .filter(|p| p.role == Role::Chain)
            .find(|p| p.manager.bypass().is_some());
        match stage {
            Some(part) => match part.manager.enable(ctx, &mut part.bundle, false) {
                Ok(()) => now + RAMP_SECS,
                Err(err) => {
                    log::warn!(target: "voicegraph::voice", "silencing through `{}`: {err}", part.kind);
                    now
                }
            },
            None => {
                log::debug!(target: "voicegraph::voice", "no bypassable output stage; cutting immediately");
                now
            }
        }
    }

    /// Silence, then dispose every part newest first once the fade is over.
    /// Only the first call does anything. Returns the scheduled release time.
    pub fn dispose(&mut self, ctx: &mut dyn AudioContext) -> f64 {
        if self.disposed {
            return ctx.now();
        }
        let at = self.silence(ctx);
        for part in self.parts.iter_mut().rev() {
            part.manager.dispose(ctx, &mut part.bundle, at);
        }
        self.disposed = true;
        at
    }

    /// Live edit of one component. The stored settings follow the patch so
    /// later release timing sees it.
    pub fn update(&mut self, ctx: &mut dyn AudioContext, kind: &str, patch: &Settings) -> ComponentResult {
        self.ensure_live()?;
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.kind.as_str() == kind)
            .ok_or(ComponentError::InvalidNodes)?;
        part.manager.update(ctx, &mut part.bundle, patch)?;
        part.settings = part.settings.merged(patch);
        Ok(())
    }

    pub fn enable(&mut self, ctx: &mut dyn AudioContext, kind: &str, enabled: bool) -> ComponentResult {
        self.ensure_live()?;
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.kind.as_str() == kind)
            .ok_or(ComponentError::InvalidNodes)?;
        part.manager.enable(ctx, &mut part.bundle, enabled)
    }

    fn ensure_live(&self) -> ComponentResult {
        if self.disposed {
            Err(ComponentError::InvalidNodes)
        } else {
            Ok(())
        }
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        if !self.disposed && !self.parts.is_empty() {
            log::warn!(target: "voicegraph::voice", "voice dropped without dispose; {} parts leaked", self.parts.len());
        }
    }
}
