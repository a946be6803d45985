//! Voice assembly.
//!
//! A build runs in two halves. `VoiceBuilder::start` creates every
//! component the preset asks for; components that wait on an asset are left
//! pending. `VoiceBuild::poll` settles the pending ones without blocking,
//! and once nothing is outstanding wires the chain, applies the routing
//! table and hands back a `Voice`. Any mandatory failure along the way
//! disposes everything already created, newest first.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::component::loader::{AssetPoll, PendingAsset};
use crate::component::{
    Capabilities, ComponentError, ComponentKind, ComponentManager, ComponentRegistry, Creation,
    NodeBundle, Settings,
};
use crate::graph::AudioContext;

use super::chain::{ChainConfiguration, ModulationRoute, VoicePreset};
use super::voice::{Part, Role, Voice};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("no manager registered for mandatory component `{0}`")]
    MissingMandatoryComponent(ComponentKind),
    #[error("creating `{kind}` failed: {source}")]
    ComponentCreateFailed {
        kind: ComponentKind,
        #[source]
        source: ComponentError,
    },
    #[error("connecting `{kind}` failed: {source}")]
    ConnectFailed {
        kind: ComponentKind,
        #[source]
        source: ComponentError,
    },
    #[error("voice chain produces no audio output")]
    NoAudioOutput,
    #[error("voice is waiting on assets")]
    Deferred,
    #[error("build cancelled")]
    Cancelled,
}

/// Non-fatal problems met while building; kept on the voice.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An optional component has no registered manager.
    Unregistered(ComponentKind),
    OptionalCreateFailed { kind: ComponentKind, reason: String },
    OptionalConnectFailed { kind: ComponentKind, reason: String },
    /// Bypassing a disabled mandatory component failed.
    BypassFailed { kind: ComponentKind, reason: String },
    RouteSkipped { route: ModulationRoute, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Unregistered(kind) => write!(f, "`{kind}` has no manager; left out"),
            Diagnostic::OptionalCreateFailed { kind, reason } => {
                write!(f, "`{kind}` left out: {reason}")
            }
            Diagnostic::OptionalConnectFailed { kind, reason } => {
                write!(f, "`{kind}` disconnected: {reason}")
            }
            Diagnostic::BypassFailed { kind, reason } => {
                write!(f, "`{kind}` could not be bypassed: {reason}")
            }
            Diagnostic::RouteSkipped { route, reason } => write!(
                f,
                "route {} -> {}.{} skipped: {reason}",
                route.source, route.target, route.param
            ),
        }
    }
}

/// Builds voices from a fixed registry and chain configuration.
#[derive(Clone)]
pub struct VoiceBuilder {
    registry: Arc<ComponentRegistry>,
    chain: Arc<ChainConfiguration>,
}

impl VoiceBuilder {
    pub fn new(registry: Arc<ComponentRegistry>, chain: Arc<ChainConfiguration>) -> Self {
        Self { registry, chain }
    }

    pub fn chain(&self) -> &ChainConfiguration {
        &self.chain
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Create every component `preset` calls for. Deferred creates are left
    /// for `VoiceBuild::poll`.
    pub fn start(&self, ctx: &mut dyn AudioContext, preset: &VoicePreset) -> Result<VoiceBuild, BuildError> {
        let mut build = VoiceBuild {
            parts: Vec::new(),
            routes: preset.routes.clone(),
            diagnostics: Vec::new(),
        };

        let links = self.chain.chain().iter().map(|link| (&link.kind, Role::Chain, link.optional));
        let modulators = self.chain.modulators().iter().map(|kind| (kind, Role::Modulator, true));

        for (kind, role, optional_link) in links.chain(modulators) {
            let entry = preset.component(kind.as_str());
            let Some(manager) = self.registry.get(kind.as_str()) else {
                if !optional_link {
                    log::error!(target: "voicegraph::builder", "no manager for mandatory `{kind}`");
                    build.rollback(ctx);
                    return Err(BuildError::MissingMandatoryComponent(kind.clone()));
                }
                if entry.is_some_and(|e| e.enabled) {
                    log::warn!(target: "voicegraph::builder", "no manager for optional `{kind}`");
                    build.diagnostics.push(Diagnostic::Unregistered(kind.clone()));
                }
                continue;
            };

            let optional = optional_link || manager.is_optional();
            let enabled = entry.map_or(!optional, |e| e.enabled);
            if optional && !enabled {
                continue;
            }

            let settings = match entry {
                Some(entry) => manager.default_settings().merged(&entry.params),
                None => manager.default_settings(),
            };
            let progress = match manager.create(ctx, &settings) {
                Creation::Ready(Ok(bundle)) => Progress::Ready(bundle),
                Creation::Ready(Err(err)) if optional => {
                    log::warn!(target: "voicegraph::builder", "optional `{kind}` failed to create: {err}");
                    build.diagnostics.push(Diagnostic::OptionalCreateFailed {
                        kind: kind.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
                Creation::Ready(Err(err)) => {
                    log::error!(target: "voicegraph::builder", "mandatory `{kind}` failed to create: {err}");
                    build.rollback(ctx);
                    return Err(BuildError::ComponentCreateFailed {
                        kind: kind.clone(),
                        source: err,
                    });
                }
                Creation::Deferred(pending) => {
                    log::debug!(target: "voicegraph::builder", "`{kind}` waiting on `{}`", pending.name());
                    Progress::Waiting(pending)
                }
            };

            build.parts.push(PlannedPart {
                kind: kind.clone(),
                manager: Arc::clone(manager),
                settings,
                role,
                optional,
                bypassed: !enabled,
                progress,
            });
        }

        Ok(build)
    }

    /// Build in one go. A component still loading cancels the build with
    /// `BuildError::Deferred`.
    pub fn build(&self, ctx: &mut dyn AudioContext, preset: &VoicePreset) -> Result<Voice, BuildError> {
        match self.start(ctx, preset)?.poll(ctx) {
            BuildPoll::Ready(voice) => Ok(voice),
            BuildPoll::Failed(err) => Err(err),
            BuildPoll::Pending(build) => {
                build.cancel(ctx);
                Err(BuildError::Deferred)
            }
        }
    }
}

enum Progress {
    Ready(NodeBundle),
    Waiting(PendingAsset),
}

struct PlannedPart {
    kind: ComponentKind,
    manager: Arc<dyn ComponentManager>,
    settings: Settings,
    role: Role,
    optional: bool,
    /// Mandatory but disabled in the preset: built, then soft-bypassed.
    bypassed: bool,
    progress: Progress,
}

pub enum BuildPoll {
    Pending(VoiceBuild),
    Ready(Voice),
    Failed(BuildError),
}

/// A voice under construction.
pub struct VoiceBuild {
    parts: Vec<PlannedPart>,
    routes: Vec<ModulationRoute>,
    diagnostics: Vec<Diagnostic>,
}

impl VoiceBuild {
    pub fn is_settled(&self) -> bool {
        self.parts
            .iter()
            .all(|part| matches!(part.progress, Progress::Ready(_)))
    }

    /// Settle what can be settled; finish the voice once nothing is pending.
    pub fn poll(mut self, ctx: &mut dyn AudioContext) -> BuildPoll {
        let mut index = 0;
        while index < self.parts.len() {
            let part = &mut self.parts[index];
            let Progress::Waiting(pending) = &mut part.progress else {
                index += 1;
                continue;
            };
            let outcome = match pending.poll() {
                AssetPoll::Pending => {
                    index += 1;
                    continue;
                }
                AssetPoll::Ready(asset) => part.manager.finish_create(ctx, &part.settings, asset),
                AssetPoll::Failed(reason) => Err(ComponentError::CreateFailed(reason)),
            };

            match outcome {
                Ok(bundle) => {
                    log::debug!(target: "voicegraph::builder", "`{}` settled", part.kind);
                    part.progress = Progress::Ready(bundle);
                    index += 1;
                }
                Err(err) if part.optional => {
                    log::warn!(target: "voicegraph::builder", "optional `{}` failed to load: {err}", part.kind);
                    self.diagnostics.push(Diagnostic::OptionalCreateFailed {
                        kind: part.kind.clone(),
                        reason: err.to_string(),
                    });
                    self.parts.remove(index);
                }
                Err(err) => {
                    let kind = part.kind.clone();
                    log::error!(target: "voicegraph::builder", "mandatory `{kind}` failed to load: {err}");
                    self.rollback(ctx);
                    return BuildPoll::Failed(BuildError::ComponentCreateFailed { kind, source: err });
                }
            }
        }

        if self.is_settled() {
            match self.finish(ctx) {
                Ok(voice) => BuildPoll::Ready(voice),
                Err(err) => BuildPoll::Failed(err),
            }
        } else {
            BuildPoll::Pending(self)
        }
    }

    /// Abandon the build. Settled components are disposed; pending loads are
    /// dropped before they own any node.
    pub fn cancel(mut self, ctx: &mut dyn AudioContext) {
        log::debug!(target: "voicegraph::builder", "build cancelled");
        self.rollback(ctx);
    }

    fn rollback(&mut self, ctx: &mut dyn AudioContext) {
        let at = ctx.now();
        for mut part in self.parts.drain(..).rev() {
            if let Progress::Ready(bundle) = &mut part.progress {
                part.manager.dispose(ctx, bundle, at);
            }
        }
    }

    /// Wire the settled parts: close the chain around elided components,
    /// connect routes, and pick the voice's input and output.
    fn finish(mut self, ctx: &mut dyn AudioContext) -> Result<Voice, BuildError> {
        let mut parts: Vec<Part> = Vec::with_capacity(self.parts.len());
        for planned in self.parts.drain(..) {
            let Progress::Ready(bundle) = planned.progress else {
                continue;
            };
            parts.push(Part {
                kind: planned.kind,
                manager: planned.manager,
                bundle,
                settings: planned.settings,
                role: planned.role,
                optional: planned.optional,
            });
            if planned.bypassed {
                if let Some(part) = parts.last_mut() {
                    if let Err(err) = part.manager.enable(ctx, &mut part.bundle, false) {
                        self.diagnostics.push(Diagnostic::BypassFailed {
                            kind: part.kind.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        if let Err(err) = self.connect_chain(ctx, &mut parts) {
            dispose_parts(ctx, &mut parts);
            return Err(err);
        }
        self.connect_routes(ctx, &parts);

        let chain = || parts.iter().filter(|p| p.role == Role::Chain);
        let input = chain().next().and_then(|p| p.bundle.audio_input);
        let output = chain().filter_map(|p| p.bundle.audio_output).last();
        let Some(output) = output else {
            log::error!(target: "voicegraph::builder", "chain has no audio output");
            dispose_parts(ctx, &mut parts);
            return Err(BuildError::NoAudioOutput);
        };

        Ok(Voice::new(parts, input, output, self.diagnostics))
    }

    fn connect_chain(&mut self, ctx: &mut dyn AudioContext, parts: &mut Vec<Part>) -> Result<(), BuildError> {
        let mut prev_output = None;
        let mut index = 0;
        while index < parts.len() {
            if parts[index].role != Role::Chain {
                index += 1;
                continue;
            }
            let next_input = parts[index + 1..]
                .iter()
                .find(|p| p.role == Role::Chain)
                .and_then(|p| p.bundle.audio_input);

            let part = &parts[index];
            match part.manager.connect_peers(ctx, &part.bundle, prev_output, next_input) {
                Ok(()) => {
                    if let Some(output) = part.bundle.audio_output {
                        prev_output = Some(output);
                    }
                    index += 1;
                }
                Err(err) if part.optional => {
                    log::warn!(target: "voicegraph::builder", "optional `{}` failed to connect: {err}", part.kind);
                    self.diagnostics.push(Diagnostic::OptionalConnectFailed {
                        kind: part.kind.clone(),
                        reason: err.to_string(),
                    });
                    let mut part = parts.remove(index);
                    let at = ctx.now();
                    part.manager.dispose(ctx, &mut part.bundle, at);
                }
                Err(err) => {
                    log::error!(target: "voicegraph::builder", "mandatory `{}` failed to connect: {err}", part.kind);
                    return Err(BuildError::ConnectFailed {
                        kind: part.kind.clone(),
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    fn connect_routes(&mut self, ctx: &mut dyn AudioContext, parts: &[Part]) {
        for route in &self.routes {
            if let Err(reason) = connect_route(ctx, parts, route) {
                log::warn!(target: "voicegraph::builder", "route {} -> {}.{}: {reason}", route.source, route.target, route.param);
                self.diagnostics.push(Diagnostic::RouteSkipped {
                    route: route.clone(),
                    reason,
                });
            }
        }
    }
}

fn connect_route(ctx: &mut dyn AudioContext, parts: &[Part], route: &ModulationRoute) -> Result<(), String> {
    let find = |kind: &ComponentKind| parts.iter().find(|p| &p.kind == kind);
    let source = find(&route.source).ok_or("source is not in the voice")?;
    let target = find(&route.target).ok_or("target is not in the voice")?;

    let outputs = &source.bundle.mod_outputs;
    let node = match &route.output {
        Some(name) => outputs.get(name.as_str()).copied(),
        None if outputs.len() == 1 => outputs.values().next().copied(),
        None => None,
    }
    .ok_or_else(|| format!("`{}` has no matching modulation output", route.source))?;

    if !target.manager.capabilities().contains(Capabilities::MODULATION_TARGET) {
        return Err(format!("`{}` accepts no modulation", route.target));
    }
    target
        .manager
        .connect_modulator(ctx, &target.bundle, &route.param, node)
        .map_err(|err| err.to_string())
}

pub(crate) fn dispose_parts(ctx: &mut dyn AudioContext, parts: &mut Vec<Part>) {
    let at = ctx.now();
    for mut part in parts.drain(..).rev() {
        part.manager.dispose(ctx, &mut part.bundle, at);
    }
}
