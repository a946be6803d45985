// Purpose: Voice assembly, polyphony, note handling
// This layer sits above the component managers and owns whole voices

pub mod builder;
pub mod chain;
pub mod message;
pub mod pool;
pub mod voice;

pub use builder::{BuildError, BuildPoll, Diagnostic, VoiceBuild, VoiceBuilder};
pub use chain::{ChainConfiguration, ChainError, ChainLink, ModulationRoute, VoicePreset};
pub use message::{MessageReceiver, NoteMessage};
pub use pool::{NoteOnError, PoolEvent, VoiceHandle, VoicePool, VoiceState};
pub use voice::{Part, Role, Voice};
