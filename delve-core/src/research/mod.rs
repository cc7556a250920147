//! The research loop: session state, prompts, source handling, progress
//! reporting and the engine that ties them together.

pub mod clock;
pub mod dialogue;
pub mod engine;
pub mod progress;
pub mod prompts;
pub mod sources;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dialogue::{Dialogue, DialogueMode};
pub use engine::ResearchEngine;
pub use progress::{
    AsyncFnReporter, CallbackReporter, ChannelReporter, NoOpReporter, ProgressEvent, ProgressKind,
    ProgressReporter, RecordingReporter, ReportError, RoutingDecision,
};
pub use state::{ResearchPhase, ResearchResult, ResearchState};
