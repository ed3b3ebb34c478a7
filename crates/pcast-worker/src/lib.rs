//! Story generation worker.
//!
//! This crate provides:
//! - Completion evaluation and the single ready transition per story
//! - Bounded, failure-isolated fan-out of generation jobs
//! - Webhook and poll outcome handling
//! - Narration assembly from per-scene audio
//! - An event-driven reconciler for multi-instance deployments

pub mod anchors;
pub mod completion;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod guard;
pub mod limiter;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod narration;
pub mod plan;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod trigger;

pub use completion::{CompletionHandler, Resolution};
pub use config::WorkerConfig;
pub use context::{Collaborators, StoryContext};
pub use dispatch::{
    DispatchSummary, Dispatched, GenerationDispatcher, GenerationRequest, GenerationTask, StoryDispatcher,
};
pub use encoder::FfmpegEncoder;
pub use error::{WorkerError, WorkerResult};
pub use evaluator::{Blocker, CompletionCheck, CompletionEvaluator, MIN_IMAGE_SUCCESS_RATE};
pub use gateway::{GatewayConfig, HttpDispatcher};
pub use limiter::ConcurrencyLimiter;
pub use logging::StoryLogger;
pub use narration::{MediaEncoder, NarrationAssembler, NarrationState};
pub use plan::{EntityRef, ScenePlan, ShotPlan, StoryPlan};
pub use poller::{JobStatusSource, Poller, RegistryStatusSource};
pub use reconciler::{EventSource, Reconciler};
pub use trigger::{EventPhaseTrigger, PhaseTrigger};
