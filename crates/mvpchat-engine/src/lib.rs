//! Chat session engine: routes turns to Replicate models, streams replies and
//! keeps the rolling conversation history.

pub mod config;
pub mod error;
pub mod provider;
pub mod replicate;
pub mod session;
pub mod streaming;

pub use config::{ImageTransfer, Settings};
pub use error::ChatError;
pub use provider::{
    connect, DryrunProvider, FragmentStream, InferenceProvider, ResolvedImage, PROVIDER_NAMES,
};
pub use replicate::ReplicateClient;
pub use session::{Session, TurnOptions, TurnOutcome, TurnSink};
