//! Frame-level audio processing: echo cancellation and silence detection.

pub mod echo;
pub mod silence;

pub use echo::{EchoBackend, EchoCanceller, EchoCancellerConfig, EchoSuppressor};
pub use silence::SilenceDetector;
