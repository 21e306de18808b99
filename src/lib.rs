//! Tethered camera engine for the Canon EDSDK.
//!
//! The engine owns one device session at a time and serializes every native call
//! through a single dispatch worker. Around that worker:
//!
//! - [`error`]: native status classification and the engine error type
//! - [`hardware`]: the [`hardware::CameraSdk`] seam, scoped native handles, SDK
//!   lifetime, the simulated camera and (with `edsdk_hardware`) the real one
//! - [`command`] and [`error_recovery`]: device operations with bounded busy-retry
//! - [`events`]: native callbacks turned into ordered records for listeners,
//!   including the image-transfer sequence
//! - [`session`] and [`live_view`]: the session and EVF state machines
//! - `queue` and [`engine`]: the command queue and the public async handle
//! - [`config`]: figment-based configuration
//! - [`properties`]: exposure snapshots and labels for property codes

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_recovery;
pub mod events;
pub mod hardware;
pub mod live_view;
pub mod properties;
mod queue;
pub mod session;

pub use command::{Command, LensDrive, Operation, ShutterButton, Value};
pub use engine::{CommandTicket, Engine, FramePumpGuard};
pub use error::{EngineError, EngineResult, ErrorKind};
