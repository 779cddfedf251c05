//! Device access
//!
//! The driver contract (`api`), the session manager built on it (`session`),
//! and an emulated instrument for running without hardware (`emulator`).

pub mod api;
pub mod emulator;
pub mod session;

pub use api::{DeviceApi, DigitalIo, Direction, Instrument, Level};
pub use emulator::Emulator;
pub use session::{DeviceSession, ReliabilityReport, SessionManager, SessionSettings};
