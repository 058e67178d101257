//! `acir-hal` – persistent-medium and receive-path abstractions.
//!
//! # Modules
//!
//! - [`medium`] – the [`RecordMedium`][medium::RecordMedium] trait every
//!   backing store implements, plus the shared staged-write image.
//! - [`sim`] – [`SimMedium`][sim::SimMedium]: an in-process EEPROM simulator
//!   with fault injection for tests and CI.
//! - [`file`] – [`FileMedium`][file::FileMedium]: a region mirrored into a
//!   host file.
//! - [`receiver`] – [`ReceiveDispatcher`][receiver::ReceiveDispatcher] and the
//!   [`SignalListener`][receiver::SignalListener] observer interface.

pub mod file;
pub mod medium;
pub mod receiver;
pub mod sim;

pub use file::FileMedium;
pub use medium::{ERASED_BYTE, RecordMedium};
pub use receiver::{DispatchReport, Disposition, ReceiveDispatcher, SignalListener};
pub use sim::SimMedium;
