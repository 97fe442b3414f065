#![no_std]

//! AT command transceiver over a serial byte ring.
//!
//! This crate owns all AT tokenization for the modem driver: a writer that
//! builds well-formed V.250 command lines through a small state machine, and a
//! reader with blocking-with-timeout primitives for structured response
//! parsing (mnemonics, integer/string/hex arguments, final response codes,
//! line boundaries, echo consumption).
//!
//! The transceiver sits between two collaborators it does not own: the RX
//! byte ring fed by the serial interrupt path, and a [`ByteSink`] the
//! engine binds to its UART. Session locking lives one layer up; every
//! method here assumes the caller holds the session.

mod error;
mod options;
mod response;
mod sink;
mod transceiver;

pub use error::Error;
pub use options::{WriteOptions, WriteState};
pub use response::ResponseCode;
pub use sink::ByteSink;
pub use transceiver::{AtTransceiver, PartialRead, RxSignal};
