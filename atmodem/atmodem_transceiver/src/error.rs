use core::fmt;

use crate::response::ResponseCode;

/// Error kinds surfaced by the transceiver core.
///
/// Every fallible primitive returns one of these; callers short-circuit
/// with `?`. Partial-success cases (a truncated mnemonic or hex string)
/// are not errors, they are reported through
/// [`PartialRead`](crate::PartialRead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Zero-sized buffer, malformed numeric base, or an argument the
    /// primitive cannot work with.
    InvalidParam,
    /// A collaborator was used before the hardware side was brought up.
    Uninitialized,
    /// The caller's buffer was exhausted before the delimiter arrived, or
    /// a buffered write sequence outgrew the TX buffer.
    BufferTooSmall,
    /// The ring ran dry before the required bytes arrived.
    Timeout,
    /// Write-state violation, echo mismatch, or an unexpected token in
    /// the response stream.
    InconsistentState,
    /// The final response code was something other than `OK`.
    ModemResponded(ResponseCode),
    /// A URC handler determined the current line is not the URC it
    /// handles.
    UrcNotHandled,
    /// A response argument carried a value outside its documented range.
    UnexpectedResponse,
    /// The serial transmission did not complete within the send timeout.
    SerialTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParam => f.write_str("invalid parameter"),
            Error::Uninitialized => f.write_str("not initialized"),
            Error::BufferTooSmall => f.write_str("buffer too small"),
            Error::Timeout => f.write_str("timed out waiting for modem data"),
            Error::InconsistentState => f.write_str("inconsistent transceiver state"),
            Error::ModemResponded(code) => write!(f, "modem responded {}", code.verbose()),
            Error::UrcNotHandled => f.write_str("line is not this handler's URC"),
            Error::UnexpectedResponse => f.write_str("response argument out of range"),
            Error::SerialTimeout => f.write_str("serial transmission did not complete"),
        }
    }
}
