use core::fmt;

use crate::error::Error;

/// Final response codes a modem may terminate a command with.
///
/// The numeric values mirror the wire protocol of the supported modems,
/// including its gaps (there is no code 5, and 14 through 16 are
/// undefined). They must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseCode {
    Ok,
    Connect,
    Ring,
    NoCarrier,
    Error,
    NoDialtone,
    Busy,
    NoAnswer,
    /// `CONNECT` followed by a data-rate suffix.
    ConnectDataRate,
    NotSupported,
    InvalidCommandLine,
    Cr,
    SimDrop,
    /// The numeric value was established through testing; the datasheet
    /// does not state it.
    SendOk,
    SendFail,
    Aborted,
}

impl ResponseCode {
    /// Table in match order. `ConnectDataRate` shares its verbose token
    /// with `Connect` and is told apart by the trailing data rate.
    pub const TABLE: &'static [ResponseCode] = &[
        ResponseCode::Ok,
        ResponseCode::Connect,
        ResponseCode::Ring,
        ResponseCode::NoCarrier,
        ResponseCode::Error,
        ResponseCode::NoDialtone,
        ResponseCode::Busy,
        ResponseCode::NoAnswer,
        ResponseCode::ConnectDataRate,
        ResponseCode::NotSupported,
        ResponseCode::InvalidCommandLine,
        ResponseCode::Cr,
        ResponseCode::SimDrop,
        ResponseCode::SendOk,
        ResponseCode::SendFail,
        ResponseCode::Aborted,
    ];

    pub const fn numeric(self) -> i32 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::Connect => 1,
            ResponseCode::Ring => 2,
            ResponseCode::NoCarrier => 3,
            ResponseCode::Error => 4,
            ResponseCode::NoDialtone => 6,
            ResponseCode::Busy => 7,
            ResponseCode::NoAnswer => 8,
            ResponseCode::ConnectDataRate => 9,
            ResponseCode::NotSupported => 10,
            ResponseCode::InvalidCommandLine => 11,
            ResponseCode::Cr => 12,
            ResponseCode::SimDrop => 13,
            ResponseCode::SendOk => 17,
            ResponseCode::SendFail => 18,
            ResponseCode::Aborted => 3000,
        }
    }

    pub const fn verbose(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Connect => "CONNECT",
            ResponseCode::Ring => "RING",
            ResponseCode::NoCarrier => "NO CARRIER",
            ResponseCode::Error => "ERROR",
            ResponseCode::NoDialtone => "NO DIALTONE",
            ResponseCode::Busy => "BUSY",
            ResponseCode::NoAnswer => "NO ANSWER",
            ResponseCode::ConnectDataRate => "CONNECT",
            ResponseCode::NotSupported => "NOT SUPPORT",
            ResponseCode::InvalidCommandLine => "INVALID COMMAND LINE",
            ResponseCode::Cr => "CR",
            ResponseCode::SimDrop => "SIM DROP",
            ResponseCode::SendOk => "SEND OK",
            ResponseCode::SendFail => "SEND FAIL",
            ResponseCode::Aborted => "Command aborted",
        }
    }

    /// Maps a final code to the usual caller expectation: anything other
    /// than `OK` fails the command.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            ResponseCode::Ok => Ok(()),
            other => Err(Error::ModemResponded(other)),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verbose())
    }
}
