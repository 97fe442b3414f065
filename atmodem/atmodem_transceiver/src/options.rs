/// Position of the writer within the current command line.
///
/// Transitions form a DAG: `Start` moves to `Command` (after a set
/// prefix) or `End` (action/get commands), `Command` moves to `Argument`
/// with the first argument, `Argument` loops for further arguments, and
/// `flush` finishes the line in `End`. `Invalid` is the parked value
/// while state enforcement is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteState {
    Start,
    Command,
    Argument,
    End,
    Invalid,
}

/// Per-session write options, chosen at [`prepare_write`] time.
///
/// The default is a buffered write sequence with echo verification, a
/// final `\r\n`, and the write-state guard enabled.
///
/// [`prepare_write`]: crate::AtTransceiver::prepare_write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteOptions {
    /// Stream bytes to the write sink as they are produced instead of
    /// accumulating them. Echo can then only be consumed by count, not
    /// verified.
    pub no_buffer: bool,
    /// Do not consume echoed bytes during `flush`.
    pub no_echo: bool,
    /// Do not append the final `\r\n` in `flush`.
    pub no_final_s3s4: bool,
    /// Accept every writer call unconditionally; the write state is
    /// neither consulted nor updated.
    pub no_state: bool,
}
