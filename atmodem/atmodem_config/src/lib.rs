#![no_std]

use embassy_time::Duration;

/// Capacity of the RX byte ring between the serial interrupt and the
/// transceiver. Sized to cover the longest expected AT response line plus
/// burst headroom.
pub const RX_RING_CAPACITY: usize = 1024;

/// Capacity of the transceiver's TX accumulation buffer (buffered write
/// sequences only).
pub const TX_BUFFER_CAPACITY: usize = 256;

/// Upper bound for one serial transmission to complete.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Per-attempt timeout while scanning for unsolicited result codes.
pub const URC_SCAN_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum number of URC lines consumed per idle-listener pass.
pub const URC_SCAN_LIMIT: usize = 2;

/// Buffer size for URC mnemonics, including the leading '+'.
pub const URC_MNEMONIC_CAPACITY: usize = 16;

/// Number of empty "\r\n" lines tolerated in front of a final response
/// code. Some modems (u-blox SARA R4 among them) pad their responses with
/// blank lines.
pub const READ_CODE_EMPTY_LINE_LIMIT: usize = 5;
