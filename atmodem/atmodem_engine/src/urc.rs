use atmodem_config::{URC_MNEMONIC_CAPACITY, URC_SCAN_LIMIT, URC_SCAN_TIMEOUT};
use atmodem_transceiver::{AtTransceiver, ByteSink, Error};

#[cfg(feature = "defmt")]
use defmt::error;
#[cfg(not(feature = "defmt"))]
use log::error;

/// Set of handlers for unsolicited result codes, keyed by mnemonic.
///
/// The dispatcher calls [`handle`](Self::handle) with each mnemonic it
/// parses (leading `+` included). The implementation reads the URC's
/// arguments off the transceiver with the usual reader primitives and
/// answers [`Error::UrcNotHandled`] for mnemonics it does not know, which
/// makes the dispatcher drop the rest of that line.
#[allow(async_fn_in_trait)]
pub trait UrcHandlers {
    async fn handle<S: ByteSink, const N: usize>(
        &mut self,
        mnemonic: &str,
        transceiver: &mut AtTransceiver<S, N>,
    ) -> Result<(), Error>;
}

/// Drains URC lines off an idle channel, at most [`URC_SCAN_LIMIT`] per
/// pass. Caller holds the session.
pub(crate) async fn dispatch<S: ByteSink, const N: usize, H: UrcHandlers>(
    transceiver: &mut AtTransceiver<S, N>,
    handlers: &mut H,
) {
    for _ in 0..URC_SCAN_LIMIT {
        // Zeroed so that after a timeout, any nonzero byte means the line
        // broke off in the middle of a mnemonic.
        let mut cmd = [0u8; URC_MNEMONIC_CAPACITY];
        match transceiver.read_command_any(&mut cmd, URC_SCAN_TIMEOUT).await {
            Ok(read) => {
                let mnemonic = core::str::from_utf8(&cmd[..read.len]).unwrap_or("");
                match handlers.handle(mnemonic, transceiver).await {
                    Ok(()) => {}
                    Err(Error::UrcNotHandled) => {
                        if transceiver.skip_line(URC_SCAN_TIMEOUT).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => error!("URC handler for {} failed: {}", mnemonic, e),
                }
            }
            Err(Error::Timeout) => {
                if cmd.iter().any(|&b| b != 0) {
                    error!("timeout inside an unfinished URC line");
                }
                return;
            }
            Err(e) => error!("error while scanning for URCs: {}", e),
        }
    }
}
