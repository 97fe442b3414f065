use crate::error::Error;

/// Byte-sink capability the engine binds to its serial transmitter.
///
/// An implementation must have transmitted every byte of `data` (or
/// failed) before the returned future resolves; partial sends are not
/// part of the contract.
#[allow(async_fn_in_trait)]
pub trait ByteSink {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error>;
}
