#![no_std]

//! Engine of the AT modem driver.
//!
//! Maintains the single [`AtTransceiver`] instance for the physical serial
//! channel, the session lock that serializes command senders against the
//! idle URC listener, the serial write sink, and state notification
//! towards application code.
//!
//! The listener only ever runs while the driver is idle: it must acquire
//! the same session lock as a command sender, so unsolicited lines that
//! arrive in the middle of a command/response exchange are consumed by the
//! sender's own parsing, never stolen.
//!
//! Hardware stays outside this crate. The BSP brings up its UART, then
//! drives an [`IsrHandle`] from interrupt context (`rx_received` on
//! received bytes, `tx_complete` when a transmission finishes) and
//! implements [`SerialTx`] for starting transmissions.

mod urc;

pub use urc::UrcHandlers;

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use atmodem_config::{RX_RING_CAPACITY, SEND_TIMEOUT};
use atmodem_ring::{RingConsumer, RingProducer};
use atmodem_transceiver::{AtTransceiver, ByteSink, Error, RxSignal, WriteOptions};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::with_timeout;

#[cfg(feature = "defmt")]
use defmt::debug;
#[cfg(not(feature = "defmt"))]
use log::debug;

/// Driver lifecycle states reported through the state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ModemState {
    PowerOff = 0,
    PowerOn = 1,
    Registering = 2,
    Registered = 3,
    DataActive = 4,
}

impl ModemState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ModemState::PowerOn,
            2 => ModemState::Registering,
            3 => ModemState::Registered,
            4 => ModemState::DataActive,
            _ => ModemState::PowerOff,
        }
    }
}

/// Callback into application code, invoked on every state transition.
/// `param` carries transition-specific payload and may be empty.
pub type StateChanged = fn(old: ModemState, new: ModemState, param: &[u8]);

/// The three binary signals shared between interrupt context and the
/// driver tasks, bundled so they can live in one `static`.
pub struct EngineSignals {
    rx_wakeup: RxSignal,
    urc_wakeup: RxSignal,
    tx_done: RxSignal,
}

impl EngineSignals {
    pub const fn new() -> Self {
        Self {
            rx_wakeup: RxSignal::new(),
            urc_wakeup: RxSignal::new(),
            tx_done: RxSignal::new(),
        }
    }
}

impl Default for EngineSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side handle: feeds received bytes into the ring and raises
/// the wakeup signals. Never blocks, never takes a lock.
pub struct IsrHandle {
    producer: RingProducer<RX_RING_CAPACITY>,
    signals: &'static EngineSignals,
}

impl IsrHandle {
    pub fn new(producer: RingProducer<RX_RING_CAPACITY>, signals: &'static EngineSignals) -> Self {
        Self { producer, signals }
    }

    /// Call from the serial RX interrupt path with the received bytes.
    /// Returns how many fit into the ring; overflow drops the rest.
    pub fn rx_received(&mut self, data: &[u8]) -> usize {
        let stored = self.producer.write(data);
        // One signal wakes a reader blocked mid-primitive, the other the
        // idle listener. Both re-check the ring, spurious wakes are fine.
        self.signals.rx_wakeup.signal(());
        self.signals.urc_wakeup.signal(());
        stored
    }

    /// Call from the TX-done interrupt path.
    pub fn tx_complete(&self) {
        self.signals.tx_done.signal(());
    }
}

/// Starts a serial transmission. Completion is reported asynchronously
/// through [`IsrHandle::tx_complete`].
pub trait SerialTx {
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;
}

/// The write sink bound to the engine's serial transmitter: start the
/// transfer, then wait for the TX-done signal, bounded by
/// [`SEND_TIMEOUT`].
pub struct SerialSink<T: SerialTx> {
    serial: T,
    signals: &'static EngineSignals,
}

impl<T: SerialTx> ByteSink for SerialSink<T> {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        // Make sure a stale completion from an earlier transfer cannot
        // satisfy this wait.
        self.signals.tx_done.reset();
        self.serial.send(data)?;
        with_timeout(SEND_TIMEOUT, self.signals.tx_done.wait())
            .await
            .map_err(|_| Error::SerialTimeout)?;
        Ok(())
    }
}

/// Exclusive transceiver session. Dereferences to the transceiver;
/// dropping it (or calling [`close`](Self::close)) releases the channel
/// to other senders and the URC listener.
pub struct TransceiverSession<'a, T: SerialTx> {
    guard: MutexGuard<'a, CriticalSectionRawMutex, AtTransceiver<SerialSink<T>, RX_RING_CAPACITY>>,
}

impl<'a, T: SerialTx> Deref for TransceiverSession<'a, T> {
    type Target = AtTransceiver<SerialSink<T>, RX_RING_CAPACITY>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, T: SerialTx> DerefMut for TransceiverSession<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'a, T: SerialTx> TransceiverSession<'a, T> {
    /// Ends the session. Equivalent to dropping the handle.
    pub fn close(self) {}
}

/// Owner of the transceiver, the session lock, and the driver state.
pub struct Engine<T: SerialTx> {
    transceiver: Mutex<CriticalSectionRawMutex, AtTransceiver<SerialSink<T>, RX_RING_CAPACITY>>,
    signals: &'static EngineSignals,
    state: AtomicU8,
    echo_mode: AtomicBool,
    on_state_changed: StateChanged,
}

impl<T: SerialTx> Engine<T> {
    /// Builds the engine around its serial port.
    ///
    /// `rx` is the consumer half of the ring whose producer half went
    /// into the [`IsrHandle`], and `signals` is the same bundle that
    /// handle raises. The driver starts in [`ModemState::PowerOff`] with
    /// echo mode on.
    pub fn new(
        serial: T,
        rx: RingConsumer<RX_RING_CAPACITY>,
        signals: &'static EngineSignals,
        on_state_changed: StateChanged,
    ) -> Self {
        debug!("initializing cellular engine");
        let sink = SerialSink { serial, signals };
        let transceiver = AtTransceiver::new(rx, &signals.rx_wakeup, sink);
        Self {
            transceiver: Mutex::new(transceiver),
            signals,
            state: AtomicU8::new(ModemState::PowerOff as u8),
            echo_mode: AtomicBool::new(true),
            on_state_changed,
        }
    }

    /// Opens an exclusive transceiver session on the physical channel,
    /// waiting for any current holder to finish.
    ///
    /// The session starts with a fresh unbuffered write sequence; echo
    /// consumption follows the engine's echo mode as it was at this
    /// moment.
    pub async fn open(&self) -> TransceiverSession<'_, T> {
        let mut guard = self.transceiver.lock().await;
        let options = WriteOptions {
            no_buffer: true,
            no_echo: !self.echo_mode(),
            ..WriteOptions::default()
        };
        guard.prepare_write(options);
        TransceiverSession { guard }
    }

    /// Current driver state as last stored by `notify_new_state`.
    pub fn state(&self) -> ModemState {
        ModemState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Transitions to `new_state`, invoking the application callback
    /// first and storing the state after. A transition to the current
    /// state is a no-op.
    pub fn notify_new_state(&self, new_state: ModemState, param: &[u8]) {
        let old = self.state();
        if new_state != old {
            (self.on_state_changed)(old, new_state, param);
            self.state.store(new_state as u8, Ordering::Relaxed);
        }
    }

    /// Sets the driver-internal expectation of modem echo. This does not
    /// talk to the modem; sending `ATE0`/`ATE1` is up to the command
    /// layer. Takes effect for sessions opened after the change.
    pub fn set_echo_mode(&self, on: bool) {
        self.echo_mode.store(on, Ordering::Relaxed);
    }

    pub fn echo_mode(&self) -> bool {
        self.echo_mode.load(Ordering::Relaxed)
    }

    /// The idle URC listener. Runs until the future is dropped at
    /// teardown; wrap it in a task on target.
    ///
    /// Every pass waits for RX activity and then for the session. If a
    /// command sender holds the session, the bytes were meant for it and
    /// its own response parsing consumes them; whatever is in the channel
    /// once the session is free is interpreted as URCs.
    pub async fn urc_listener<H: UrcHandlers>(&self, handlers: &mut H) {
        loop {
            self.signals.urc_wakeup.wait().await;
            let mut transceiver = self.transceiver.lock().await;
            debug!("handling URCs while idling");
            urc::dispatch(&mut *transceiver, handlers).await;
        }
    }
}
