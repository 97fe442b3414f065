//! End-to-end scenarios driving the real engine through an emulated
//! serial-attached modem.
//!
//! The emulator stands in for the BSP: its `SerialTx` implementation
//! records what the host transmits, loops the bytes back as modem echo,
//! and raises the TX-done signal, while the tests inject responses and
//! URCs through the same `IsrHandle` a UART interrupt would use.

use core::cell::RefCell;

use atmodem_config::RX_RING_CAPACITY;
use atmodem_engine::{
    Engine, EngineSignals, IsrHandle, ModemState, SerialTx, TransceiverSession, UrcHandlers,
};
use atmodem_ring::RxRing;
use atmodem_transceiver::{AtTransceiver, ByteSink, Error, ResponseCode};
use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_time::{Duration, Instant, Timer};

const T: Duration = Duration::from_millis(500);

type Shared<V> = BlockingMutex<CriticalSectionRawMutex, RefCell<V>>;

/// Everything the emulated modem shares with the test body.
struct ModemLink {
    isr: Shared<Option<IsrHandle>>,
    sent: Shared<heapless::Vec<u8, 2048>>,
    echo: Shared<bool>,
    complete_tx: Shared<bool>,
}

impl ModemLink {
    const fn new() -> Self {
        Self {
            isr: BlockingMutex::new(RefCell::new(None)),
            sent: BlockingMutex::new(RefCell::new(heapless::Vec::new())),
            echo: BlockingMutex::new(RefCell::new(true)),
            complete_tx: BlockingMutex::new(RefCell::new(true)),
        }
    }

    /// Injects modem-to-host bytes, the way the RX interrupt would.
    fn feed(&self, data: &[u8]) {
        self.isr.lock(|cell| {
            cell.borrow_mut().as_mut().unwrap().rx_received(data);
        });
    }

    fn sent_bytes(&self) -> heapless::Vec<u8, 2048> {
        self.sent.lock(|cell| cell.borrow().clone())
    }

    fn set_echo(&self, on: bool) {
        self.echo.lock(|cell| *cell.borrow_mut() = on);
    }

    fn set_complete_tx(&self, on: bool) {
        self.complete_tx.lock(|cell| *cell.borrow_mut() = on);
    }
}

struct EmulatorPort {
    link: &'static ModemLink,
}

impl SerialTx for EmulatorPort {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.link.sent.lock(|cell| {
            cell.borrow_mut()
                .extend_from_slice(data)
                .map_err(|_| Error::BufferTooSmall)
        })?;
        if self.link.echo.lock(|cell| *cell.borrow()) {
            self.link.feed(data);
        }
        if self.link.complete_tx.lock(|cell| *cell.borrow()) {
            self.link.isr.lock(|cell| {
                cell.borrow().as_ref().unwrap().tx_complete();
            });
        }
        Ok(())
    }
}

macro_rules! engine_fixture {
    () => {{
        static RING: RxRing<RX_RING_CAPACITY> = RxRing::new();
        static SIGNALS: EngineSignals = EngineSignals::new();
        static LINK: ModemLink = ModemLink::new();
        let (producer, consumer) = RING.try_split().unwrap();
        LINK.isr
            .lock(|cell| *cell.borrow_mut() = Some(IsrHandle::new(producer, &SIGNALS)));
        let engine = Engine::new(EmulatorPort { link: &LINK }, consumer, &SIGNALS, noop_state);
        (engine, &LINK)
    }};
}

fn noop_state(_old: ModemState, _new: ModemState, _param: &[u8]) {}

/// URC handler set recording the registration status of `+CREG`-family
/// lines into a shared log.
struct Recorder {
    events: &'static Shared<heapless::Vec<u8, 16>>,
}

impl UrcHandlers for Recorder {
    async fn handle<S: ByteSink, const N: usize>(
        &mut self,
        mnemonic: &str,
        transceiver: &mut AtTransceiver<S, N>,
    ) -> Result<(), Error> {
        match mnemonic {
            "+CEREG" | "+CREG" => {
                let stat = transceiver.read_u8(10, T).await?;
                self.events.lock(|cell| {
                    cell.borrow_mut().push(stat).unwrap();
                });
                Ok(())
            }
            _ => Err(Error::UrcNotHandled),
        }
    }
}

// ---------------------------------------------------------------------
// Command/response scenarios
// ---------------------------------------------------------------------

#[test]
fn action_command_with_echo_and_ok() {
    let (engine, link) = engine_fixture!();
    block_on(async {
        let mut session = engine.open().await;
        session.write_action("").await.unwrap();
        session.flush(T).await.unwrap();
        link.feed(b"\r\nOK\r\n");
        assert_eq!(session.read_code(T).await.unwrap(), ResponseCode::Ok);
        session.close();
    });
    assert_eq!(link.sent_bytes().as_slice(), b"AT\r\n");
}

#[test]
fn set_command_transmits_the_exact_line() {
    let (engine, link) = engine_fixture!();
    block_on(async {
        let mut session = engine.open().await;
        session.write_set("+COPS").await.unwrap();
        session.write_i32(1, 10).await.unwrap();
        session.write_string("FOO").await.unwrap();
        session.write_i32(123, 10).await.unwrap();
        session.flush(T).await.unwrap();
        link.feed(b"\r\nOK\r\n");
        session.read_code(T).await.unwrap().into_result().unwrap();
        session.close();
    });
    assert_eq!(link.sent_bytes().as_slice(), b"AT+COPS=1,\"FOO\",123\r\n");
}

#[test]
fn get_command_parses_response_line_and_code() {
    let (engine, link) = engine_fixture!();
    block_on(async {
        let mut session = engine.open().await;
        session.write_get("+CFUN").await.unwrap();
        session.flush(T).await.unwrap();
        link.feed(b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        session.read_command("+CFUN", T).await.unwrap();
        assert_eq!(session.read_i32(10, T).await.unwrap(), 4);
        assert_eq!(session.read_code(T).await.unwrap(), ResponseCode::Ok);
        session.close();
    });
    assert_eq!(link.sent_bytes().as_slice(), b"AT+CFUN?\r\n");
}

#[test]
fn urc_lines_inside_a_response_parse_inline() {
    let (engine, link) = engine_fixture!();
    block_on(async {
        let mut session = engine.open().await;
        session.write_get("+CEREG").await.unwrap();
        session.flush(T).await.unwrap();
        link.feed(b"\r\n+CEREG: 0,2\r\n\r\n+CREG: 0,2\r\n\r\nOK\r\n");
        session.read_command("+CEREG", T).await.unwrap();
        assert_eq!(session.read_i32(10, T).await.unwrap(), 0);
        assert_eq!(session.read_i32(10, T).await.unwrap(), 2);
        session.read_command("+CREG", T).await.unwrap();
        assert_eq!(session.read_i32(10, T).await.unwrap(), 0);
        assert_eq!(session.read_i32(10, T).await.unwrap(), 2);
        // The blank line between the URC and the final code is tolerated.
        assert_eq!(session.read_code(T).await.unwrap(), ResponseCode::Ok);
        session.close();
    });
}

#[test]
fn echo_mode_off_applies_to_the_next_session() {
    let (engine, link) = engine_fixture!();
    assert!(engine.echo_mode());
    engine.set_echo_mode(false);
    assert!(!engine.echo_mode());
    link.set_echo(false);
    block_on(async {
        let mut session = engine.open().await;
        session.write_get("+CFUN").await.unwrap();
        session.flush(T).await.unwrap();
        // No echo to consume; the response is next in the ring.
        link.feed(b"\r\n+CFUN: 1\r\n\r\nOK\r\n");
        session.read_command("+CFUN", T).await.unwrap();
        assert_eq!(session.read_i32(10, T).await.unwrap(), 1);
        assert_eq!(session.read_code(T).await.unwrap(), ResponseCode::Ok);
        session.close();
    });
}

#[test]
fn transmission_without_completion_times_out() {
    let (engine, link) = engine_fixture!();
    link.set_complete_tx(false);
    block_on(async {
        let mut session = engine.open().await;
        // Unbuffered sessions stream straight to the sink, which waits in
        // vain for the TX-done signal.
        assert_eq!(session.write_action("E1").await, Err(Error::SerialTimeout));
        session.close();
    });
}

// ---------------------------------------------------------------------
// Session lock
// ---------------------------------------------------------------------

#[test]
fn sessions_are_mutually_exclusive() {
    let (engine, _link) = engine_fixture!();
    block_on(async {
        join(
            async {
                let session = engine.open().await;
                Timer::after_millis(50).await;
                session.close();
            },
            async {
                Timer::after_millis(10).await;
                let before = Instant::now();
                let session = engine.open().await;
                // The second opener had to wait for the first to close.
                assert!(Instant::now() - before >= Duration::from_millis(30));
                session.close();
            },
        )
        .await;
    });
}

// ---------------------------------------------------------------------
// Idle URC listener
// ---------------------------------------------------------------------

#[test]
fn idle_urcs_reach_their_handler() {
    let (engine, link) = engine_fixture!();
    static EVENTS: Shared<heapless::Vec<u8, 16>> = BlockingMutex::new(RefCell::new(heapless::Vec::new()));
    let mut handlers = Recorder { events: &EVENTS };
    block_on(async {
        let script = async {
            link.feed(b"\r\n+CEREG: 2\r\n");
            Timer::after_millis(20).await;
            link.feed(b"\r\n+CREG: 3\r\n");
            Timer::after_millis(20).await;
        };
        match select(engine.urc_listener(&mut handlers), script).await {
            Either::Second(()) => {}
            Either::First(_) => unreachable!(),
        }
    });
    EVENTS.lock(|cell| assert_eq!(cell.borrow().as_slice(), &[2, 3]));
}

#[test]
fn unknown_urcs_are_skipped_line_by_line() {
    let (engine, link) = engine_fixture!();
    static EVENTS: Shared<heapless::Vec<u8, 16>> = BlockingMutex::new(RefCell::new(heapless::Vec::new()));
    let mut handlers = Recorder { events: &EVENTS };
    block_on(async {
        let script = async {
            link.feed(b"\r\n+WEIRD: 1,2\r\n\r\n+CEREG: 5\r\n");
            Timer::after_millis(30).await;
        };
        match select(engine.urc_listener(&mut handlers), script).await {
            Either::Second(()) => {}
            Either::First(_) => unreachable!(),
        }
    });
    EVENTS.lock(|cell| assert_eq!(cell.borrow().as_slice(), &[5]));
}

#[test]
fn command_responses_are_never_stolen_by_the_listener() {
    let (engine, link) = engine_fixture!();
    static EVENTS: Shared<heapless::Vec<u8, 16>> = BlockingMutex::new(RefCell::new(heapless::Vec::new()));
    let mut handlers = Recorder { events: &EVENTS };
    block_on(async {
        let script = async {
            let mut session: TransceiverSession<'_, EmulatorPort> = engine.open().await;
            session.write_get("+CFUN").await.unwrap();
            session.flush(T).await.unwrap();
            // A URC lands between the flush and the response while the
            // session is held: the listener wakes but sleeps on the lock,
            // and the command sender consumes the line inline.
            link.feed(b"\r\n+CEREG: 9\r\n\r\n+CFUN: 1\r\n\r\nOK\r\n");
            let mut cmd = [0u8; 16];
            let read = session.read_command_any(&mut cmd, T).await.unwrap();
            assert_eq!(&cmd[..read.len], b"+CEREG");
            session.skip_line(T).await.unwrap();
            session.read_command("+CFUN", T).await.unwrap();
            assert_eq!(session.read_i32(10, T).await.unwrap(), 1);
            assert_eq!(session.read_code(T).await.unwrap(), ResponseCode::Ok);
            session.close();
            Timer::after_millis(20).await;
        };
        match select(engine.urc_listener(&mut handlers), script).await {
            Either::Second(()) => {}
            Either::First(_) => unreachable!(),
        }
    });
    // The listener saw none of it, not even the URC.
    EVENTS.lock(|cell| assert!(cell.borrow().is_empty()));
}

struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

#[test]
fn random_interleavings_drop_no_urc_and_steal_no_response() {
    let (engine, link) = engine_fixture!();
    static EVENTS: Shared<heapless::Vec<u8, 16>> = BlockingMutex::new(RefCell::new(heapless::Vec::new()));
    let mut handlers = Recorder { events: &EVENTS };
    let mut rng = XorShift(0x0BAD_5EED);
    block_on(async {
        let script = async {
            let mut expected_idle_urcs = 0usize;
            for _ in 0..8 {
                let mut session = engine.open().await;
                session.write_get("+CFUN").await.unwrap();
                session.flush(T).await.unwrap();
                let urc_first = rng.next() % 2 == 0;
                if urc_first {
                    link.feed(b"\r\n+CEREG: 9\r\n");
                }
                link.feed(b"\r\n+CFUN: 1\r\n\r\nOK\r\n");
                if urc_first {
                    let mut cmd = [0u8; 16];
                    let read = session.read_command_any(&mut cmd, T).await.unwrap();
                    assert_eq!(&cmd[..read.len], b"+CEREG");
                    session.skip_line(T).await.unwrap();
                }
                session.read_command("+CFUN", T).await.unwrap();
                assert_eq!(session.read_i32(10, T).await.unwrap(), 1);
                session.read_code(T).await.unwrap().into_result().unwrap();
                session.close();
                if rng.next() % 2 == 0 {
                    link.feed(b"\r\n+CREG: 7\r\n");
                    expected_idle_urcs += 1;
                    Timer::after_millis(5).await;
                }
            }
            Timer::after_millis(50).await;
            expected_idle_urcs
        };
        let expected = match select(engine.urc_listener(&mut handlers), script).await {
            Either::Second(n) => n,
            Either::First(_) => unreachable!(),
        };
        EVENTS.lock(|cell| {
            let events = cell.borrow();
            // Every idle URC was dispatched, every in-session URC was not.
            assert_eq!(events.iter().filter(|&&v| v == 7).count(), expected);
            assert_eq!(events.iter().filter(|&&v| v == 9).count(), 0);
        });
    });
}

// ---------------------------------------------------------------------
// State notification
// ---------------------------------------------------------------------

static STATE_LOG: Shared<heapless::Vec<(u8, u8), 8>> =
    BlockingMutex::new(RefCell::new(heapless::Vec::new()));

fn record_state(old: ModemState, new: ModemState, _param: &[u8]) {
    STATE_LOG.lock(|cell| {
        cell.borrow_mut().push((old as u8, new as u8)).unwrap();
    });
}

#[test]
fn state_changes_notify_exactly_once() {
    static RING: RxRing<RX_RING_CAPACITY> = RxRing::new();
    static SIGNALS: EngineSignals = EngineSignals::new();
    static LINK: ModemLink = ModemLink::new();
    let (producer, consumer) = RING.try_split().unwrap();
    LINK.isr
        .lock(|cell| *cell.borrow_mut() = Some(IsrHandle::new(producer, &SIGNALS)));
    let engine = Engine::new(EmulatorPort { link: &LINK }, consumer, &SIGNALS, record_state);

    assert_eq!(engine.state(), ModemState::PowerOff);
    engine.notify_new_state(ModemState::PowerOn, &[]);
    engine.notify_new_state(ModemState::PowerOn, &[]);
    engine.notify_new_state(ModemState::Registered, b"home");
    assert_eq!(engine.state(), ModemState::Registered);

    STATE_LOG.lock(|cell| {
        assert_eq!(
            cell.borrow().as_slice(),
            &[
                (ModemState::PowerOff as u8, ModemState::PowerOn as u8),
                (ModemState::PowerOn as u8, ModemState::Registered as u8),
            ]
        );
    });
}
