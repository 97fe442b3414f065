use core::fmt::Write as _;

use atmodem_config::{READ_CODE_EMPTY_LINE_LIMIT, TX_BUFFER_CAPACITY};
use atmodem_ring::RingConsumer;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant};
use heapless::{String, Vec};

use crate::error::Error;
use crate::options::{WriteOptions, WriteState};
use crate::response::ResponseCode;
use crate::sink::ByteSink;

/// Wakeup signal raised by the serial RX path whenever new bytes are in
/// the ring. May be raised spuriously; waiters re-check the ring.
pub type RxSignal = Signal<CriticalSectionRawMutex, ()>;

const ATTENTION: &[u8] = b"AT";
const MNEMONIC_START: u8 = b'+';
const SET_SUFFIX: &[u8] = b"=";
const GET_SUFFIX: &[u8] = b"?";
const ARG_SEPARATOR: &[u8] = b",";
const ARG_LIST: u8 = b':';
const STR_DELIMITER: &[u8] = b"\"";
const S3: u8 = b'\r';
const S4: u8 = b'\n';
const S3S4: &[u8] = b"\r\n";

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Room for any formatted 32-bit value plus sign, in any supported base.
const INT_TOKEN_CAPACITY: usize = 16;

/// Room for the longest verbose response code plus one byte of slack.
const CODE_TOKEN_CAPACITY: usize = 21;

/// Length report for reads that may truncate to fit the caller's buffer.
///
/// `truncated` flags the soft out-of-resources case: the buffer was too
/// small, but the stream was advanced past the token so the primitives
/// that follow still line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartialRead {
    pub len: usize,
    pub truncated: bool,
}

/// Stateful AT reader/writer over the RX ring and a write sink.
///
/// One instance exists per physical serial channel. Exclusive use is
/// enforced by the engine's session lock; all methods here assume the
/// caller holds the session.
pub struct AtTransceiver<S: ByteSink, const N: usize> {
    rx: RingConsumer<N>,
    rx_wakeup: &'static RxSignal,
    sink: S,
    write_state: WriteState,
    options: WriteOptions,
    tx: Vec<u8, TX_BUFFER_CAPACITY>,
    /// Bytes handed to the sink (or stored for it) since the last
    /// `prepare_write`/`flush`. This is exactly the number of echo bytes
    /// consumed from the ring during `flush`.
    tx_used: usize,
    start_of_line: bool,
}

impl<S: ByteSink, const N: usize> AtTransceiver<S, N> {
    pub fn new(rx: RingConsumer<N>, rx_wakeup: &'static RxSignal, sink: S) -> Self {
        Self {
            rx,
            rx_wakeup,
            sink,
            write_state: WriteState::Start,
            options: WriteOptions::default(),
            tx: Vec::new(),
            tx_used: 0,
            start_of_line: true,
        }
    }

    /// True iff the last terminator consumed by a reader primitive was the
    /// S4 character, or nothing has been consumed on the current line yet.
    pub fn start_of_line(&self) -> bool {
        self.start_of_line
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn options(&self) -> WriteOptions {
        self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ------------------------------------------------------------------
    // Writer
    // ------------------------------------------------------------------

    /// Begins a fresh write sequence: resets the write state and the TX
    /// buffer and records the options for the sequence.
    pub fn prepare_write(&mut self, options: WriteOptions) {
        self.options = options;
        self.tx.clear();
        self.tx_used = 0;
        self.write_state = if options.no_state {
            WriteState::Invalid
        } else {
            WriteState::Start
        };
    }

    /// Raw write, bypassing the line grammar. Used for binary payloads
    /// embedded in a command line.
    ///
    /// Buffered overflow stores the bytes that fit, still counts them for
    /// echo consumption, still transitions, and reports
    /// [`Error::BufferTooSmall`].
    pub async fn write(&mut self, data: &[u8], next_state: WriteState) -> Result<(), Error> {
        let mut result = Ok(());
        let stored = if self.options.no_buffer {
            result = self.sink.write(data).await;
            data.len()
        } else {
            let room = self.tx.capacity() - self.tx.len();
            let n = data.len().min(room);
            if n != data.len() {
                result = Err(Error::BufferTooSmall);
            }
            // Cannot fail, `n` is bounded by the remaining capacity.
            let _ = self.tx.extend_from_slice(&data[..n]);
            n
        };
        self.tx_used += stored;
        if !self.options.no_state {
            self.write_state = next_state;
        }
        result
    }

    /// Emits `AT` plus `action`, e.g. `write_action("E1")` for `ATE1`.
    pub async fn write_action(&mut self, action: &str) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Start])?;
        let state = self.write_state;
        self.write(ATTENTION, state).await?;
        self.write(action.as_bytes(), WriteState::End).await
    }

    /// Emits `AT<name>=`, opening the argument list of a set command.
    pub async fn write_set(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Start])?;
        let state = self.write_state;
        self.write(ATTENTION, state).await?;
        self.write(name.as_bytes(), state).await?;
        self.write(SET_SUFFIX, WriteState::Command).await
    }

    /// Emits `AT<name>?`, a get command.
    pub async fn write_get(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Start])?;
        let state = self.write_state;
        self.write(ATTENTION, state).await?;
        self.write(name.as_bytes(), state).await?;
        self.write(GET_SUFFIX, WriteState::End).await
    }

    pub async fn write_i8(&mut self, x: i8, base: u32) -> Result<(), Error> {
        self.write_i32(x as i32, base).await
    }

    pub async fn write_i16(&mut self, x: i16, base: u32) -> Result<(), Error> {
        self.write_i32(x as i32, base).await
    }

    /// Writes a signed integer argument. Bases 8 and 16 format negative
    /// values in two's complement, the way the modems expect raw register
    /// words.
    pub async fn write_i32(&mut self, x: i32, base: u32) -> Result<(), Error> {
        let mut digits: String<INT_TOKEN_CAPACITY> = String::new();
        let formatted = match resolve_base(base)? {
            8 => write!(digits, "{:o}", x),
            16 => write!(digits, "{:x}", x),
            _ => write!(digits, "{}", x),
        };
        formatted.map_err(|_| Error::BufferTooSmall)?;
        self.write_argument_bytes(digits.as_bytes()).await
    }

    pub async fn write_u8(&mut self, x: u8, base: u32) -> Result<(), Error> {
        self.write_u32(x as u32, base).await
    }

    pub async fn write_u16(&mut self, x: u16, base: u32) -> Result<(), Error> {
        self.write_u32(x as u32, base).await
    }

    pub async fn write_u32(&mut self, x: u32, base: u32) -> Result<(), Error> {
        let mut digits: String<INT_TOKEN_CAPACITY> = String::new();
        let formatted = match resolve_base(base)? {
            8 => write!(digits, "{:o}", x),
            16 => write!(digits, "{:x}", x),
            _ => write!(digits, "{}", x),
        };
        formatted.map_err(|_| Error::BufferTooSmall)?;
        self.write_argument_bytes(digits.as_bytes()).await
    }

    /// Writes a quoted string argument. The payload is emitted verbatim,
    /// there is no escaping in the AT line grammar.
    pub async fn write_string(&mut self, s: &str) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Command, WriteState::Argument])?;
        self.write_separator_if_needed().await?;
        let state = self.write_state;
        self.write(STR_DELIMITER, state).await?;
        self.write(s.as_bytes(), state).await?;
        self.write(STR_DELIMITER, WriteState::Argument).await
    }

    /// Writes a quoted argument of uppercase hex digit pairs.
    pub async fn write_hex_string(&mut self, data: &[u8]) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Command, WriteState::Argument])?;
        self.write_separator_if_needed().await?;
        let state = self.write_state;
        self.write(STR_DELIMITER, state).await?;
        for &byte in data {
            let pair = [
                HEX_UPPER[(byte >> 4) as usize],
                HEX_UPPER[(byte & 0x0F) as usize],
            ];
            self.write(&pair, state).await?;
        }
        self.write(STR_DELIMITER, WriteState::Argument).await
    }

    /// Finishes the line and reconciles the modem's echo.
    ///
    /// Appends `\r\n` (unless `no_final_s3s4`), transmits the buffered
    /// line (buffered mode), then consumes exactly the flushed byte count
    /// of echo from the ring (unless `no_echo`). Buffered sequences are
    /// byte-compared against the echo; unbuffered sequences can only skip
    /// by count. The write state is left untouched, the next sequence
    /// starts with `prepare_write`.
    pub async fn flush(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        if !self.options.no_final_s3s4 {
            self.write(S3S4, WriteState::End).await?;
        }
        if !self.options.no_buffer {
            self.sink.write(&self.tx).await?;
        }
        if !self.options.no_echo {
            if self.options.no_buffer {
                // No record of what went out, so the echo cannot be
                // verified, only skipped.
                let expected = self.tx_used;
                let skipped = self.skip_block(expected, deadline).await;
                if skipped < expected {
                    return Err(Error::Timeout);
                }
            } else {
                let mut chunk = [0u8; 16];
                let mut total = 0;
                while total < self.tx_used {
                    let want = (self.tx_used - total).min(chunk.len());
                    let r = self.pop_some(&mut chunk[..want], deadline).await;
                    if r == 0 {
                        return Err(Error::Timeout);
                    }
                    if chunk[..r] != self.tx[total..total + r] {
                        return Err(Error::InconsistentState);
                    }
                    total += r;
                }
            }
        }
        self.tx.clear();
        self.tx_used = 0;
        Ok(())
    }

    async fn write_argument_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_write_state(&[WriteState::Command, WriteState::Argument])?;
        self.write_separator_if_needed().await?;
        self.write(bytes, WriteState::Argument).await
    }

    /// The separator goes in front of every argument except the first.
    async fn write_separator_if_needed(&mut self) -> Result<(), Error> {
        if self.write_state == WriteState::Argument {
            let state = self.write_state;
            self.write(ARG_SEPARATOR, state).await
        } else {
            Ok(())
        }
    }

    fn ensure_write_state(&self, allowed: &[WriteState]) -> Result<(), Error> {
        if self.options.no_state || allowed.contains(&self.write_state) {
            Ok(())
        } else {
            Err(Error::InconsistentState)
        }
    }

    // ------------------------------------------------------------------
    // Reader
    // ------------------------------------------------------------------

    /// Positions on the next `+`, requires the exact bytes of `name`
    /// (leading `+` included), then consumes through the `:` that opens
    /// the argument list.
    pub async fn read_command(&mut self, name: &str, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        self.skip_to_mnemonic(deadline).await?;
        let name = name.as_bytes();
        let mut matched = 0;
        let mut chunk = [0u8; 16];
        while matched < name.len() {
            let want = chunk.len().min(name.len() - matched);
            let r = self.pop_some(&mut chunk[..want], deadline).await;
            if r == 0 {
                return Err(Error::Timeout);
            }
            for (got, expected) in chunk[..r].iter().zip(name[matched..].iter()) {
                if got != expected || *got == ARG_LIST {
                    return Err(Error::InconsistentState);
                }
            }
            matched += r;
        }
        self.skip_until(&[ARG_LIST], deadline).await?;
        Ok(())
    }

    /// As [`read_command`](Self::read_command), but copies whatever
    /// mnemonic arrives into `out`.
    ///
    /// A mnemonic longer than `out` is truncated to `out.len() - 1`
    /// bytes; the remainder is dropped through the `:` so the argument
    /// reads that follow still line up, and the result carries
    /// `truncated: true`. On timeout, any bytes already received remain
    /// in `out`.
    pub async fn read_command_any(
        &mut self,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<PartialRead, Error> {
        let deadline = Instant::now() + timeout;
        self.skip_to_mnemonic(deadline).await?;
        match self.pop_until(out, &[ARG_LIST], deadline).await {
            Ok((len, _)) => Ok(PartialRead {
                len,
                truncated: false,
            }),
            Err(Error::BufferTooSmall) => {
                self.skip_until(&[ARG_LIST], deadline).await?;
                Ok(PartialRead {
                    len: out.len().saturating_sub(1),
                    truncated: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn read_i8(&mut self, base: u32, timeout: Duration) -> Result<i8, Error> {
        Ok(self.read_i32(base, timeout).await? as i8)
    }

    pub async fn read_i16(&mut self, base: u32, timeout: Duration) -> Result<i16, Error> {
        Ok(self.read_i32(base, timeout).await? as i16)
    }

    /// Reads an integer argument terminated by `,` or the end of line.
    /// Base 0 means decimal; 8, 10 and 16 are accepted as themselves.
    pub async fn read_i32(&mut self, base: u32, timeout: Duration) -> Result<i32, Error> {
        let radix = resolve_base(base)?;
        let deadline = Instant::now() + timeout;
        let mut token = [0u8; INT_TOKEN_CAPACITY];
        let (len, needle) = self.pop_until(&mut token, &[ARG_SEPARATOR[0], S4], deadline).await?;
        let value = parse_i32(&token[..len], radix)?;
        self.update_start_of_line(needle);
        Ok(value)
    }

    pub async fn read_u8(&mut self, base: u32, timeout: Duration) -> Result<u8, Error> {
        Ok(self.read_u32(base, timeout).await? as u8)
    }

    pub async fn read_u16(&mut self, base: u32, timeout: Duration) -> Result<u16, Error> {
        Ok(self.read_u32(base, timeout).await? as u16)
    }

    pub async fn read_u32(&mut self, base: u32, timeout: Duration) -> Result<u32, Error> {
        let radix = resolve_base(base)?;
        let deadline = Instant::now() + timeout;
        let mut token = [0u8; INT_TOKEN_CAPACITY];
        let (len, needle) = self.pop_until(&mut token, &[ARG_SEPARATOR[0], S4], deadline).await?;
        let value = parse_u32(&token[..len], radix)?;
        self.update_start_of_line(needle);
        Ok(value)
    }

    /// Reads a quoted string argument into `buf` and consumes through the
    /// separator that follows it.
    pub async fn read_string<'b>(
        &mut self,
        buf: &'b mut [u8],
        timeout: Duration,
    ) -> Result<&'b str, Error> {
        if buf.is_empty() {
            return Err(Error::InvalidParam);
        }
        let deadline = Instant::now() + timeout;
        self.skip_until(b"\",\n", deadline).await?;
        let (len, _) = self.pop_until(buf, STR_DELIMITER, deadline).await?;
        let needle = self.skip_until(&[ARG_SEPARATOR[0], S4], deadline).await?;
        self.update_start_of_line(needle);
        core::str::from_utf8(&buf[..len]).map_err(|_| Error::InconsistentState)
    }

    /// Reads a quoted hex string, decoding digit pairs into `out`.
    ///
    /// If `out` fills up before the closing quote, what fits is decoded,
    /// the rest of the argument is consumed anyway, and the result says
    /// `truncated: true`. A dangling single digit in front of the closing
    /// quote has no pair and is dropped.
    pub async fn read_hex_string(
        &mut self,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<PartialRead, Error> {
        let deadline = Instant::now() + timeout;
        self.skip_until(b"\",\n", deadline).await?;
        let mut len = 0;
        let mut hit_end = false;
        let mut truncated = false;
        while !hit_end {
            let mut pair = [0u8; 2];
            let copied = match self.pop_until(&mut pair, STR_DELIMITER, deadline).await {
                Ok((n, _)) => {
                    hit_end = true;
                    n
                }
                Err(Error::BufferTooSmall) => 2,
                Err(e) => return Err(e),
            };
            if copied == 2 {
                if len < out.len() {
                    out[len] = decode_hex_pair(pair)?;
                    len += 1;
                } else {
                    truncated = true;
                    break;
                }
            }
        }
        let needle = self.skip_until(&[ARG_SEPARATOR[0], S4], deadline).await?;
        self.update_start_of_line(needle);
        Ok(PartialRead { len, truncated })
    }

    /// Reads an unquoted argument, trimming leading and trailing spaces
    /// but keeping interior ones.
    pub async fn read_argument<'b>(
        &mut self,
        buf: &'b mut [u8],
        timeout: Duration,
    ) -> Result<&'b str, Error> {
        if buf.is_empty() {
            return Err(Error::InvalidParam);
        }
        let deadline = Instant::now() + timeout;
        let (len, mut needle) = self
            .pop_until(buf, &[ARG_SEPARATOR[0], S3, S4], deadline)
            .await?;
        if needle == S3 {
            needle = self.skip_until(&[S4], deadline).await?;
        }
        self.update_start_of_line(needle);
        let s = core::str::from_utf8(&buf[..len]).map_err(|_| Error::InconsistentState)?;
        Ok(s.trim_matches(' '))
    }

    /// Discards input up to and including the next `,` or end of line.
    pub async fn skip_argument(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let needle = self.skip_until(&[ARG_SEPARATOR[0], S4], deadline).await?;
        self.update_start_of_line(needle);
        Ok(())
    }

    /// Discards input up to and including the next end of line.
    pub async fn skip_line(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let needle = self.skip_until(&[S4], deadline).await?;
        self.update_start_of_line(needle);
        Ok(())
    }

    /// Discards exactly `n` bytes.
    pub async fn skip_bytes(&mut self, n: usize, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        if self.skip_block(n, deadline).await < n {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }

    /// Pops exactly `buf.len()` raw bytes, for binary payloads inside a
    /// response.
    pub async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        if self.pop_block(buf, deadline).await < buf.len() {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }

    /// Peeks two bytes and reports whether they are `\r\n`, without
    /// consuming anything.
    pub async fn check_end_of_line(&mut self, timeout: Duration) -> Result<bool, Error> {
        let deadline = Instant::now() + timeout;
        let mut two = [0u8; 2];
        if self.peek_block(&mut two, deadline).await < two.len() {
            return Err(Error::Timeout);
        }
        Ok(&two[..] == S3S4)
    }

    /// Recognizes the final response code terminating a command.
    ///
    /// Some modems pad their responses with blank lines; up to
    /// [`READ_CODE_EMPTY_LINE_LIMIT`] of them are consumed in front of
    /// the code token. The token is matched by prefix against the verbose
    /// table, telling `CONNECT` from `CONNECT <rate>` by length, and the
    /// final `\n` of the code line is consumed.
    pub async fn read_code(&mut self, timeout: Duration) -> Result<ResponseCode, Error> {
        let deadline = Instant::now() + timeout;
        let mut token = [0u8; CODE_TOKEN_CAPACITY];
        let mut token_len = 0;
        for _ in 0..=READ_CODE_EMPTY_LINE_LIMIT {
            let (len, _) = self.pop_until(&mut token, &[S3], deadline).await?;
            if len == 0 {
                // An empty line; the byte behind the S3 is its S4.
                self.skip_block(1, deadline).await;
            } else {
                token_len = len;
                break;
            }
        }
        if token_len == 0 {
            return Err(Error::InconsistentState);
        }
        let token = &token[..token_len];
        for &code in ResponseCode::TABLE {
            let verbose = code.verbose().as_bytes();
            if token.starts_with(verbose) {
                let code = if code == ResponseCode::Connect && token.len() > verbose.len() {
                    ResponseCode::ConnectDataRate
                } else {
                    code
                };
                let needle = self.skip_until(&[S4], deadline).await?;
                self.update_start_of_line(needle);
                return Ok(code);
            }
        }
        Err(Error::InconsistentState)
    }

    // ------------------------------------------------------------------
    // Byte-level primitives
    // ------------------------------------------------------------------

    /// Returns `true` on timeout. A wakeup without new bytes is fine, the
    /// callers loop and re-check the ring; each wait gets whatever is left
    /// of the caller's budget.
    async fn wait_for_rx(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        with_timeout(remaining, self.rx_wakeup.wait()).await.is_err()
    }

    /// Waits until all of `buf` can be peeked, or the deadline passes.
    /// Returns the number of bytes actually visible.
    async fn peek_block(&mut self, buf: &mut [u8], deadline: Instant) -> usize {
        loop {
            let n = self.rx.peek(buf);
            if n >= buf.len() {
                return n;
            }
            if self.wait_for_rx(deadline).await {
                return self.rx.peek(buf);
            }
        }
    }

    /// Waits until at least one byte can be peeked. Returns 0 on timeout.
    async fn peek_some(&mut self, buf: &mut [u8], deadline: Instant) -> usize {
        loop {
            let n = self.rx.peek(buf);
            if n > 0 {
                return n;
            }
            if self.wait_for_rx(deadline).await {
                return self.rx.peek(buf);
            }
        }
    }

    /// Pops whatever is available, waiting for at least one byte.
    async fn pop_some(&mut self, buf: &mut [u8], deadline: Instant) -> usize {
        let n = self.peek_some(buf, deadline).await;
        self.rx.skip(n);
        n
    }

    /// Pops until `buf` is full or the deadline passes.
    async fn pop_block(&mut self, buf: &mut [u8], deadline: Instant) -> usize {
        let mut total = self.rx.read(buf);
        while total < buf.len() {
            if self.wait_for_rx(deadline).await {
                return total + self.rx.read(&mut buf[total..]);
            }
            total += self.rx.read(&mut buf[total..]);
        }
        total
    }

    /// Discards up to `n` bytes, waiting for them as needed.
    async fn skip_block(&mut self, n: usize, deadline: Instant) -> usize {
        let mut total = self.rx.skip(n);
        while total < n {
            if self.wait_for_rx(deadline).await {
                return total + self.rx.skip(n - total);
            }
            total += self.rx.skip(n - total);
        }
        total
    }

    /// Copies into `out` until the first byte matching any needle. The
    /// needle is consumed but not stored; its identity is returned with
    /// the count of bytes before it.
    ///
    /// Fails with [`Error::BufferTooSmall`] once `out` is full without a
    /// needle (those bytes are consumed), and with [`Error::Timeout`]
    /// when the ring runs dry (bytes received so far remain in `out`).
    async fn pop_until(
        &mut self,
        out: &mut [u8],
        needles: &[u8],
        deadline: Instant,
    ) -> Result<(usize, u8), Error> {
        let mut filled = 0;
        loop {
            if filled >= out.len() {
                return Err(Error::BufferTooSmall);
            }
            let r = self.peek_some(&mut out[filled..], deadline).await;
            if r == 0 {
                return Err(Error::Timeout);
            }
            if let Some(pos) = out[filled..filled + r]
                .iter()
                .position(|b| needles.contains(b))
            {
                let needle = out[filled + pos];
                // Only the bytes up to the needle leave the ring; the
                // peeked remainder stays for the next primitive.
                self.rx.skip(pos + 1);
                return Ok((filled + pos, needle));
            }
            self.rx.skip(r);
            filled += r;
        }
    }

    /// As [`pop_until`](Self::pop_until), discarding instead of copying.
    async fn skip_until(&mut self, needles: &[u8], deadline: Instant) -> Result<u8, Error> {
        let mut scratch = [0u8; 16];
        loop {
            match self.pop_until(&mut scratch, needles, deadline).await {
                Ok((_, needle)) => return Ok(needle),
                Err(Error::BufferTooSmall) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Discards input up to, but not including, the next mnemonic-start
    /// character.
    async fn skip_to_mnemonic(&mut self, deadline: Instant) -> Result<(), Error> {
        loop {
            let mut byte = [0u8; 1];
            if self.peek_some(&mut byte, deadline).await == 0 {
                return Err(Error::Timeout);
            }
            if byte[0] == MNEMONIC_START {
                return Ok(());
            }
            self.rx.skip(1);
        }
    }

    fn update_start_of_line(&mut self, needle: u8) {
        self.start_of_line = needle == S4;
    }
}

fn resolve_base(base: u32) -> Result<u32, Error> {
    match base {
        0 | 10 => Ok(10),
        8 => Ok(8),
        16 => Ok(16),
        _ => Err(Error::InvalidParam),
    }
}

fn parse_i32(token: &[u8], radix: u32) -> Result<i32, Error> {
    let s = core::str::from_utf8(token)
        .map_err(|_| Error::InconsistentState)?
        .trim();
    match i32::from_str_radix(s, radix) {
        Ok(v) => Ok(v),
        // Two's-complement words like "ffffffff" overflow the signed
        // parse; take them through the unsigned representation.
        Err(_) => u32::from_str_radix(s, radix)
            .map(|v| v as i32)
            .map_err(|_| Error::InconsistentState),
    }
}

fn parse_u32(token: &[u8], radix: u32) -> Result<u32, Error> {
    let s = core::str::from_utf8(token)
        .map_err(|_| Error::InconsistentState)?
        .trim();
    match u32::from_str_radix(s, radix) {
        Ok(v) => Ok(v),
        Err(_) => i32::from_str_radix(s, radix)
            .map(|v| v as u32)
            .map_err(|_| Error::InconsistentState),
    }
}

fn decode_hex_pair(pair: [u8; 2]) -> Result<u8, Error> {
    let hi = nibble_from_hex(pair[0])?;
    let lo = nibble_from_hex(pair[1])?;
    Ok((hi << 4) | lo)
}

fn nibble_from_hex(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(10 + c - b'A'),
        b'a'..=b'f' => Ok(10 + c - b'a'),
        _ => Err(Error::InvalidParam),
    }
}
