/*!
    request/response session with one device

    [Session] owns the byte link and the register [Bank] behind one mutex,
    so concurrent tasks serialize naturally around whole operations. the
    link itself is abstracted by [Duplex], letting tests drive the session
    against a scripted peer instead of hardware.

    configuration registers are only reachable in factory mode, entered by a
    magic write and left by another; every operation here brackets its
    accesses with that handshake and restores normal mode on all paths.
*/

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout_at};

use crate::error::Error;
use crate::frame::{self, Op, Response, Scanner};
use crate::registers::{Bank, Register, Values};

/// register taking the factory-mode entry magic
const FACTORY_ADDRESS: u8 = 0x00;
const FACTORY_ENTER: [u8; 2] = [0x56, 0x78];
/// register taking the factory-mode exit word
const EXIT_ADDRESS: u8 = 0x01;
const EXIT_PLAIN: [u8; 2] = [0x00, 0x00];
/// exit word that also clears the persistent fault counters
const EXIT_CLEAR: [u8; 2] = [0x28, 0x28];

/// first cell voltage calibration register, one per cell
const CAL_CELL_BASE: u8 = 0xB0;
const CAL_CELL_LAST: u8 = 0xCF;
/// first thermistor calibration register, one per sensor
const CAL_NTC_BASE: u8 = 0xD0;
const CAL_NTC_LAST: u8 = 0xD7;
const CAL_IDLE_CURRENT: u8 = 0xAD;
const CAL_CHG_CURRENT: u8 = 0xAE;
const CAL_DSG_CURRENT: u8 = 0xAF;
const MOSFET_CTRL: u8 = 0xE1;
const BALANCE_CTRL: u8 = 0xE2;

/**
    abstract byte-duplex link to the device

    `read_byte` may yield `None` when the link idled past its own polling
    delay without data; the session keeps waiting until its response
    deadline instead of treating that as an error.
*/
#[allow(async_fn_in_trait)]
pub trait Duplex {
    async fn open(&mut self) -> std::io::Result<()>;
    async fn close(&mut self) -> std::io::Result<()>;
    async fn read_byte(&mut self) -> std::io::Result<Option<u8>>;
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// tunable timings of a [Session]
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// how long to wait for a complete response frame
    pub response_timeout: Duration,
    /// attempts of the factory-mode entry handshake
    pub factory_retries: usize,
    /// pause between entry attempts
    pub factory_retry_delay: Duration,
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            factory_retries: 5,
            factory_retry_delay: Duration::from_millis(300),
        }
    }
}

/// percentage callback wrapper keeping the final 100 guaranteed and unique
struct Reporter<F: FnMut(u8)> {
    callback: F,
    last: Option<u8>,
}
impl<F: FnMut(u8)> Reporter<F> {
    fn new(callback: F) -> Self {
        Self { callback, last: None }
    }
    fn report(&mut self, percent: u8) {
        self.last = Some(percent);
        (self.callback)(percent);
    }
    /// force a trailing 100 on paths that stopped early
    fn finish(&mut self) {
        if self.last != Some(100) {
            self.report(100);
        }
    }
}

/// everything guarded by the session mutex
struct State<D> {
    bus: D,
    /// nesting depth of logical opens, the bus is open while non-zero
    open: usize,
    bank: Bank,
}

async fn open<D: Duplex>(state: &mut State<D>) -> Result<(), Error> {
    if state.open == 0 {
        state.bus.open().await?;
    }
    state.open += 1;
    Ok(())
}

async fn close<D: Duplex>(state: &mut State<D>) -> Result<(), Error> {
    debug_assert!(state.open > 0);
    state.open = state.open.saturating_sub(1);
    if state.open == 0 {
        state.bus.close().await?;
    }
    Ok(())
}

/**
    one configuration and telemetry session with a device

    all operations are self-contained: they open the link, bracket factory
    mode where needed, and restore everything before returning, whatever
    the outcome. a failed operation never yields partial results.
*/
pub struct Session<D> {
    state: Mutex<State<D>>,
    config: SessionConfig,
}
impl<D: Duplex> Session<D> {
    /// session over the standard register table
    pub fn new(bus: D) -> Result<Self, Error> {
        Self::with_config(bus, SessionConfig::default())
    }
    pub fn with_config(bus: D, config: SessionConfig) -> Result<Self, Error> {
        Ok(Self {
            state: Mutex::new(State { bus, open: 0, bank: Bank::standard()? }),
            config,
        })
    }

    /// send one command frame and wait for its response
    async fn exchange(&self, bus: &mut D, op: Op, address: u8, data: &[u8]) -> Result<Response, Error> {
        let command = frame::command(op, address, data);
        log::debug!("sending {:02X?}", command);
        bus.write(&command).await?;
        let deadline = Instant::now() + self.config.response_timeout;
        let mut scanner = Scanner::new();
        loop {
            let byte = timeout_at(deadline, bus.read_byte()).await
                .map_err(|_| Error::Timeout)??;
            let Some(byte) = byte else {
                // a link polling without delay would never let the timeout fire
                if Instant::now() >= deadline {
                    return Err(Error::Timeout);
                }
                continue
            };
            if let Some(response) = scanner.push(byte) {
                log::debug!("received status {:#04x} payload {:02X?}", response.status, response.payload);
                return Ok(response);
            }
        }
    }

    /// exchange that promotes a failing device status to an error
    async fn exchange_ok(&self, bus: &mut D, op: Op, address: u8, data: &[u8]) -> Result<Vec<u8>, Error> {
        let response = self.exchange(bus, op, address, data).await?;
        if response.ok() {
            Ok(response.payload)
        } else {
            Err(Error::Device(response.status))
        }
    }

    /// common operation epilogue: close the link, let the primary error win
    async fn finishing<T>(&self, state: &mut State<D>, result: Result<T, Error>) -> Result<T, Error> {
        let closed = close(state).await;
        match result {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(error) => {
                if let Err(close_error) = closed {
                    log::warn!("closing the link also failed: {close_error}");
                }
                Err(error)
            }
        }
    }

    async fn enter_factory_locked(&self, state: &mut State<D>) -> Result<(), Error> {
        open(state).await?;
        let mut result = Err(Error::Timeout);
        for attempt in 0 .. self.config.factory_retries {
            if attempt != 0 {
                sleep(self.config.factory_retry_delay).await;
            }
            match self.exchange(&mut state.bus, Op::Write, FACTORY_ADDRESS, &FACTORY_ENTER).await {
                Ok(response) if response.ok() => {
                    result = Ok(());
                    break;
                }
                Ok(response) => result = Err(Error::Device(response.status)),
                Err(error @ (Error::Timeout | Error::Device(_))) => result = Err(error),
                Err(error) => {
                    // the link itself broke, retrying cannot help
                    result = Err(error);
                    break;
                }
            }
        }
        self.finishing(state, result).await
    }

    async fn exit_factory_locked(&self, state: &mut State<D>, clear_errors: bool) -> Result<(), Error> {
        open(state).await?;
        let word = if clear_errors { EXIT_CLEAR } else { EXIT_PLAIN };
        let result = self.exchange_ok(&mut state.bus, Op::Write, EXIT_ADDRESS, &word).await.map(drop);
        self.finishing(state, result).await
    }

    /// switch the device to factory mode, retrying the handshake a few times
    pub async fn enter_factory(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.enter_factory_locked(&mut state).await
    }

    /// switch the device back to normal mode
    pub async fn exit_factory(&self, clear_errors: bool) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.exit_factory_locked(&mut state, clear_errors).await
    }

    /// reset the persistent fault counters
    pub async fn clear_errors(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = match self.enter_factory_locked(state).await {
            Ok(()) => self.exit_factory_locked(state, true).await,
            Err(error) => Err(error),
        };
        self.finishing(state, result).await
    }

    /**
        read the whole configuration register bank

        `progress` is called once per register with the completed
        percentage, plus a guaranteed final 100. on any failure no partial
        values are returned.
    */
    pub async fn read_register_bank(&self, progress: impl FnMut(u8)) -> Result<Values, Error> {
        let mut reporter = Reporter::new(progress);
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = self.read_bank_inner(state, &mut reporter).await;
        let result = self.finishing(state, result).await;
        reporter.finish();
        result
    }

    async fn read_bank_inner(
        &self,
        state: &mut State<D>,
        reporter: &mut Reporter<impl FnMut(u8)>,
    ) -> Result<Values, Error> {
        self.enter_factory_locked(state).await?;
        let total = state.bank.len();
        let mut values = Values::new();
        let mut outcome = Ok(());
        for i in 0 .. total {
            let address = state.bank.register(i).address();
            let decoded = match self.exchange_ok(&mut state.bus, Op::Read, address, &[]).await {
                Ok(payload) => state.bank.register_mut(i).decode(&payload),
                Err(error) => Err(error),
            };
            if let Err(error) = decoded {
                outcome = Err(error);
                break;
            }
            values.extend(state.bank.register(i).values());
            reporter.report(((i + 1) * 100 / total) as u8);
        }
        let exited = self.exit_factory_locked(state, false).await;
        outcome?;
        exited?;
        Ok(values)
    }

    /**
        write named values to the configuration register bank

        values are resolved and validated against the bank before the
        device is touched, so a bad value aborts the whole write. values
        belonging to read-only registers are skipped with a warning. only
        registers actually named by `values` are written, each one whole.
    */
    pub async fn write_register_bank(&self, values: &Values, progress: impl FnMut(u8)) -> Result<(), Error> {
        let mut reporter = Reporter::new(progress);
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let mut touched = BTreeSet::new();
        for (name, value) in values {
            let i = state.bank.owner(name)
                .ok_or_else(|| Error::UnknownValue(name.clone()))?;
            match state.bank.register_mut(i).set(name, value) {
                Ok(()) => { touched.insert(i); }
                Err(Error::ReadOnly(register)) =>
                    log::warn!("skipping value {name} of read-only register {register}"),
                Err(error) => return Err(error),
            }
        }

        open(state).await?;
        let result = self.write_bank_inner(state, &touched, &mut reporter).await;
        let result = self.finishing(state, result).await;
        reporter.finish();
        result
    }

    async fn write_bank_inner(
        &self,
        state: &mut State<D>,
        touched: &BTreeSet<usize>,
        reporter: &mut Reporter<impl FnMut(u8)>,
    ) -> Result<(), Error> {
        self.enter_factory_locked(state).await?;
        let mut outcome = Ok(());
        for (n, &i) in touched.iter().enumerate() {
            let register = state.bank.register(i);
            let (address, payload) = (register.address(), register.encode());
            let written = match payload {
                Ok(payload) => self.exchange_ok(&mut state.bus, Op::Write, address, &payload).await.map(drop),
                Err(error) => Err(error),
            };
            if let Err(error) = written {
                outcome = Err(error);
                break;
            }
            reporter.report(((n + 1) * 100 / touched.len()) as u8);
        }
        let exited = self.exit_factory_locked(state, false).await;
        outcome?;
        exited
    }

    async fn read_telemetry(&self, mut register: Register) -> Result<Values, Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = self.read_telemetry_inner(state, &mut register).await;
        self.finishing(state, result).await
    }

    async fn read_telemetry_inner(&self, state: &mut State<D>, register: &mut Register) -> Result<Values, Error> {
        // telemetry is only served in normal mode
        self.exit_factory_locked(state, false).await?;
        let payload = self.exchange_ok(&mut state.bus, Op::Read, register.address(), &[]).await?;
        register.decode(&payload)?;
        Ok(register.values().into_iter().collect())
    }

    /// read live pack telemetry: voltages, current, capacity, faults, balancing, thermistors
    pub async fn read_basic_info(&self) -> Result<Values, Error> {
        self.read_telemetry(Register::basic_info()).await
    }

    /// read per-cell voltages
    pub async fn read_cell_info(&self) -> Result<Values, Error> {
        self.read_telemetry(Register::cell_info()).await
    }

    /// read the device model name
    pub async fn read_device_info(&self) -> Result<Values, Error> {
        self.read_telemetry(Register::device_info()).await
    }

    /// read all three telemetry blocks in one link session
    pub async fn read_info(&self) -> Result<Values, Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let mut result = Ok(Values::new());
        for mut register in [Register::basic_info(), Register::cell_info(), Register::device_info()] {
            match self.read_telemetry_inner(state, &mut register).await {
                Ok(values) => if let Ok(all) = &mut result { all.extend(values) },
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.finishing(state, result).await
    }

    /// write reference cell voltages in mV to the calibration registers
    pub async fn calibrate_cells(&self, millivolts: &[u16], progress: impl FnMut(u8)) -> Result<(), Error> {
        let registers = (CAL_CELL_BASE ..= CAL_CELL_LAST).zip(millivolts)
            .map(|(address, &mv)| (address, mv))
            .collect();
        self.write_factory_words(registers, progress).await
    }

    /// write reference thermistor temperatures in Celsius to the calibration registers
    pub async fn calibrate_ntcs(&self, celsius: &[f64], progress: impl FnMut(u8)) -> Result<(), Error> {
        let registers = (CAL_NTC_BASE ..= CAL_NTC_LAST).zip(celsius)
            .map(|(address, &c)| (address, crate::registers::pack_temp(c)))
            .collect();
        self.write_factory_words(registers, progress).await
    }

    /// declare the pack currently idle, zeroing the current reading
    pub async fn calibrate_idle_current(&self) -> Result<(), Error> {
        self.write_factory_words(vec![(CAL_IDLE_CURRENT, 0)], |_| ()).await
    }

    /// declare the actual charge current in mA while charging
    pub async fn calibrate_charge_current(&self, milliamps: u16) -> Result<(), Error> {
        self.write_factory_words(vec![(CAL_CHG_CURRENT, milliamps / 10)], |_| ()).await
    }

    /// declare the actual discharge current in mA while discharging
    pub async fn calibrate_discharge_current(&self, milliamps: u16) -> Result<(), Error> {
        self.write_factory_words(vec![(CAL_DSG_CURRENT, milliamps / 10)], |_| ()).await
    }

    async fn write_factory_words(&self, registers: Vec<(u8, u16)>, progress: impl FnMut(u8)) -> Result<(), Error> {
        let mut reporter = Reporter::new(progress);
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = self.write_factory_words_inner(state, &registers, &mut reporter).await;
        let result = self.finishing(state, result).await;
        reporter.finish();
        result
    }

    async fn write_factory_words_inner(
        &self,
        state: &mut State<D>,
        registers: &[(u8, u16)],
        reporter: &mut Reporter<impl FnMut(u8)>,
    ) -> Result<(), Error> {
        self.enter_factory_locked(state).await?;
        let mut outcome = Ok(());
        for (i, &(address, word)) in registers.iter().enumerate() {
            if let Err(error) = self.exchange_ok(&mut state.bus, Op::Write, address, &word.to_be_bytes()).await {
                outcome = Err(error);
                break;
            }
            reporter.report(((i + 1) * 100 / registers.len()) as u8);
        }
        let exited = self.exit_factory_locked(state, false).await;
        outcome?;
        exited
    }

    /// enable or disable the charge and discharge MOSFETs
    pub async fn set_mosfets(&self, charge: bool, discharge: bool) -> Result<(), Error> {
        // the control word disables with a set bit
        let word = u16::from(!charge) | u16::from(!discharge) << 1;
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = self.exchange_ok(&mut state.bus, Op::Write, MOSFET_CTRL, &word.to_be_bytes()).await.map(drop);
        self.finishing(state, result).await
    }

    /// force all balancing channels closed, for testing the balance circuit
    pub async fn balance_close_all(&self) -> Result<(), Error> {
        self.balance_control(3).await
    }
    /// force the odd balancing channels open
    pub async fn balance_open_odd(&self) -> Result<(), Error> {
        self.balance_control(1).await
    }
    /// force the even balancing channels open
    pub async fn balance_open_even(&self) -> Result<(), Error> {
        self.balance_control(2).await
    }
    /// leave the forced balancing test mode
    pub async fn balance_exit(&self) -> Result<(), Error> {
        self.exit_factory(false).await
    }

    /// the forced state persists until [Self::balance_exit], so factory mode is left on
    async fn balance_control(&self, word: u16) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = match self.enter_factory_locked(state).await {
            Ok(()) => self.exchange_ok(&mut state.bus, Op::Write, BALANCE_CTRL, &word.to_be_bytes()).await.map(drop),
            Err(error) => Err(error),
        };
        self.finishing(state, result).await
    }

    /// read one register as an unscaled 16-bit word, for diagnostics
    pub async fn read_raw(&self, address: u8) -> Result<u16, Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = match self.exchange_ok(&mut state.bus, Op::Read, address, &[]).await {
            Ok(payload) => payload.as_slice().try_into()
                .map(u16::from_be_bytes)
                .map_err(|_| Error::Protocol("raw register payload is not 2 bytes")),
            Err(error) => Err(error),
        };
        self.finishing(state, result).await
    }

    /// write one register as an unscaled 16-bit word, for diagnostics
    pub async fn write_raw(&self, address: u8, value: u16) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        open(state).await?;
        let result = self.exchange_ok(&mut state.bus, Op::Write, address, &value.to_be_bytes()).await.map(drop);
        self.finishing(state, result).await
    }
}
