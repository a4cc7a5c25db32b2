//! session behavior against a scripted device

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jbdlink::frame::checksum;
use jbdlink::registers::Value;
use jbdlink::{Duplex, Error, Session, SessionConfig, Values};

const STATUS_REJECTED: u8 = 0x80;

/// shared observable state of the scripted device
#[derive(Default)]
struct DeviceState {
    /// register payloads differing from the defaults
    memory: HashMap<u8, Vec<u8>>,
    /// every write the device accepted, in order
    writes: Vec<(u8, Vec<u8>)>,
    factory: bool,
    /// entry handshakes to reject before accepting one
    fail_factory_attempts: usize,
    /// addresses whose reads fail
    fail_reads: Vec<u8>,
    /// swallow every command without answering
    silent: bool,
    /// answer idle polls immediately instead of blocking
    eager: bool,
    opens: usize,
    closes: usize,
}

/// in-memory device honoring the frame protocol and the factory-mode gate
struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
    rx: VecDeque<Option<u8>>,
}
impl FakeDevice {
    fn new() -> (Self, Arc<Mutex<DeviceState>>) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (Self { state: state.clone(), rx: VecDeque::new() }, state)
    }

    fn respond(&mut self, status: u8, payload: &[u8]) {
        let mut frame = vec![0xDD, 0xA5, status, payload.len() as u8];
        frame.extend_from_slice(payload);
        let sum = checksum(&frame[2 ..]);
        frame.extend_from_slice(&sum.to_be_bytes());
        frame.push(0x77);
        // an idle poll before the frame exercises the session's patience
        self.rx.push_back(None);
        self.rx.extend(frame.into_iter().map(Some));
    }

    fn default_payload(address: u8) -> Vec<u8> {
        match address {
            0xAA => vec![0; 22],
            0xA0 ..= 0xA2 => vec![0],
            _ => vec![0, 0],
        }
    }

    /// configuration memory is only reachable in factory mode
    fn gated(address: u8) -> bool {
        matches!(address, 0x10 ..= 0x3F | 0xA0 ..= 0xAA)
    }
}
impl Duplex for FakeDevice {
    async fn open(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().opens += 1;
        Ok(())
    }
    async fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        match self.rx.pop_front() {
            Some(byte) => Ok(byte),
            // a port with no internal timeout reports emptiness right away
            None if self.state.lock().unwrap().eager => Ok(None),
            // otherwise stay quiet until the session gives up
            None => std::future::pending().await,
        }
    }
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let (op, address) = (data[1], data[2]);
        let payload = data[4 .. 4 + usize::from(data[3])].to_vec();
        let mut state = self.state.lock().unwrap();
        if state.silent {
            return Ok(());
        }
        match op {
            // write
            0x5A => match address {
                0x00 if payload == [0x56, 0x78] => {
                    if state.fail_factory_attempts > 0 {
                        state.fail_factory_attempts -= 1;
                        drop(state);
                        self.respond(STATUS_REJECTED, &[]);
                    } else {
                        state.factory = true;
                        state.writes.push((address, payload));
                        drop(state);
                        self.respond(0, &[]);
                    }
                }
                0x01 => {
                    state.factory = false;
                    state.writes.push((address, payload));
                    drop(state);
                    self.respond(0, &[]);
                }
                _ if Self::gated(address) && !state.factory => {
                    drop(state);
                    self.respond(STATUS_REJECTED, &[]);
                }
                _ => {
                    state.memory.insert(address, payload.clone());
                    state.writes.push((address, payload));
                    drop(state);
                    self.respond(0, &[]);
                }
            },
            // read
            0xA5 => {
                if state.fail_reads.contains(&address)
                    || Self::gated(address) && !state.factory
                {
                    drop(state);
                    self.respond(STATUS_REJECTED, &[]);
                } else {
                    let payload = state.memory.get(&address).cloned()
                        .unwrap_or_else(|| Self::default_payload(address));
                    drop(state);
                    self.respond(0, &payload);
                }
            }
            _ => panic!("unknown op {op:#04x}"),
        }
        Ok(())
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        response_timeout: Duration::from_millis(50),
        factory_retries: 5,
        factory_retry_delay: Duration::from_millis(1),
    }
}

fn session() -> (Session<FakeDevice>, Arc<Mutex<DeviceState>>) {
    let (device, state) = FakeDevice::new();
    (Session::with_config(device, fast_config()).unwrap(), state)
}

#[tokio::test]
async fn read_register_bank() {
    let (session, state) = session();
    state.lock().unwrap().memory.insert(0x24, vec![0x10, 0x9A]);
    state.lock().unwrap().memory.insert(0x38, vec![0x85, 0x1E]);

    let mut reports = Vec::new();
    let values = session.read_register_bank(|percent| reports.push(percent)).await.unwrap();

    assert_eq!(values["covp"], Value::Int(4250));
    assert_eq!(values["sc"], Value::Int(5));
    assert_eq!(values["sc_dsgoc_x2"], Value::Bool(true));
    assert_eq!(values["mfg_name"], Value::Text(String::new()));
    assert_eq!(values["sc_err_cnt"], Value::Int(0));

    // one report per register, ending exactly at 100
    assert_eq!(reports.len(), 52);
    assert_eq!(reports.last(), Some(&100));
    assert!(reports.windows(2).all(|pair| pair[0] <= pair[1]));

    let state = state.lock().unwrap();
    // factory mode entered first and left last
    assert_eq!(state.writes.first(), Some(&(0x00, vec![0x56, 0x78])));
    assert_eq!(state.writes.last(), Some(&(0x01, vec![0x00, 0x00])));
    assert!(!state.factory);
    assert_eq!(state.opens, state.closes);
}

#[tokio::test]
async fn read_register_bank_aborts_without_partial_values() {
    let (session, state) = session();
    state.lock().unwrap().fail_reads.push(0x26);

    let mut reports = Vec::new();
    let result = session.read_register_bank(|percent| reports.push(percent)).await;
    assert!(matches!(result, Err(Error::Device(STATUS_REJECTED))));

    // progress still terminates at 100 and the device is back in normal mode
    assert_eq!(reports.last(), Some(&100));
    let state = state.lock().unwrap();
    assert_eq!(state.writes.last(), Some(&(0x01, vec![0x00, 0x00])));
    assert!(!state.factory);
}

#[tokio::test]
async fn write_register_bank() {
    let (session, state) = session();
    let mut values = Values::new();
    values.insert("covp".into(), Value::Int(4250));
    values.insert("cuvp_delay".into(), Value::Int(3));
    values.insert("covp_delay".into(), Value::Int(5));
    // read-only values are skipped, not fatal
    values.insert("sc_err_cnt".into(), Value::Int(0));

    let mut reports = Vec::new();
    session.write_register_bank(&values, |percent| reports.push(percent)).await.unwrap();
    assert_eq!(reports.last(), Some(&100));

    let state = state.lock().unwrap();
    assert_eq!(state.memory[&0x24], vec![0x10, 0x9A]);
    // both delay values land in their shared register with one write
    assert_eq!(state.memory[&0x3D], vec![3, 5]);
    assert!(!state.memory.contains_key(&0xAA));
    assert!(!state.factory);
}

#[tokio::test]
async fn write_register_bank_validates_before_touching_the_device() {
    let (session, state) = session();

    let mut values = Values::new();
    values.insert("no_such_value".into(), Value::Int(1));
    let result = session.write_register_bank(&values, |_| ()).await;
    assert!(matches!(result, Err(Error::UnknownValue(_))));

    let mut values = Values::new();
    values.insert("covp".into(), Value::Int(100_000));
    let result = session.write_register_bank(&values, |_| ()).await;
    assert!(matches!(result, Err(Error::Domain { .. })));

    let state = state.lock().unwrap();
    assert_eq!(state.opens, 0);
    assert!(state.writes.is_empty());
}

#[tokio::test]
async fn factory_entry_retries() {
    let (session, state) = session();
    state.lock().unwrap().fail_factory_attempts = 2;
    session.enter_factory().await.unwrap();
    assert!(state.lock().unwrap().factory);
}

#[tokio::test]
async fn factory_entry_gives_up() {
    let (session, state) = session();
    state.lock().unwrap().fail_factory_attempts = 100;
    let result = session.enter_factory().await;
    assert!(matches!(result, Err(Error::Device(STATUS_REJECTED))));
    assert!(!state.lock().unwrap().factory);
}

#[tokio::test]
async fn silent_device_times_out() {
    let (session, state) = session();
    state.lock().unwrap().silent = true;
    let result = session.read_raw(0x03).await;
    assert!(matches!(result, Err(Error::Timeout)));
}

#[tokio::test]
async fn eagerly_polling_link_still_times_out() {
    // a link answering every poll with "no data yet" must not spin past the deadline
    let (session, state) = session();
    {
        let mut state = state.lock().unwrap();
        state.silent = true;
        state.eager = true;
    }
    let result = session.read_raw(0x03).await;
    assert!(matches!(result, Err(Error::Timeout)));
}

#[tokio::test]
async fn clear_errors_uses_the_magic_exit_word() {
    let (session, state) = session();
    session.clear_errors().await.unwrap();
    let state = state.lock().unwrap();
    assert_eq!(state.writes.last(), Some(&(0x01, vec![0x28, 0x28])));
}

#[tokio::test]
async fn telemetry_reads_leave_factory_mode_first() {
    let (session, state) = session();
    {
        let mut state = state.lock().unwrap();
        state.factory = true;
        let mut payload = Vec::new();
        payload.extend_from_slice(&1650u16.to_be_bytes());
        payload.extend_from_slice(&(-250i16).to_be_bytes());
        payload.extend_from_slice(&500u16.to_be_bytes());
        payload.extend_from_slice(&1000u16.to_be_bytes());
        payload.extend_from_slice(&12u16.to_be_bytes());
        payload.extend_from_slice(&0x306Fu16.to_be_bytes());
        payload.extend_from_slice(&5u32.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.push(0x23);
        payload.push(48);
        payload.push(0x03);
        payload.push(4);
        payload.push(1);
        payload.extend_from_slice(&2981u16.to_be_bytes());
        state.memory.insert(0x03, payload);
        state.memory.insert(0x04, [3300u16, 3301].iter().flat_map(|mv| mv.to_be_bytes()).collect());
        state.memory.insert(0x05, b"JBD-SP04S020".to_vec());
    }

    let info = session.read_basic_info().await.unwrap();
    assert_eq!(info["pack_mv"], Value::Int(16500));
    assert_eq!(info["pack_ma"], Value::Int(-2500));
    assert_eq!(info["ntc0"], Value::Float(25.0));
    assert!(!state.lock().unwrap().factory);

    let cells = session.read_cell_info().await.unwrap();
    assert_eq!(cells["cell0_mv"], Value::Int(3300));
    assert_eq!(cells["cell1_mv"], Value::Int(3301));

    let all = session.read_info().await.unwrap();
    assert_eq!(all["pack_mv"], Value::Int(16500));
    assert_eq!(all["cell1_mv"], Value::Int(3301));
    assert_eq!(all["device_name"], Value::Text("JBD-SP04S020".into()));
}

#[tokio::test]
async fn cell_calibration_writes_each_cell() {
    let (session, state) = session();
    let mut reports = Vec::new();
    session.calibrate_cells(&[3300, 3301, 3302], |percent| reports.push(percent)).await.unwrap();
    // one report per cell written, ending exactly at 100
    assert_eq!(reports, [33, 66, 100]);
    let state = state.lock().unwrap();
    assert_eq!(state.memory[&0xB0], 3300u16.to_be_bytes());
    assert_eq!(state.memory[&0xB1], 3301u16.to_be_bytes());
    assert_eq!(state.memory[&0xB2], 3302u16.to_be_bytes());
    assert!(!state.factory);
}

#[tokio::test]
async fn ntc_calibration_packs_temperatures_with_progress() {
    let (session, state) = session();
    let mut reports = Vec::new();
    session.calibrate_ntcs(&[25.0, -30.0], |percent| reports.push(percent)).await.unwrap();
    assert_eq!(reports, [50, 100]);
    let state = state.lock().unwrap();
    assert_eq!(state.memory[&0xD0], 2981u16.to_be_bytes());
    assert_eq!(state.memory[&0xD1], 2431u16.to_be_bytes());
    assert!(!state.factory);
}

#[tokio::test]
async fn current_calibration_scales_to_wire_units() {
    let (session, state) = session();
    session.calibrate_charge_current(2500).await.unwrap();
    session.calibrate_idle_current().await.unwrap();
    let state = state.lock().unwrap();
    assert_eq!(state.memory[&0xAE], 250u16.to_be_bytes());
    assert_eq!(state.memory[&0xAD], 0u16.to_be_bytes());
}

#[tokio::test]
async fn mosfet_control_inverts_the_enable_flags() {
    let (session, state) = session();
    session.set_mosfets(false, true).await.unwrap();
    assert_eq!(state.lock().unwrap().memory[&0xE1], vec![0x00, 0x01]);
    session.set_mosfets(true, false).await.unwrap();
    assert_eq!(state.lock().unwrap().memory[&0xE1], vec![0x00, 0x02]);
}

#[tokio::test]
async fn raw_access_moves_one_word() {
    let (session, state) = session();
    session.write_raw(0xE0, 0x1234).await.unwrap();
    assert_eq!(state.lock().unwrap().memory[&0xE0], vec![0x12, 0x34]);
    assert_eq!(session.read_raw(0xE0).await.unwrap(), 0x1234);
}

#[tokio::test]
async fn balance_test_mode_holds_factory_until_exit() {
    let (session, state) = session();
    session.balance_open_odd().await.unwrap();
    {
        let state = state.lock().unwrap();
        assert_eq!(state.memory[&0xE2], vec![0x00, 0x01]);
        assert!(state.factory);
    }
    session.balance_exit().await.unwrap();
    assert!(!state.lock().unwrap().factory);
}
