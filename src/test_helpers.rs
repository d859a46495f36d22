//! Shared serial, timer and pin mocks for the in-crate tests. Handles
//! are cheap clones over shared state, so a test keeps one end while
//! the client owns the other.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;

use fugit::TimerInstantU32;

use crate::client::GsmClient;
use crate::clock::Clock;
use crate::config::{Config, NoPin};
use crate::registration::RegistrationStatus;
use crate::state::{GprsState, Negotiated, NegotiationFlags};

pub(crate) type TestClient = GsmClient<MockSerial, MockTimer, NoPin, NoPin, 1000, 6, 32>;

pub(crate) fn test_client() -> (TestClient, MockSerial, MockTimer) {
    let serial = MockSerial::new();
    let timer = MockTimer::new();
    let client = GsmClient::new(serial.clone(), timer.clone(), Config::new());
    (client, serial, timer)
}

/// Puts a client into the settled, registered, bearer-up session most
/// tests want to start from: every setting confirmed and every poll
/// freshly stamped, so the scheduler has nothing of its own to do.
pub(crate) fn go_online(client: &mut TestClient) {
    let now = client.timer.now();
    client.baud_synced = true;
    client.flags = NegotiationFlags {
        echo: Negotiated::Confirmed,
        clip: Negotiated::Confirmed,
        cscs: Negotiated::Confirmed,
        cmgf: Negotiated::Confirmed,
        cnmi: Negotiated::Confirmed,
        cipmux: Negotiated::Confirmed,
        clts: Negotiated::Confirmed,
    };
    client.registration = RegistrationStatus::Registered;
    client.gprs_enabled = true;
    client.gprs_state = GprsState::IpStatus;
    client.last_signal_poll = Some(now);
    client.last_battery_poll = Some(now);
    client.last_clock_poll = Some(now);
    client.last_registration_poll = Some(now);
}

/// Millisecond-tick test clock. Clones share the same time base.
#[derive(Clone, Default)]
pub(crate) struct MockTimer {
    now_ms: Rc<Cell<u32>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u32) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock<1000> for MockTimer {
    fn now(&mut self) -> TimerInstantU32<1000> {
        TimerInstantU32::from_ticks(self.now_ms.get())
    }
}

#[derive(Default)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

/// In-memory serial port. `inject*` plays the modem side; `take_tx`
/// collects what the client wrote.
#[derive(Clone, Default)]
pub(crate) struct MockSerial {
    state: Rc<RefCell<SerialState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    pub fn inject_line(&self, line: &str) {
        self.inject(line.as_bytes());
        self.inject(b"\r\n");
    }

    pub fn take_tx(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.borrow_mut().tx)
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = Infallible;
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        let mut count = 0;
        for slot in buf.iter_mut() {
            match state.rx.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.state.borrow().rx.is_empty())
    }
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.state.borrow_mut().tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Digital pin with an externally readable and settable level.
#[derive(Clone, Default)]
pub(crate) struct MockPin {
    level: Rc<Cell<bool>>,
}

impl MockPin {
    pub fn new(level: bool) -> Self {
        let pin = Self::default();
        pin.level.set(level);
        pin
    }

    pub fn set(&self, level: bool) {
        self.level.set(level);
    }

    pub fn level(&self) -> bool {
        self.level.get()
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.get())
    }
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.set(true);
        Ok(())
    }
}
