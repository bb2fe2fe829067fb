//! Recording carriers for tests.

use crate::connection::{PeerChannel, PeerDialer, TransportError};
use crate::relay::{RelayRequest, RelayTransport};
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
struct ChannelLog {
    sent: Vec<String>,
    closed: bool,
}

/// Direct channel that records what is sent over it.
pub struct RecordingChannel {
    log: Rc<RefCell<ChannelLog>>,
}

/// Test-side view of a [`RecordingChannel`].
#[derive(Clone)]
pub struct ChannelProbe {
    log: Rc<RefCell<ChannelLog>>,
}

impl RecordingChannel {
    pub fn new() -> (Self, ChannelProbe) {
        let log = Rc::new(RefCell::new(ChannelLog::default()));
        (Self { log: log.clone() }, ChannelProbe { log })
    }
}

impl PeerChannel for RecordingChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.closed {
            return Err(TransportError::Closed);
        }
        log.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed = true;
    }
}

impl ChannelProbe {
    pub fn sent(&self) -> Vec<String> {
        self.log.borrow().sent.clone()
    }

    /// Frames sent since the last call.
    pub fn take_sent(&self) -> Vec<String> {
        mem::take(&mut self.log.borrow_mut().sent)
    }

    pub fn is_closed(&self) -> bool {
        self.log.borrow().closed
    }
}

#[derive(Default)]
struct Dials {
    attempts: usize,
    probes: Vec<ChannelProbe>,
}

/// Record of every dial a [`RecordingDialer`] served.
#[derive(Clone)]
pub struct DialLog(Rc<RefCell<Dials>>);

impl DialLog {
    pub fn count(&self) -> usize {
        self.0.borrow().attempts
    }

    /// Probe for the most recently opened channel.
    pub fn last(&self) -> Option<ChannelProbe> {
        self.0.borrow().probes.last().cloned()
    }
}

/// Dialer handing out recording channels, or failing every dial.
pub struct RecordingDialer {
    dials: DialLog,
    fail: bool,
}

impl RecordingDialer {
    pub fn new() -> (Self, DialLog) {
        let dials = DialLog(Rc::new(RefCell::new(Dials::default())));
        (
            Self {
                dials: dials.clone(),
                fail: false,
            },
            dials,
        )
    }

    pub fn failing() -> (Self, DialLog) {
        let (mut dialer, dials) = Self::new();
        dialer.fail = true;
        (dialer, dials)
    }
}

impl PeerDialer for RecordingDialer {
    fn dial(&mut self, _peer_id: &str) -> Result<Box<dyn PeerChannel>, TransportError> {
        let mut dials = self.dials.0.borrow_mut();
        dials.attempts += 1;
        if self.fail {
            return Err(TransportError::Dial("unreachable".into()));
        }
        let (channel, probe) = RecordingChannel::new();
        dials.probes.push(probe);
        Ok(Box::new(channel))
    }
}

/// Relay that records every request.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    pub requests: Vec<RelayRequest>,
}

impl RecordingRelay {
    pub fn take(&mut self) -> Vec<RelayRequest> {
        mem::take(&mut self.requests)
    }
}

impl RelayTransport for RecordingRelay {
    fn send(&mut self, request: &RelayRequest) -> Result<(), TransportError> {
        self.requests.push(request.clone());
        Ok(())
    }
}
