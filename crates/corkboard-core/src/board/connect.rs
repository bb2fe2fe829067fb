//! Client connect state machine.
//!
//! Pure transition logic: the machine is fed [`ConnectInput`]s and answers
//! with [`ConnectAction`]s for the client role to carry out. Time only
//! enters through `Start` and `Tick`, so the retry and reroute paths can be
//! driven without a real clock.

use super::Status;
use crate::config::ConnectOptions;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Idle,
    /// Waiting for direct attempt `attempt` (1-based) to open.
    Direct { attempt: u32 },
    /// Direct attempts exhausted; waiting for the relay to open a route.
    Rerouting,
    /// Transport open, join sent, waiting for the host's answer.
    Joining,
    Joined,
    Failed,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectInput {
    Start(Instant),
    TransportOpened,
    Tick(Instant),
    RouteOpened,
    RouteUnavailable,
    JoinAccepted,
    JoinRejected,
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectAction {
    Dial { attempt: u32 },
    /// Close the pending direct transport.
    AbandonDirect,
    RequestRoute,
    SendJoin,
    Status(Status),
}

#[derive(Debug, Clone)]
pub struct ConnectMachine {
    phase: ConnectPhase,
    timeout: Duration,
    direct_attempts: u32,
    deadline: Option<Instant>,
    join_sent: bool,
}

impl ConnectMachine {
    pub fn new(options: &ConnectOptions) -> Self {
        Self {
            phase: ConnectPhase::Idle,
            timeout: options.timeout(),
            direct_attempts: options.direct_attempts.max(1),
            deadline: None,
            join_sent: false,
        }
    }

    pub fn phase(&self) -> ConnectPhase {
        self.phase
    }

    /// When the pending direct attempt times out, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_joined(&self) -> bool {
        self.phase == ConnectPhase::Joined
    }

    pub fn handle(&mut self, input: ConnectInput) -> Vec<ConnectAction> {
        use ConnectAction as A;
        use ConnectPhase as P;

        match (self.phase, input) {
            (P::Idle | P::Disconnected | P::Failed, ConnectInput::Start(now)) => {
                self.join_sent = false;
                self.dial(1, now, Status::Connecting)
            }

            (P::Direct { .. }, ConnectInput::TransportOpened) => {
                self.deadline = None;
                self.begin_join()
            }

            (P::Direct { attempt }, ConnectInput::Tick(now)) => {
                match self.deadline {
                    Some(deadline) if now >= deadline => {}
                    _ => return Vec::new(),
                }
                self.deadline.take();
                if attempt < self.direct_attempts {
                    let mut actions = vec![A::AbandonDirect];
                    actions.extend(self.dial(attempt + 1, now, Status::Retrying));
                    actions
                } else {
                    self.phase = P::Rerouting;
                    vec![A::AbandonDirect, A::Status(Status::Rerouting), A::RequestRoute]
                }
            }

            (P::Rerouting, ConnectInput::RouteOpened) => self.begin_join(),

            (P::Rerouting, ConnectInput::RouteUnavailable) => {
                self.phase = P::Failed;
                vec![A::Status(Status::Failed("no route to host".into()))]
            }

            (P::Joining, ConnectInput::JoinAccepted) => {
                self.phase = P::Joined;
                vec![A::Status(Status::Joined)]
            }

            (P::Joining, ConnectInput::JoinRejected) => {
                self.phase = P::Failed;
                vec![A::Status(Status::Failed("join rejected".into()))]
            }

            (P::Joining | P::Joined, ConnectInput::TransportClosed) => {
                self.phase = P::Disconnected;
                self.deadline = None;
                vec![A::Status(Status::Disconnected)]
            }

            (phase, input) => {
                log::debug!("Connect: ignoring {:?} in {:?}", input, phase);
                Vec::new()
            }
        }
    }

    fn dial(&mut self, attempt: u32, now: Instant, status: Status) -> Vec<ConnectAction> {
        self.phase = ConnectPhase::Direct { attempt };
        self.deadline = Some(now + self.timeout);
        vec![ConnectAction::Status(status), ConnectAction::Dial { attempt }]
    }

    fn begin_join(&mut self) -> Vec<ConnectAction> {
        self.phase = ConnectPhase::Joining;
        let mut actions = vec![ConnectAction::Status(Status::Connected)];
        if !self.join_sent {
            self.join_sent = true;
            actions.push(ConnectAction::SendJoin);
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectMachine {
        ConnectMachine::new(&ConnectOptions::default())
    }

    fn count(actions: &[ConnectAction], wanted: &ConnectAction) -> usize {
        actions.iter().filter(|a| *a == wanted).count()
    }

    #[test]
    fn test_direct_success() {
        let mut m = machine();
        let t0 = Instant::now();

        let actions = m.handle(ConnectInput::Start(t0));
        assert_eq!(
            actions,
            vec![
                ConnectAction::Status(Status::Connecting),
                ConnectAction::Dial { attempt: 1 }
            ]
        );
        assert_eq!(m.deadline(), Some(t0 + Duration::from_millis(5500)));

        let actions = m.handle(ConnectInput::TransportOpened);
        assert_eq!(count(&actions, &ConnectAction::SendJoin), 1);
        assert_eq!(m.phase(), ConnectPhase::Joining);
        assert!(m.deadline().is_none());

        // A cleared guard never fires late.
        assert!(m.handle(ConnectInput::Tick(t0 + Duration::from_secs(60))).is_empty());

        m.handle(ConnectInput::JoinAccepted);
        assert!(m.is_joined());
    }

    #[test]
    fn test_tick_before_deadline_is_noop() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(ConnectInput::Start(t0));
        assert!(m.handle(ConnectInput::Tick(t0 + Duration::from_millis(5499))).is_empty());
        assert_eq!(m.phase(), ConnectPhase::Direct { attempt: 1 });
    }

    #[test]
    fn test_exactly_one_retry_before_reroute() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut all = m.handle(ConnectInput::Start(t0));

        let t1 = t0 + Duration::from_millis(5500);
        let actions = m.handle(ConnectInput::Tick(t1));
        assert_eq!(
            actions,
            vec![
                ConnectAction::AbandonDirect,
                ConnectAction::Status(Status::Retrying),
                ConnectAction::Dial { attempt: 2 }
            ]
        );
        all.extend(actions);
        assert_eq!(m.deadline(), Some(t1 + Duration::from_millis(5500)));

        let t2 = t1 + Duration::from_millis(5500);
        let actions = m.handle(ConnectInput::Tick(t2));
        assert_eq!(
            actions,
            vec![
                ConnectAction::AbandonDirect,
                ConnectAction::Status(Status::Rerouting),
                ConnectAction::RequestRoute
            ]
        );
        all.extend(actions);
        assert_eq!(m.phase(), ConnectPhase::Rerouting);
        assert!(m.deadline().is_none());

        // The fired guard does not re-fire.
        assert!(m.handle(ConnectInput::Tick(t2 + Duration::from_secs(60))).is_empty());

        let dials = all.iter().filter(|a| matches!(a, ConnectAction::Dial { .. })).count();
        assert_eq!(dials, 2);
        assert_eq!(count(&all, &ConnectAction::RequestRoute), 1);

        let actions = m.handle(ConnectInput::RouteOpened);
        assert_eq!(count(&actions, &ConnectAction::SendJoin), 1);
        assert_eq!(m.phase(), ConnectPhase::Joining);
    }

    #[test]
    fn test_join_sent_once_when_carriers_race() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(ConnectInput::Start(t0));
        let first = m.handle(ConnectInput::TransportOpened);
        let late_route = m.handle(ConnectInput::RouteOpened);
        let late_open = m.handle(ConnectInput::TransportOpened);

        assert_eq!(count(&first, &ConnectAction::SendJoin), 1);
        assert!(late_route.is_empty());
        assert!(late_open.is_empty());
    }

    #[test]
    fn test_join_rejected_is_terminal() {
        let mut m = machine();
        m.handle(ConnectInput::Start(Instant::now()));
        m.handle(ConnectInput::TransportOpened);
        let actions = m.handle(ConnectInput::JoinRejected);
        assert!(matches!(actions.as_slice(), [ConnectAction::Status(Status::Failed(_))]));
        assert_eq!(m.phase(), ConnectPhase::Failed);
        assert!(m.handle(ConnectInput::TransportClosed).is_empty());
    }

    #[test]
    fn test_route_unavailable_fails() {
        let mut m = ConnectMachine::new(&ConnectOptions {
            timeout_ms: 10,
            direct_attempts: 1,
        });
        let t0 = Instant::now();
        m.handle(ConnectInput::Start(t0));
        let actions = m.handle(ConnectInput::Tick(t0 + Duration::from_millis(10)));
        assert!(actions.contains(&ConnectAction::RequestRoute));

        m.handle(ConnectInput::RouteUnavailable);
        assert_eq!(m.phase(), ConnectPhase::Failed);
    }

    #[test]
    fn test_close_after_join_disconnects_and_restart_dials() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(ConnectInput::Start(t0));
        m.handle(ConnectInput::TransportOpened);
        m.handle(ConnectInput::JoinAccepted);

        let actions = m.handle(ConnectInput::TransportClosed);
        assert_eq!(actions, vec![ConnectAction::Status(Status::Disconnected)]);
        assert_eq!(m.phase(), ConnectPhase::Disconnected);

        let actions = m.handle(ConnectInput::Start(t0));
        assert!(actions.contains(&ConnectAction::Dial { attempt: 1 }));
        let actions = m.handle(ConnectInput::TransportOpened);
        assert_eq!(count(&actions, &ConnectAction::SendJoin), 1);
    }
}
