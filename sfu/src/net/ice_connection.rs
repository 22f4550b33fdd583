use crate::error::{Error, Result};
use ice::agent::Agent;
use ice::candidate::Candidate;
use ice::connection_state::ConnectionState as IceAgentState;
use shared::TransportMessage;
use std::collections::VecDeque;

/// Per-component ICE state, rolled up by conjunction into the overall
/// [`IceConnectionState`] (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    New,
    Checking,
    Ready,
    Failed,
}

impl From<IceAgentState> for ComponentState {
    fn from(s: IceAgentState) -> Self {
        match s {
            IceAgentState::New | IceAgentState::Unspecified => ComponentState::New,
            IceAgentState::Checking => ComponentState::Checking,
            IceAgentState::Connected | IceAgentState::Completed => ComponentState::Ready,
            IceAgentState::Disconnected | IceAgentState::Failed | IceAgentState::Closed => {
                ComponentState::Failed
            }
        }
    }
}

/// Overall connection state (§3 `IceConnection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    Initial,
    CandidatesReceived,
    Ready,
    Finished,
    Failed,
}

/// Events posted back to the owning worker (§4.2 listener callbacks).
pub enum IceConnectionEvent {
    OnCandidate(Box<dyn Candidate>),
    OnPacketReceived(bytes::BytesMut),
    UpdateIceState(IceConnectionState),
}

/// Wraps one `ice::Agent`, translating its single-component view into the
/// SFU's rollup state machine and the holdoff rule for FAILED (§4.2,
/// §8 property via S6): a component FAILED observed before the last
/// remote candidate has arrived, or before the connection ever reached
/// READY, is logged and withheld rather than propagated.
pub struct IceConnection {
    agent: Agent,
    state: IceConnectionState,
    component_state: ComponentState,
    received_last_candidate: bool,
    is_bundle: bool,
    events: VecDeque<IceConnectionEvent>,
}

impl IceConnection {
    pub fn new(agent: Agent, is_bundle: bool) -> Self {
        IceConnection {
            agent,
            state: IceConnectionState::Initial,
            component_state: ComponentState::New,
            received_last_candidate: false,
            is_bundle,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> IceConnectionState {
        self.state
    }

    /// `setRemoteCandidates(list, is_bundle)`: candidates whose
    /// `component_id != 1` are skipped while bundled; IPv6 candidates are
    /// dropped outright (§4.2, §9 open question — dual stack unspecified).
    pub fn set_remote_candidates(&mut self, candidates: Vec<Box<dyn Candidate>>) -> Result<()> {
        for candidate in candidates {
            if self.is_bundle && candidate.component() != 1 {
                continue;
            }
            if candidate.addr().ip().is_ipv6() {
                log::debug!("IceConnection: dropping IPv6 candidate {}", candidate.address());
                continue;
            }
            self.agent.add_remote_candidate(candidate)?;
        }
        self.state = IceConnectionState::CandidatesReceived;
        Ok(())
    }

    pub fn receive_last_candidate(&mut self) {
        self.received_last_candidate = true;
        if self.component_state == ComponentState::Failed {
            self.fail();
        }
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) -> Result<()> {
        self.agent.set_remote_credentials(ufrag, pwd)?;
        Ok(())
    }

    /// `sendData(component_id, buf, len)`: only valid once READY; writes
    /// directly on the selected candidate pair and returns bytes sent or
    /// an error (the spec's `-1` is modeled as `Err` here).
    pub fn send_data(&mut self, component_id: u16, buf: &[u8]) -> Result<usize> {
        if self.state != IceConnectionState::Ready {
            return Err(Error::IceSendFailed(component_id));
        }
        match self.agent.get_selected_candidate_pair() {
            Some((mut local, remote)) if local.component() == component_id => {
                Ok(local.write_to(buf, remote.as_ref())?)
            }
            _ => Err(Error::IceSendFailed(component_id)),
        }
    }

    /// Drives inbound bytes through the agent if they are STUN traffic
    /// (first byte in [0,3], RFC7983), otherwise queues them as
    /// `OnPacketReceived` for the `DtlsTransport` layered above -- the ICE
    /// library itself never sees DTLS/SRTP bytes.
    pub fn handle_inbound(&mut self, packet: bytes::BytesMut) -> Result<()> {
        if packet.first().is_some_and(|b| *b <= 3) {
            self.agent.read(TransportMessage {
                now: std::time::Instant::now(),
                transport: Default::default(),
                message: packet,
            })?;
            self.drain_agent_events();
        } else {
            self.events
                .push_back(IceConnectionEvent::OnPacketReceived(packet));
        }
        Ok(())
    }

    fn drain_agent_events(&mut self) {
        let reported = self.agent.state();
        let new_component_state = ComponentState::from(reported);
        self.apply_component_state(new_component_state);
    }

    /// Applies an observed component-state transition, including the
    /// FAILED holdoff rule (§4.2, S6). Split out from `drain_agent_events`
    /// so the rollup logic is one real, directly testable method rather
    /// than something only ever reachable through a live `ice::Agent`.
    fn apply_component_state(&mut self, new_component_state: ComponentState) {
        if new_component_state == self.component_state {
            return;
        }
        self.component_state = new_component_state;
        match new_component_state {
            ComponentState::Ready => {
                self.state = IceConnectionState::Ready;
                self.events
                    .push_back(IceConnectionEvent::UpdateIceState(self.state));
            }
            ComponentState::Failed => {
                let after_ready = self.state == IceConnectionState::Ready;
                if self.received_last_candidate || after_ready {
                    self.fail();
                } else {
                    log::debug!(
                        "IceConnection: component FAILED withheld, last candidate not yet received"
                    );
                }
            }
            _ => {}
        }
    }

    fn fail(&mut self) {
        self.state = IceConnectionState::Failed;
        self.events
            .push_back(IceConnectionEvent::UpdateIceState(self.state));
    }

    pub fn poll_event(&mut self) -> Option<IceConnectionEvent> {
        self.events.pop_front()
    }

    pub fn close(&mut self) {
        self.state = IceConnectionState::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ice::agent::agent_config::AgentConfig;
    use std::sync::Arc;

    fn new_connection() -> IceConnection {
        let agent = Agent::new(Arc::new(AgentConfig::default())).expect("default agent config");
        IceConnection::new(agent, false)
    }

    #[test]
    fn failed_before_last_candidate_is_withheld() {
        let mut conn = new_connection();

        conn.apply_component_state(ComponentState::Failed);
        assert_ne!(conn.state(), IceConnectionState::Failed);
        assert!(conn.poll_event().is_none());

        conn.receive_last_candidate();
        assert_eq!(conn.state(), IceConnectionState::Failed);
        assert!(matches!(
            conn.poll_event(),
            Some(IceConnectionEvent::UpdateIceState(IceConnectionState::Failed))
        ));
    }

    #[test]
    fn failed_after_ready_surfaces_immediately() {
        let mut conn = new_connection();

        conn.apply_component_state(ComponentState::Ready);
        assert_eq!(conn.state(), IceConnectionState::Ready);
        assert!(matches!(
            conn.poll_event(),
            Some(IceConnectionEvent::UpdateIceState(IceConnectionState::Ready))
        ));

        conn.apply_component_state(ComponentState::Failed);
        assert_eq!(conn.state(), IceConnectionState::Failed);
    }
}
