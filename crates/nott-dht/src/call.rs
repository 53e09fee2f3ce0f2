//! Request/response transactions
//!
//! A `Call` walks `Unsent -> Sent -> {Responded, Error, Stalled}` and never
//! leaves a terminal state. The state lives in an atomic so the lookup
//! driver can poll it while the receive path resolves the call.

use nott_protocol::{Message, NodeId, Query, Reply, RequestKind, TransactionId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unsent = 0,
    Sent = 1,
    Responded = 2,
    Error = 3,
    Stalled = 4,
}

impl CallState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Unsent,
            1 => CallState::Sent,
            2 => CallState::Responded,
            3 => CallState::Error,
            _ => CallState::Stalled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Responded | CallState::Error | CallState::Stalled
        )
    }
}

pub struct Call {
    query: Query,
    destination: SocketAddr,
    expected_id: Option<NodeId>,
    state: AtomicU8,
    sent_at: OnceLock<Instant>,
    response: OnceLock<Message>,
    socket_mismatch: AtomicBool,
    owner: Arc<Notify>,
}

impl Call {
    /// `expected_id` is `None` for blind probes where only the address is known.
    /// `owner` is notified whenever the call reaches a terminal state.
    pub fn new(
        query: Query,
        destination: SocketAddr,
        expected_id: Option<NodeId>,
        owner: Arc<Notify>,
    ) -> Self {
        Call {
            query,
            destination,
            expected_id,
            state: AtomicU8::new(CallState::Unsent as u8),
            sent_at: OnceLock::new(),
            response: OnceLock::new(),
            socket_mismatch: AtomicBool::new(false),
            owner,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn tid(&self) -> &TransactionId {
        &self.query.tid
    }

    pub fn kind(&self) -> RequestKind {
        self.query.request.kind()
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn expected_id(&self) -> Option<&NodeId> {
        self.expected_id.as_ref()
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at.get().copied()
    }

    /// Time since the request went out, if it did
    pub fn elapsed(&self) -> Option<Duration> {
        self.sent_at().map(|at| at.elapsed())
    }

    pub fn response(&self) -> Option<&Message> {
        self.response.get()
    }

    /// The reply, if the call was answered with one
    pub fn reply(&self) -> Option<&Reply> {
        match self.response.get() {
            Some(Message::Response(reply)) => Some(reply),
            _ => None,
        }
    }

    /// Mark the request as handed to the transport
    pub fn has_send(&self) -> bool {
        let _ = self.sent_at.set(Instant::now());
        self.transition(CallState::Unsent, CallState::Sent)
    }

    /// Deliver a reply or error. Only the first delivery to a sent call
    /// counts; duplicates and late arrivals are discarded.
    pub fn deliver(&self, msg: Message) -> bool {
        let next = match &msg {
            Message::Response(_) => CallState::Responded,
            Message::Error(_) => CallState::Error,
            Message::Query(_) => return false,
        };
        if self.state() != CallState::Sent || self.response.set(msg).is_err() {
            return false;
        }
        self.transition(CallState::Sent, next)
    }

    /// Abandon the call, e.g. after a send failure or a timeout
    pub fn inject_stall(&self) -> bool {
        self.terminate(CallState::Stalled)
    }

    pub fn inject_error(&self) -> bool {
        self.terminate(CallState::Error)
    }

    pub fn set_socket_mismatch(&self) {
        self.socket_mismatch.store(true, Ordering::Release);
    }

    pub fn has_socket_mismatch(&self) -> bool {
        self.socket_mismatch.load(Ordering::Acquire)
    }

    /// Whether the reply came from the node we meant to ask
    pub fn matches_expected_id(&self) -> bool {
        match (self.reply(), &self.expected_id) {
            (Some(reply), Some(expected)) => reply.id == *expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn transition(&self, from: CallState, to: CallState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved && to.is_terminal() {
            self.owner.notify_one();
        }
        moved
    }

    fn terminate(&self, to: CallState) -> bool {
        let moved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if CallState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(to as u8)
                }
            })
            .is_ok();
        if moved {
            self.owner.notify_one();
        }
        moved
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("tid", self.tid())
            .field("kind", &self.kind())
            .field("destination", &self.destination)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nott_protocol::{ErrorCode, ErrorMessage, Request, Response};

    fn create_test_call(expected: Option<NodeId>) -> Call {
        let query = Query {
            tid: TransactionId::random(),
            id: NodeId::random(),
            read_only: false,
            request: Request::Ping,
        };
        Call::new(
            query,
            "10.0.0.1:6881".parse().unwrap(),
            expected,
            Arc::new(Notify::new()),
        )
    }

    fn reply_from(call: &Call, id: NodeId) -> Message {
        Message::Response(Reply {
            tid: *call.tid(),
            id,
            ip: None,
            response: Response::Ping,
        })
    }

    #[test]
    fn test_happy_path() {
        let expected = NodeId::random();
        let call = create_test_call(Some(expected));
        assert_eq!(call.state(), CallState::Unsent);
        assert!(call.sent_at().is_none());

        assert!(call.has_send());
        assert_eq!(call.state(), CallState::Sent);
        assert!(call.sent_at().is_some());

        assert!(call.deliver(reply_from(&call, expected)));
        assert_eq!(call.state(), CallState::Responded);
        assert!(call.matches_expected_id());
    }

    #[test]
    fn test_unsent_call_ignores_replies() {
        let call = create_test_call(None);
        assert!(!call.deliver(reply_from(&call, NodeId::random())));
        assert_eq!(call.state(), CallState::Unsent);
        assert!(call.response().is_none());
    }

    #[test]
    fn test_duplicate_delivery_discarded() {
        let expected = NodeId::random();
        let call = create_test_call(Some(expected));
        call.has_send();

        assert!(call.deliver(reply_from(&call, expected)));
        assert!(!call.deliver(reply_from(&call, NodeId::random())));
        assert_eq!(call.reply().unwrap().id, expected);
        assert_eq!(call.state(), CallState::Responded);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let call = create_test_call(None);
        call.has_send();
        assert!(call.inject_stall());
        assert_eq!(call.state(), CallState::Stalled);

        assert!(!call.deliver(reply_from(&call, NodeId::random())));
        assert!(!call.inject_error());
        assert!(!call.has_send());
        assert_eq!(call.state(), CallState::Stalled);
    }

    #[test]
    fn test_error_reply() {
        let call = create_test_call(Some(NodeId::random()));
        call.has_send();
        let error = Message::Error(ErrorMessage {
            tid: *call.tid(),
            code: ErrorCode::Protocol,
            message: "Invalid Token".to_string(),
        });
        assert!(call.deliver(error));
        assert_eq!(call.state(), CallState::Error);
        assert!(!call.matches_expected_id());
        assert!(call.reply().is_none());
    }

    #[test]
    fn test_expected_id_mismatch() {
        let call = create_test_call(Some(NodeId::random()));
        call.has_send();
        call.deliver(reply_from(&call, NodeId::random()));
        assert_eq!(call.state(), CallState::Responded);
        assert!(!call.matches_expected_id());
    }

    #[test]
    fn test_blind_probe_matches_any_responder() {
        let call = create_test_call(None);
        call.has_send();
        call.deliver(reply_from(&call, NodeId::random()));
        assert!(call.matches_expected_id());
    }

    #[test]
    fn test_stall_before_send() {
        let call = create_test_call(None);
        assert!(call.inject_stall());
        assert!(!call.has_send());
        assert_eq!(call.state(), CallState::Stalled);
    }

    #[tokio::test]
    async fn test_owner_notified_on_terminal_state() {
        let owner = Arc::new(Notify::new());
        let query = Query {
            tid: TransactionId::random(),
            id: NodeId::random(),
            read_only: false,
            request: Request::Ping,
        };
        let call = Call::new(query, "10.0.0.1:6881".parse().unwrap(), None, owner.clone());
        call.has_send();
        call.inject_error();

        // the permit is stored even though nobody was waiting yet
        tokio::time::timeout(Duration::from_millis(100), owner.notified())
            .await
            .unwrap();
    }
}
