//! SUBACK bookkeeping.
//!
//! `rumqttc` does not hand back the packet id of a queued SUBSCRIBE, so acks
//! are matched to requests in the order the requests were queued. The same
//! book remembers every granted filter so the poller can subscribe again
//! after the broker dropped a clean session.

use std::collections::VecDeque;

use tokio::sync::oneshot;

enum PendingAck {
    /// A `subscribe` call waiting for the broker's verdict.
    Caller {
        filter: String,
        granted: oneshot::Sender<bool>,
    },
    /// A filter re-issued by the poller after a reconnect.
    Replay(String),
}

/// What an incoming SUBACK resolved.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    Caller,
    Replayed(String),
    ReplayRefused(String),
    Unexpected,
}

#[derive(Default)]
pub(crate) struct Subscriptions {
    active: Vec<String>,
    pending: VecDeque<PendingAck>,
}

impl Subscriptions {
    /// Queue a caller waiting on the next unclaimed SUBACK.
    pub(crate) fn expect_ack(&mut self, filter: &str, granted: oneshot::Sender<bool>) {
        self.pending.push_back(PendingAck::Caller {
            filter: filter.to_string(),
            granted,
        });
    }

    /// Withdraw the latest caller entry for `filter` whose SUBSCRIBE never
    /// left the client.
    pub(crate) fn cancel(&mut self, filter: &str) {
        let last = self
            .pending
            .iter()
            .rposition(|p| matches!(p, PendingAck::Caller { filter: f, .. } if f == filter));
        if let Some(i) = last {
            self.pending.remove(i);
        }
    }

    pub(crate) fn expect_replay(&mut self, filter: &str) {
        self.pending.push_back(PendingAck::Replay(filter.to_string()));
    }

    pub(crate) fn forget_replay(&mut self, filter: &str) {
        let last = self
            .pending
            .iter()
            .rposition(|p| matches!(p, PendingAck::Replay(f) if f == filter));
        if let Some(i) = last {
            self.pending.remove(i);
        }
    }

    /// Resolve the oldest pending request. A filter only becomes active when
    /// the broker granted it and its caller is still waiting.
    pub(crate) fn acknowledge(&mut self, granted: bool) -> AckOutcome {
        match self.pending.pop_front() {
            Some(PendingAck::Caller {
                filter,
                granted: tx,
            }) => {
                let waiting = tx.send(granted).is_ok();
                if waiting && granted && !self.active.contains(&filter) {
                    self.active.push(filter);
                }
                AckOutcome::Caller
            }
            Some(PendingAck::Replay(filter)) if granted => AckOutcome::Replayed(filter),
            Some(PendingAck::Replay(filter)) => AckOutcome::ReplayRefused(filter),
            None => AckOutcome::Unexpected,
        }
    }

    /// The session is new: acks for requests sent on the old connection will
    /// never come. Waiting callers see their channel close. Returns the
    /// filters to subscribe again.
    pub(crate) fn reconnected(&mut self) -> Vec<String> {
        self.pending.clear();
        self.active.clone()
    }

    pub(crate) fn reset(&mut self) {
        self.active.clear();
        self.pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> &[String] {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_ack_resolves_caller_and_records_filter() {
        let mut book = Subscriptions::default();
        let (tx, mut rx) = oneshot::channel();
        book.expect_ack("home/+/temp", tx);

        assert_eq!(book.acknowledge(true), AckOutcome::Caller);
        assert_eq!(rx.try_recv(), Ok(true));
        assert_eq!(book.active(), ["home/+/temp"]);
    }

    #[test]
    fn refused_ack_is_reported_and_not_recorded() {
        let mut book = Subscriptions::default();
        let (tx, mut rx) = oneshot::channel();
        book.expect_ack("secret/#", tx);

        book.acknowledge(false);
        assert_eq!(rx.try_recv(), Ok(false));
        assert!(book.active().is_empty());
    }

    #[test]
    fn acks_are_matched_in_request_order() {
        let mut book = Subscriptions::default();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        book.expect_ack("a", tx_a);
        book.expect_ack("b", tx_b);

        book.acknowledge(true);
        book.acknowledge(false);

        assert_eq!(rx_a.try_recv(), Ok(true));
        assert_eq!(rx_b.try_recv(), Ok(false));
        assert_eq!(book.active(), ["a"]);
    }

    #[test]
    fn cancelled_request_does_not_claim_an_ack() {
        let mut book = Subscriptions::default();
        let (tx_a, _rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        book.expect_ack("a", tx_a);
        book.cancel("a");
        book.expect_ack("b", tx_b);

        book.acknowledge(true);
        assert_eq!(rx_b.try_recv(), Ok(true));
        assert_eq!(book.active(), ["b"]);
    }

    #[test]
    fn abandoned_caller_does_not_activate_filter() {
        let mut book = Subscriptions::default();
        let (tx, rx) = oneshot::channel();
        book.expect_ack("a", tx);
        drop(rx);

        assert_eq!(book.acknowledge(true), AckOutcome::Caller);
        assert!(book.active().is_empty());
    }

    #[test]
    fn reconnect_returns_active_filters_and_fails_waiting_callers() {
        let mut book = Subscriptions::default();
        let (tx_a, _rx_a) = oneshot::channel();
        book.expect_ack("a", tx_a);
        book.acknowledge(true);
        let (tx_b, mut rx_b) = oneshot::channel();
        book.expect_ack("b", tx_b);

        assert_eq!(book.reconnected(), vec!["a"]);
        assert!(rx_b.try_recv().is_err());

        book.expect_replay("a");
        assert_eq!(book.acknowledge(true), AckOutcome::Replayed("a".into()));
        assert_eq!(book.acknowledge(true), AckOutcome::Unexpected);
    }

    #[test]
    fn refused_replay_is_reported() {
        let mut book = Subscriptions::default();
        book.expect_replay("a");
        book.expect_replay("b");
        book.forget_replay("a");

        assert_eq!(book.acknowledge(false), AckOutcome::ReplayRefused("b".into()));
    }
}
