use std::fmt;

// -----------------------------------------------------------------------------
// ----- BrokerState -----------------------------------------------------------

/// Connectivity of the broker as a whole.
///
/// `Connecting -> Connected` needs both links up plus a liveness round-trip.
/// Any link failure moves to `Failed`. Leaving `Failed` is the caller's call:
/// it starts a new attempt, which puts us back in `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl BrokerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BrokerState::Disconnected => "disconnected",
            BrokerState::Connecting => "connecting",
            BrokerState::Connected => "connected",
            BrokerState::Failed => "failed",
        }
    }
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- LinkRole --------------------------------------------------------------

/// The broker keeps two links to the bus: one only publishes, the other only
/// subscribes and receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Publish,
    Subscribe,
}

impl LinkRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkRole::Publish => "publish",
            LinkRole::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- LinkStatus ------------------------------------------------------------

/// Pure state machine behind the broker. Every transition method reports
/// whether the caller has to act on it, so each side effect fires once.
#[derive(Debug, Clone, Copy)]
pub struct LinkStatus {
    state: BrokerState,
    publish_up: bool,
    subscribe_up: bool,
    liveness_pending: bool,
}

// -----------------------------------------------------------------------------
// ----- LinkStatus: Static ----------------------------------------------------

impl LinkStatus {
    pub fn new() -> Self {
        LinkStatus {
            state: BrokerState::Disconnected,
            publish_up: false,
            subscribe_up: false,
            liveness_pending: false,
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- LinkStatus: Public ----------------------------------------------------

impl LinkStatus {
    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn both_up(&self) -> bool {
        self.publish_up && self.subscribe_up
    }

    pub fn liveness_pending(&self) -> bool {
        self.liveness_pending
    }

    /// Start a new attempt. Allowed from `Disconnected` and `Failed` only.
    pub fn begin(&mut self) -> bool {
        if !matches!(self.state, BrokerState::Disconnected | BrokerState::Failed) {
            return false;
        }

        *self = LinkStatus {
            state: BrokerState::Connecting,
            ..LinkStatus::new()
        };
        true
    }

    /// Returns true exactly when this link completes the pair and the
    /// liveness probe must be sent.
    pub fn link_up(&mut self, role: LinkRole) -> bool {
        if self.state != BrokerState::Connecting {
            return false;
        }

        match role {
            LinkRole::Publish => self.publish_up = true,
            LinkRole::Subscribe => self.subscribe_up = true,
        }

        if self.both_up() && !self.liveness_pending {
            self.liveness_pending = true;
            return true;
        }

        false
    }

    /// Returns true when the probe reply moved us to `Connected`.
    pub fn liveness_confirmed(&mut self) -> bool {
        if self.state != BrokerState::Connecting || !self.both_up() || !self.liveness_pending {
            return false;
        }

        self.liveness_pending = false;
        self.state = BrokerState::Connected;
        true
    }

    /// Returns true on the first failure of an attempt; later failures of the
    /// same attempt are swallowed so the error is reported once.
    pub fn link_down(&mut self, role: LinkRole) -> bool {
        match role {
            LinkRole::Publish => self.publish_up = false,
            LinkRole::Subscribe => self.subscribe_up = false,
        }

        if self.both_up() {
            return false;
        }

        match self.state {
            BrokerState::Connecting | BrokerState::Connected => {
                self.state = BrokerState::Failed;
                self.liveness_pending = false;
                true
            }
            BrokerState::Disconnected | BrokerState::Failed => false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn connecting() -> LinkStatus {
        let mut status = LinkStatus::new();
        assert!(status.begin());
        status
    }

    #[test]
    fn starts_disconnected() {
        let status = LinkStatus::new();
        assert_eq!(status.state(), BrokerState::Disconnected);
        assert!(!status.both_up());
    }

    #[test]
    fn probe_only_after_both_links() {
        let mut status = connecting();
        assert!(!status.link_up(LinkRole::Subscribe));
        assert!(status.link_up(LinkRole::Publish));
        assert!(status.liveness_pending());

        // a duplicate "up" must not trigger a second probe
        assert!(!status.link_up(LinkRole::Publish));
    }

    #[test]
    fn connected_only_after_probe() {
        let mut status = connecting();
        assert!(!status.liveness_confirmed());

        status.link_up(LinkRole::Publish);
        status.link_up(LinkRole::Subscribe);
        assert_eq!(status.state(), BrokerState::Connecting);

        assert!(status.liveness_confirmed());
        assert_eq!(status.state(), BrokerState::Connected);
        assert!(!status.liveness_confirmed());
    }

    #[test]
    fn failure_is_reported_once() {
        let mut status = connecting();
        status.link_up(LinkRole::Publish);
        status.link_up(LinkRole::Subscribe);
        status.liveness_confirmed();

        assert!(status.link_down(LinkRole::Subscribe));
        assert_eq!(status.state(), BrokerState::Failed);
        assert!(!status.link_down(LinkRole::Publish));
        assert_eq!(status.state(), BrokerState::Failed);
    }

    #[test]
    fn failure_while_connecting() {
        let mut status = connecting();
        status.link_up(LinkRole::Publish);

        assert!(status.link_down(LinkRole::Publish));
        assert_eq!(status.state(), BrokerState::Failed);

        // stale "up" from the dead attempt is ignored
        assert!(!status.link_up(LinkRole::Subscribe));
    }

    #[test]
    fn begin_only_from_idle_states() {
        let mut status = connecting();
        assert!(!status.begin());

        status.link_down(LinkRole::Publish);
        assert!(status.begin());
        assert_eq!(status.state(), BrokerState::Connecting);
        assert!(!status.both_up());
    }

    #[test]
    fn down_while_disconnected_is_silent() {
        let mut status = LinkStatus::new();
        assert!(!status.link_down(LinkRole::Publish));
        assert_eq!(status.state(), BrokerState::Disconnected);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
