/// Which side issues the initial offer. Fixed at session creation by
/// join order and kept across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Negotiation lifecycle of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    NeedsOffer,
    Offered,
    Stable,
    Recovering,
    Closed,
}

impl NegotiationState {
    /// May this side put a fresh local offer on the wire right now?
    /// Responders wait for the initial exchange; both sides renegotiate
    /// freely from `Stable`.
    pub fn can_offer(&self, role: Role) -> bool {
        match self {
            NegotiationState::Stable | NegotiationState::NeedsOffer => true,
            NegotiationState::New => role == Role::Initiator,
            _ => false,
        }
    }

    /// A remote offer landing in this state means glare: both sides
    /// have pending local changes. The responder resolves it by rolling
    /// back; the initiator ignores the remote offer and lets its own
    /// stand.
    pub fn offer_is_glare(&self) -> bool {
        matches!(self, NegotiationState::NeedsOffer | NegotiationState::Offered)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Recovering | NegotiationState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_initiator_offers_from_new() {
        assert!(NegotiationState::New.can_offer(Role::Initiator));
        assert!(!NegotiationState::New.can_offer(Role::Responder));
    }

    #[test]
    fn both_sides_renegotiate_from_stable() {
        assert!(NegotiationState::Stable.can_offer(Role::Initiator));
        assert!(NegotiationState::Stable.can_offer(Role::Responder));
    }

    #[test]
    fn no_offers_while_waiting_or_done() {
        for state in [
            NegotiationState::Offered,
            NegotiationState::Recovering,
            NegotiationState::Closed,
        ] {
            assert!(!state.can_offer(Role::Initiator), "{state:?}");
            assert!(!state.can_offer(Role::Responder), "{state:?}");
        }
    }

    #[test]
    fn glare_is_pending_local_negotiation() {
        assert!(NegotiationState::Offered.offer_is_glare());
        assert!(NegotiationState::NeedsOffer.offer_is_glare());
        assert!(!NegotiationState::Stable.offer_is_glare());
        assert!(!NegotiationState::New.offer_is_glare());
    }
}
