// ============================================================================
// Connection Lifecycle
// ============================================================================
//
// State Pattern for the substrate connection owned by a State:
//
//   Unopened ──ready──> Opening ──> Opened
//                                     │ ▲
//                            ensure   │ │ stores created
//                                     ▼ │
//                                   Upgrading
//
//   Opened ──suspend──> Suspending ──> Suspended ──resume──> Resuming ──> Opened
//
//   any ──close──> Closing ──> Closed
//
// ============================================================================

/// Phase of the substrate connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Unopened,
    Opening,
    Opened,
    Upgrading,
    Suspending,
    Suspended,
    Resuming,
    Closing,
    Closed,
}

impl Phase {
    /// Operations may start a substrate transaction right away
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Phase::Opened)
    }

    /// Operations issued now are queued until the phase settles
    pub fn queues_operations(&self) -> bool {
        matches!(
            self,
            Phase::Opening
                | Phase::Upgrading
                | Phase::Suspending
                | Phase::Suspended
                | Phase::Resuming
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Closing | Phase::Closed)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Phase::Suspending | Phase::Suspended | Phase::Resuming)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Unopened => write!(f, "UNOPENED"),
            Phase::Opening => write!(f, "OPENING"),
            Phase::Opened => write!(f, "OPENED"),
            Phase::Upgrading => write!(f, "UPGRADING"),
            Phase::Suspending => write!(f, "SUSPENDING"),
            Phase::Suspended => write!(f, "SUSPENDED"),
            Phase::Resuming => write!(f, "RESUMING"),
            Phase::Closing => write!(f, "CLOSING"),
            Phase::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Lifecycle notifications fanned out to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Opened { version: u32 },
    Upgraded { version: u32, created: Vec<String> },
    Suspended,
    Resumed,
    Closed,
}
