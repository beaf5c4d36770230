//! Session lifecycle.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Uninitialized -> Loading -> Ready`, and `Disposed` from any of them.
/// `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Disposed,
}

impl SessionStatus {
    pub fn is_disposed(self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Uninitialized | Ready, Loading) => true,
            (Loading, Ready | Uninitialized) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}
