use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The verification query ran; `tables` is its result (possibly empty).
    Success { tables: Vec<String> },
    WrongKeyOrConfig,
    Timeout,
    IoError { message: String },
    Unencrypted,
    /// The search stopped while the attempt was in flight.
    Cancelled,
}

impl TrialOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::WrongKeyOrConfig => "wrong_key_or_config",
            Self::Timeout => "timeout",
            Self::IoError { .. } => "io_error",
            Self::Unencrypted => "unencrypted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cooperative cancellation flag. A child token observes its parents, so
/// cancelling a search cancels every attempt token derived from it, while
/// cancelling one attempt leaves the search running.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_observes_parent_but_not_siblings() {
        let root = CancelToken::new();
        let a = root.child();
        let b = root.child();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!root.is_cancelled());

        root.cancel();
        assert!(b.is_cancelled());
        assert!(b.child().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_string(&TrialOutcome::Success {
            tables: vec!["t".into()],
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"success","tables":["t"]}"#);
        assert_eq!(
            serde_json::to_string(&TrialOutcome::Timeout).unwrap(),
            r#"{"kind":"timeout"}"#
        );
    }
}
