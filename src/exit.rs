use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::actor::ActorRef;

/// Why an actor terminated.
///
/// The reason `"normal"` is special: it marks a graceful exit and does not
/// take linked peers down with it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExitReason {
    #[error("normal")]
    Normal,
    #[error("{0}")]
    Abnormal(Arc<str>),
}

impl ExitReason {
    pub fn abnormal(reason: impl Into<String>) -> ExitReason {
        ExitReason::Abnormal(reason.into().into())
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl From<&str> for ExitReason {
    fn from(reason: &str) -> ExitReason {
        if reason == "normal" {
            ExitReason::Normal
        } else {
            ExitReason::Abnormal(reason.into())
        }
    }
}

impl From<String> for ExitReason {
    fn from(reason: String) -> ExitReason {
        ExitReason::from(reason.as_str())
    }
}

impl From<anyhow::Error> for ExitReason {
    fn from(err: anyhow::Error) -> ExitReason {
        ExitReason::Abnormal(err.to_string().into())
    }
}

/// The message a trapping actor receives when a linked peer terminates.
///
/// Only peers whose trap-exit flag is set see this value; for everyone else
/// an abnormal exit of a linked actor is not a message but a termination.
#[derive(Debug, Clone)]
pub struct Exit {
    pub from: ActorRef,
    pub reason: ExitReason,
}

/// Failure of a synchronous [`ActorRef::ask`].
#[derive(Debug, Error)]
pub enum AskError {
    /// The receiver terminated, or consumed the request without replying.
    #[error("request dropped without a reply")]
    Unanswered,
    /// No reply arrived within the deadline given to `ask_within`.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_string_maps_to_normal() {
        assert_eq!(ExitReason::from("normal"), ExitReason::Normal);
        assert!(ExitReason::from("normal").is_normal());
        assert!(!ExitReason::from("boom").is_normal());
    }

    #[test]
    fn anyhow_errors_become_abnormal_reasons() {
        let reason = ExitReason::from(anyhow::anyhow!("disk gone"));
        assert_eq!(reason, ExitReason::abnormal("disk gone"));
    }
}
