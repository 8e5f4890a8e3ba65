use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Returned by [`CancellationToken::check`] once the token is cancelled.
///
/// Travels inside `anyhow::Error` and is recognised with [`is_cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// One-shot cooperative cancellation flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Checks an optional token; `None` never cancels.
pub fn check(token: Option<&CancellationToken>) -> Result<(), Cancelled> {
    match token {
        Some(token) => token.check(),
        None => Ok(()),
    }
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn cancellation_is_shared_and_sticky() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert_eq!(token.check(), Err(Cancelled));
        assert_eq!(token.check(), Err(Cancelled));
        assert!(check(None).is_ok());
    }

    #[test]
    fn cancelled_is_found_through_context() {
        let err = Err::<(), _>(Cancelled)
            .context("download package")
            .unwrap_err();
        assert!(is_cancelled(&err));
        assert!(!is_cancelled(&anyhow::anyhow!("network down")));
    }
}
