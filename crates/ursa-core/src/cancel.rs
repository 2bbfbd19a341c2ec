//! Cooperative cancellation for long-running loads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{UrsaError, UrsaResult};

/// Process-wide "cancel requested" flag.
///
/// The engine consults the token at the top of every record-processing
/// iteration; when set, the current top-level operation (one scanner pass or
/// one expansion) is abandoned and everything it allocated is released as a
/// unit. Clone handles freely: all clones share one flag.
///
/// ## Example
///
/// ```rust
/// use ursa_core::cancel::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken
{
    flag: Arc<AtomicBool>,
}

impl CancelToken
{
    /// Create a token with the flag clear.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Request cancellation of the operation currently in progress.
    pub fn cancel(&self)
    {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Clear the flag so future operations can run.
    pub fn reset(&self)
    {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool
    {
        self.flag.load(Ordering::Relaxed)
    }

    /// Checkpoint: error out if cancellation has been requested.
    ///
    /// ## Errors
    ///
    /// Returns [`UrsaError::Cancelled`] when the flag is set.
    pub fn check(&self) -> UrsaResult<()>
    {
        if self.is_cancelled() {
            Err(UrsaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
