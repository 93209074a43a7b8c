//! Abort signals.
//!
//! Wraps `tokio-util`'s `CancellationToken` with a reason slot so user
//! aborts, dedupe cancellations and timeouts stay distinguishable when
//! the error path classifies them. `combine_signals` folds any number of
//! signals into one surface that aborts with the first aborter's reason.

use crate::error::{AbortKind, CallError};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Why a signal aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Aborted { message: String, kind: AbortKind },
    Timeout { ms: u64 },
}

impl AbortReason {
    pub fn user(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
            kind: AbortKind::User,
        }
    }

    pub(crate) fn dedupe(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
            kind: AbortKind::Dedupe,
        }
    }

    pub fn into_error(self) -> CallError {
        match self {
            Self::Aborted { message, kind } => CallError::Abort { message, kind },
            Self::Timeout { ms } => CallError::Timeout { ms },
        }
    }
}

// Keeps the combine watcher alive exactly as long as some clone of the
// combined signal exists.
#[derive(Debug)]
struct WatchGuard {
    stop: CancellationToken,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// An abort surface observed by the pipeline.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
    _watch: Option<Arc<WatchGuard>>,
}

impl AbortSignal {
    fn fresh() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            _watch: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().cloned()
    }

    /// Resolves when the signal aborts.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn abort_with(&self, reason: AbortReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// The error this abort classifies to.
    pub fn abort_error(&self) -> CallError {
        self.reason()
            .map(AbortReason::into_error)
            .unwrap_or(CallError::Abort {
                message: "The operation was aborted".into(),
                kind: AbortKind::User,
            })
    }

    /// Re-check on wake at a suspension point: errors out promptly if a
    /// late abort arrived during a hook, validator or parse.
    pub(crate) fn check(&self) -> Result<(), CallError> {
        if self.is_aborted() {
            Err(self.abort_error())
        } else {
            Ok(())
        }
    }
}

/// A handle that can abort its signal, mirroring the web
/// `AbortController` shape the host fetch contract assumes.
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::fresh(),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self, reason: AbortReason) {
        self.signal.abort_with(reason);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Combine signals into one that aborts with the reason of the first
/// aborting input. Absent inputs are filtered; a pre-aborted input
/// yields an immediately-aborted output without spawning a watcher.
pub fn combine_signals<I>(signals: I) -> AbortSignal
where
    I: IntoIterator<Item = Option<AbortSignal>>,
{
    let inputs: Vec<AbortSignal> = signals.into_iter().flatten().collect();

    for input in &inputs {
        if input.is_aborted() {
            let out = AbortSignal::fresh();
            if let Some(reason) = input.reason() {
                let _ = out.reason.set(reason);
            }
            out.token.cancel();
            return out;
        }
    }

    let mut out = AbortSignal::fresh();
    if inputs.is_empty() {
        return out;
    }

    let stop = CancellationToken::new();
    let guard = Arc::new(WatchGuard { stop: stop.clone() });
    out._watch = Some(guard);

    let out_token = out.token.clone();
    let out_reason = Arc::clone(&out.reason);
    tokio::spawn(async move {
        let waiters = inputs.iter().map(|s| {
            let token = s.token.clone();
            Box::pin(async move {
                token.cancelled().await;
            })
        });
        tokio::select! {
            _ = stop.cancelled() => {}
            (_, index, _) = futures::future::select_all(waiters) => {
                if let Some(reason) = inputs[index].reason() {
                    let _ = out_reason.set(reason);
                }
                out_token.cancel();
            }
        }
    });

    out
}

/// A signal that aborts with a timeout reason after `ms` milliseconds.
/// `None` means no timeout.
pub fn timeout_signal(ms: Option<u64>) -> Option<AbortSignal> {
    let ms = ms?;
    let signal = AbortSignal::fresh();
    let token = signal.token.clone();
    let reason = Arc::clone(&signal.reason);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        let _ = reason.set(AbortReason::Timeout { ms });
        token.cancel();
    });
    Some(signal)
}
