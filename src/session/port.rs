//! Port allocation: deterministic sequential probing of `P0..P0+N-1`.
//!
//! The backend itself binds the port (it is handed a candidate and may
//! refuse it), so "busy" isn't detected by a pre-check on our side — it's
//! detected from the backend's own boot failure, per spec section 4.E.

use crate::error::{HostError, HostResult};

/// Outcome of one attempt to start the backend on a given port.
pub enum PortAttempt<T> {
    /// The backend is up and bound to this port.
    Bound(T),
    /// The backend's boot failure looked like "this port is already in use".
    Busy,
    /// Any other boot failure, fatal for the whole probe.
    Fatal(HostError),
}

/// Detects whether a boot error message/cause looks like a busy port, per
/// spec section 4.E's "the backend's boot error (its message or cause
/// mentions `port`)".
pub fn looks_like_port_busy(message: &str) -> bool {
    message.to_ascii_lowercase().contains("port")
}

/// Tries `base..base+window` in order, calling `attempt` for each candidate
/// port. Stops at the first success; `Busy` advances to the next candidate;
/// `Fatal` aborts immediately. `PortsExhausted` if every candidate is busy.
pub async fn probe<T, F, Fut>(base: u16, window: u16, mut attempt: F) -> HostResult<T>
where
    F: FnMut(u16) -> Fut,
    Fut: std::future::Future<Output = PortAttempt<T>>,
{
    let mut tried = 0u16;
    for offset in 0..window {
        let port = base.checked_add(offset).ok_or(HostError::PortsExhausted {
            base,
            tried: window,
        })?;
        tried += 1;
        match attempt(port).await {
            PortAttempt::Bound(value) => return Ok(value),
            PortAttempt::Busy => continue,
            PortAttempt::Fatal(err) => return Err(err),
        }
    }
    Err(HostError::PortsExhausted { base, tried })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_returns_first_success() {
        let result = probe(3420, 30, |port| async move {
            if port == 3422 {
                PortAttempt::Bound(port)
            } else {
                PortAttempt::Busy
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3422);
    }

    #[tokio::test]
    async fn probe_exhausts_after_window() {
        let err = probe(3420, 30, |_port| async move { PortAttempt::<u16>::Busy })
            .await
            .unwrap_err();
        match err {
            HostError::PortsExhausted { base, tried } => {
                assert_eq!(base, 3420);
                assert_eq!(tried, 30);
            }
            _ => panic!("expected PortsExhausted"),
        }
    }

    #[tokio::test]
    async fn probe_propagates_fatal_error_immediately() {
        let mut calls = 0;
        let err = probe(3420, 30, |_port| {
            calls += 1;
            async move { PortAttempt::<u16>::Fatal(HostError::Internal("boom".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HostError::Internal(_)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn probe_succeeds_on_last_port_when_second_to_last_busy() {
        let result = probe(3420, 2, |port| async move {
            if port == 3421 {
                PortAttempt::Bound(port)
            } else {
                PortAttempt::Busy
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3421);
    }

    #[test]
    fn looks_like_port_busy_matches_common_phrasings() {
        assert!(looks_like_port_busy("EADDRINUSE: address already in use, port 3420"));
        assert!(looks_like_port_busy("Port 3420 is already in use"));
        assert!(!looks_like_port_busy("failed to read workspace config"));
    }
}
