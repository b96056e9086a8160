//! OS signal handling.
//!
//! Signals are translated to [`SignalEvent`]s through an explicit table and
//! delivered on a channel, so the orchestrator never sees raw signal
//! numbers.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// What the orchestrator should do about a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Re-render the template and reload the resolver.
    Reload,
    /// Tear down networking and exit.
    Terminate,
}

/// Signals node-cache subscribes to.
pub const SIGNAL_TABLE: [(libc::c_int, SignalEvent); 3] = [
    (libc::SIGHUP, SignalEvent::Reload),
    (libc::SIGTERM, SignalEvent::Terminate),
    (libc::SIGINT, SignalEvent::Terminate),
];

pub fn classify(signum: libc::c_int) -> Option<SignalEvent> {
    SIGNAL_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == signum)
        .map(|(_, event)| *event)
}

/// Install handlers for every signal in [`SIGNAL_TABLE`].
///
/// Handlers are registered before this returns, so nothing delivered after
/// the call is lost.
pub fn spawn_signal_bridge() -> io::Result<mpsc::Receiver<SignalEvent>> {
    let (tx, rx) = mpsc::channel(4);

    for (signum, event) in SIGNAL_TABLE {
        let mut stream = signal(SignalKind::from_raw(signum))?;
        let tx = tx.clone();

        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                tracing::info!(signal = signum, event = ?event, "Signal received");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(classify(libc::SIGHUP), Some(SignalEvent::Reload));
        assert_eq!(classify(libc::SIGTERM), Some(SignalEvent::Terminate));
        assert_eq!(classify(libc::SIGINT), Some(SignalEvent::Terminate));
        assert_eq!(classify(libc::SIGUSR1), None);
    }
}
