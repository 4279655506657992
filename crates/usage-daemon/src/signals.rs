//! Process signals mapped to monitor actions.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Refresh,
    ToggleActive,
}

#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    refresh: tokio::signal::unix::Signal,
    toggle: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            refresh: signal(SignalKind::user_defined1())?,
            toggle: signal(SignalKind::user_defined2())?,
        })
    }

    /// Wait for the next signal.
    pub async fn next(&mut self) -> SignalAction {
        tokio::select! {
            _ = self.interrupt.recv() => SignalAction::Shutdown,
            _ = self.terminate.recv() => SignalAction::Shutdown,
            _ = self.refresh.recv() => SignalAction::Refresh,
            _ = self.toggle.recv() => SignalAction::ToggleActive,
        }
    }
}

/// Only Ctrl-C is available off Unix.
#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    pub async fn next(&mut self) -> SignalAction {
        match tokio::signal::ctrl_c().await {
            Ok(()) => SignalAction::Shutdown,
            Err(e) => {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    }
}
