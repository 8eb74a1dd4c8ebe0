//! # Cross-platform OS signal handling.
//!
//! Provides [`signal_stream`], a stream that yields the name of every termination signal the
//! process receives. The root supervisor consumes it as a channel task.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGHUP` (terminal hangup)
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)
//! - `SIGQUIT` (quit signal, often used for core dumps or hard stop)
//!
//! **Windows platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

use futures::StreamExt;
use futures::stream::{self, BoxStream};

/// Stream of received termination signals.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub(crate) fn signal_stream() -> std::io::Result<BoxStream<'static, &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
    ];
    let mut streams = Vec::with_capacity(kinds.len());
    for (kind, name) in kinds {
        let sig = signal(kind)?;
        streams.push(
            stream::unfold(sig, move |mut sig| async move {
                sig.recv().await?;
                Some((name, sig))
            })
            .boxed(),
        );
    }
    Ok(stream::select_all(streams).boxed())
}

/// Stream of received termination signals.
///
/// Returns `Err` if signal registration fails.
#[cfg(not(unix))]
pub(crate) fn signal_stream() -> std::io::Result<BoxStream<'static, &'static str>> {
    Ok(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok()?;
        Some(("CTRL_C", ()))
    })
    .boxed())
}
