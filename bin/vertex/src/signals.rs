//! In-process signal loop for `start` (§1, §6): `SIGUSR1` reloads config
//! and the share-token store, `SIGUSR2` prints a status snapshot,
//! `SIGINT`/`SIGTERM`/`SIGQUIT` trigger graceful shutdown.

use tokio::signal::unix::{signal, SignalKind};

/// What the caller asked the signal loop to do, for each tick of
/// [`run_until_shutdown`].
pub trait SignalHandlers {
    /// `SIGUSR1`: reload config and the share-token store.
    fn on_reload(&self) -> impl std::future::Future<Output = ()> + Send;
    /// `SIGUSR2`: print a status snapshot.
    fn on_status(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Runs until `SIGINT`, `SIGTERM`, or `SIGQUIT` is received, dispatching
/// `SIGUSR1`/`SIGUSR2` to `handlers` as they arrive.
pub async fn run_until_shutdown(handlers: &impl SignalHandlers) -> std::io::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    loop {
        tokio::select! {
            _ = usr1.recv() => {
                tracing::info!("SIGUSR1 received, reloading config and share-token store");
                handlers.on_reload().await;
            }
            _ = usr2.recv() => {
                tracing::info!("SIGUSR2 received, printing status");
                handlers.on_status().await;
            }
            _ = int.recv() => {
                tracing::info!("SIGINT received, shutting down");
                return Ok(());
            }
            _ = term.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = quit.recv() => {
                tracing::info!("SIGQUIT received, shutting down");
                return Ok(());
            }
        }
    }
}
