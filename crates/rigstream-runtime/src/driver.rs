//! Fixed-rate tick driver

use std::future::Future;
use std::time::Instant;

use tokio::time::MissedTickBehavior;

use rigstream_core::RigResult;

use crate::{Host, Session, SessionState};

/// Drive `session` at its configured tick rate until `shutdown` resolves
/// or the session stops on its own.
///
/// The session must already be started. A tick in progress always runs to
/// completion before shutdown is observed. A rest-pose restore deferred by
/// stopping mid-recording is waited for, not cut short. Returns the
/// visible fault if the session stopped because of one.
pub async fn run<H, F>(session: &mut Session, host: &mut H, shutdown: F) -> RigResult<()>
where
    H: Host,
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(session.config().tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = interval.tick() => {
                let report = session.tick(host).await;
                session.poll_deferred(host, Instant::now());
                if report.stopped || session.state() == SessionState::Idle {
                    break;
                }
            }
        }
    }

    session.stop(host).await;
    if let Some(due) = session.deferred_due() {
        tokio::time::sleep_until(due.into()).await;
    }
    session.flush_deferred(host);

    match session.fault() {
        Some(fault) if fault.is_fatal() => Err(fault.clone()),
        _ => Ok(()),
    }
}
