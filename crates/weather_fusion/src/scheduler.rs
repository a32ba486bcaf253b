//! Fixed-period fusion loop.
//!
//! Each tick runs fetch, injection, aggregation and publish in sequence.
//! A failed tick is logged and the next tick is the retry.

use crate::consensus::ConsensusPayload;
use crate::error::Result;
use crate::ingest::StationSource;
use crate::inject;
use crate::session::{PublishSession, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const TICK_INTERVAL: Duration = Duration::from_secs(300);

/// One fetch → inject → aggregate → publish pass.
pub async fn fusion_cycle<S: StationSource, T: Transport>(
    source: &S,
    session: &PublishSession<T>,
) -> Result<ConsensusPayload> {
    let mut reports = source.fetch_reports().await?;
    log::debug!("[Scheduler] {} stations passed sanitization", reports.len());

    inject::inject_all(&mut reports);
    let payload = ConsensusPayload::from_reports(&reports);
    session.publish_payload(payload.clone()).await?;
    Ok(payload)
}

/// Run the fusion loop until the shutdown signal fires.
///
/// The first tick fires immediately. A shutdown during a tick abandons it
/// before anything is published.
pub async fn run_scheduler<S: StationSource, T: Transport>(
    source: Arc<S>,
    session: Arc<PublishSession<T>>,
    period: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    log::info!("[Scheduler] starting fusion loop ({:?} interval)", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                log::info!("[Scheduler] shutdown signal received, exiting");
                break;
            }
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        log::info!("[Scheduler] shutdown during tick, abandoning cycle");
                        break;
                    }
                    result = fusion_cycle(&*source, &*session) => {
                        match result {
                            Ok(payload) => log::info!(
                                "[Scheduler] published consensus (temperature={:?})",
                                payload.temperature
                            ),
                            Err(e) if e.is_no_entries() => {
                                log::warn!("[Scheduler] no usable stations this cycle")
                            }
                            Err(e) => log::error!("[Scheduler] tick error: {}", e),
                        }
                    }
                }
            }
        }
    }
}
