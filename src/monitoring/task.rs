/*!
 * Sampler Task - Fixed-Cadence Resource Sampling
 *
 * Background task that drives `ResourceSampler::sample_now` on the configured
 * interval. Runs independently of module switches; a slow tick is skipped
 * rather than queued so the cadence never bunches up.
 */

use super::sampler::ResourceSampler;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

/// Control messages for the sampler task
#[derive(Debug, Clone)]
pub enum SamplerCommand {
    /// Change the sampling interval
    UpdateInterval(Duration),
    /// Stop periodic sampling
    Pause,
    /// Resume periodic sampling
    Resume,
    /// Take a sample immediately
    Trigger,
    /// Shutdown the sampler task
    Shutdown,
}

/// Handle to the sampler background task
pub struct SamplerTask {
    command_tx: mpsc::UnboundedSender<SamplerCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SamplerTask {
    /// Spawn the sampling loop at the sampler's configured interval
    pub fn spawn(sampler: ResourceSampler) -> Self {
        let interval = sampler.config().interval;
        Self::spawn_with_interval(sampler, interval)
    }

    /// Spawn the sampling loop with an explicit interval
    pub fn spawn_with_interval(sampler: ResourceSampler, interval: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            run_sampler_loop(sampler, interval, command_rx).await;
        });

        info!(interval_ms = interval.as_millis() as u64, "Sampler task spawned");

        Self {
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn update_interval(&self, interval: Duration) {
        let _ = self
            .command_tx
            .send(SamplerCommand::UpdateInterval(interval));
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(SamplerCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(SamplerCommand::Resume);
    }

    pub fn trigger(&self) {
        let _ = self.command_tx.send(SamplerCommand::Trigger);
    }

    /// Check if the loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Shutdown the sampler task gracefully
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(SamplerCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sampler task shutdown error");
            } else {
                info!("Sampler task shutdown complete");
            }
        }
    }
}

fn new_interval(period: Duration) -> tokio::time::Interval {
    // First tick fires after one full period, not immediately
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

async fn run_sampler_loop(
    sampler: ResourceSampler,
    period: Duration,
    mut command_rx: mpsc::UnboundedReceiver<SamplerCommand>,
) {
    let mut active = true;
    let mut interval = new_interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if active {
                    let sample = sampler.sample_now();
                    trace!(used_bytes = sample.used_bytes, "Sampler tick");
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(SamplerCommand::UpdateInterval(new_period)) => {
                        if new_period.is_zero() {
                            warn!("Ignoring zero sampling interval");
                        } else {
                            info!(interval_ms = new_period.as_millis() as u64, "Sampling interval updated");
                            interval = new_interval(new_period);
                        }
                    }
                    Some(SamplerCommand::Pause) => {
                        info!("Sampler task paused");
                        active = false;
                    }
                    Some(SamplerCommand::Resume) => {
                        info!("Sampler task resumed");
                        active = true;
                    }
                    Some(SamplerCommand::Trigger) => {
                        sampler.sample_now();
                        trace!("Manual sampler trigger");
                    }
                    // Every handle dropped counts as shutdown
                    Some(SamplerCommand::Shutdown) | None => {
                        info!("Sampler task shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for SamplerTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.command_tx.send(SamplerCommand::Shutdown);
        }
    }
}
