/*!
 * Modvisor - Main Entry Point
 *
 * Wires a sampler, verifier, and controller together and drives a short tab
 * sequence for a travel app:
 * - cities and calendar clean up properly
 * - search hangs in cleanup and gets forced after its timeout
 *
 * Prints controller statistics and the final audit as JSON.
 */

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use modvisor::lifecycle::LeakAudit;
use modvisor::monitoring::Severity;
use modvisor::{
    init_tracing, CleanupStats, CleanupVerifier, Container, EventBus, Module, ModuleController,
    ModuleOptions, ModuleResources, ModuleResult, ProcessProbe, RegistryResolver, ResourceSampler,
    SamplerTask, SupervisorConfig,
};

/// Demo tab with a few listeners and timers
struct TravelTab {
    id: &'static str,
    options: ModuleOptions,
    resources: ModuleResources,
    listeners: &'static [&'static str],
    timers: &'static [&'static str],
    hangs_on_cleanup: bool,
}

impl TravelTab {
    fn new(id: &'static str, sampler: &ResourceSampler) -> Self {
        Self {
            id,
            options: ModuleOptions::default(),
            resources: ModuleResources::new(id, sampler.clone()),
            listeners: &["click", "keydown"],
            timers: &[],
            hangs_on_cleanup: false,
        }
    }

    fn with_timers(mut self, timers: &'static [&'static str]) -> Self {
        self.timers = timers;
        self
    }

    fn hanging(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_timeout(timeout);
        self.hangs_on_cleanup = true;
        self
    }
}

#[async_trait]
impl Module for TravelTab {
    fn id(&self) -> &str {
        self.id
    }

    fn options(&self) -> ModuleOptions {
        self.options.clone()
    }

    fn resources(&self) -> &ModuleResources {
        &self.resources
    }

    async fn render(&self, container: &Container) -> ModuleResult<()> {
        container.replace_content(format!("<section class=\"{}\">loading</section>", self.id));
        for timer in self.timers {
            self.resources.add_timer(timer);
        }
        Ok(())
    }

    fn bind_events(&self, container: &Container) -> ModuleResult<()> {
        for listener in self.listeners {
            container.bind(format!("{listener}:.{}", self.id));
            self.resources.add_listener(listener);
        }
        Ok(())
    }

    async fn cleanup(&self) -> ModuleResult<CleanupStats> {
        if self.hangs_on_cleanup {
            std::future::pending::<()>().await;
        }
        Ok(self.resources.release_all())
    }
}

fn print_json<T: serde::Serialize>(label: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).with_context(|| format!("serializing {label}"))?;
    println!("{label}:\n{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Modvisor starting...");
    info!("================================================");

    let config = SupervisorConfig::from_env().context("loading supervisor configuration")?;
    info!(
        interval_ms = config.sampler.interval.as_millis() as u64,
        retention = config.sampler.retention,
        region = %config.controller.region,
        "Configuration loaded"
    );

    info!("Initializing event bus...");
    let bus = EventBus::new();
    let (subscription, events) = bus.subscribe_channel();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event.severity() {
                Severity::Info => info!(event = %event.kind(), "supervisor event"),
                Severity::Warn => warn!(event = %event.kind(), "supervisor event"),
                Severity::Error | Severity::Critical => {
                    error!(event = %event.kind(), "supervisor event")
                }
            }
        }
    });

    info!("Initializing resource sampler...");
    let sampler = ResourceSampler::new(config.sampler.clone(), ProcessProbe::new(), bus.clone());
    let sampler_task = SamplerTask::spawn(sampler.clone());

    info!("Initializing cleanup verifier...");
    let verifier = CleanupVerifier::new(config.verifier.clone(), sampler.clone(), bus.clone());

    let resolver = {
        let cities = sampler.clone();
        let calendar = sampler.clone();
        let search = sampler.clone();
        RegistryResolver::new()
            .with("cities", move || {
                Ok(Arc::new(TravelTab::new("cities", &cities)) as Arc<dyn Module>)
            })
            .with("calendar", move || {
                Ok(Arc::new(TravelTab::new("calendar", &calendar).with_timers(&["clock"]))
                    as Arc<dyn Module>)
            })
            .with("search", move || {
                Ok(Arc::new(
                    TravelTab::new("search", &search)
                        .with_timers(&["debounce", "suggest"])
                        .hanging(Duration::from_millis(200)),
                ) as Arc<dyn Module>)
            })
    };

    info!("Initializing module controller...");
    let container = Container::new(config.controller.region.clone());
    let controller = ModuleController::builder(resolver, verifier)
        .with_config(config.controller.clone())
        .with_container(container.clone())
        .build();

    info!("Supervisor initialization complete");
    info!("================================================");

    for tab in ["cities", "calendar", "calendar", "search", "cities", "hotels"] {
        let outcome = controller.switch_to(tab).await;
        info!(tab, outcome = ?outcome, "switch finished");
        sampler.sample_now();
    }

    if let Err(e) = controller.refresh().await {
        warn!(error = %e, "refresh failed");
    }

    let audit: LeakAudit = controller.detect_memory_leaks();
    print_json("leak_audit", &audit)?;
    print_json("stats", &controller.get_stats())?;

    let report = controller.shutdown().await;
    print_json("final_report", &report)?;
    info!(region = container.region(), owner = ?container.owner(), "container released");

    sampler_task.shutdown().await;
    drop(subscription);
    if let Err(e) = event_log.await {
        warn!(error = %e, "event log task ended abnormally");
    }

    info!("Modvisor finished");
    Ok(())
}
