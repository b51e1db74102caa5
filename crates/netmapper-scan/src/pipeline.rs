//! The scan pipeline driver.
//!
//! Runs discovery, then each enabled per-host stage in order over the
//! batched live-host list, checkpointing `report.json` after every stage.
//! A stage failure is logged and the pipeline moves on; only discovery or
//! the final report can abort a run.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use netmapper_core::{HostRecord, ScanRun, TargetDescriptor};

use crate::batch::{plan_batches, run_batch};
use crate::config::ScanConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::layout::RunLayout;
use crate::report;
use crate::runner::CommandRunner;
use crate::stages::{
    CredentialStage, FingerprintStage, PortScanStage, Stage, VulnerabilityStage,
};

/// Terminal state of a run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every stage ran (or was skipped) and the report was written.
    Completed {
        run: ScanRun,
        report: PathBuf,
        /// An interrupt cut the run short; the report covers what finished.
        interrupted: bool,
    },
    /// Discovery found nothing to scan.
    AbortedNoHosts,
}

/// Cooperative cancellation flag, checked between batches and stages.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag on the first Ctrl-C.
    pub fn listen_for_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing current batch");
                flag.raise();
            }
        });
    }
}

pub struct Pipeline<R> {
    runner: Arc<R>,
    config: Arc<ScanConfig>,
    layout: RunLayout,
    interrupt: Interrupt,
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn new(
        runner: Arc<R>,
        config: ScanConfig,
        layout: RunLayout,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            runner,
            config: Arc::new(config),
            layout,
            interrupt,
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub async fn run(&self, target: TargetDescriptor) -> Result<PipelineOutcome> {
        fs::create_dir_all(self.layout.root())?;

        let mut run = ScanRun::new(target);
        tracing::info!(
            run_id = %run.run_id,
            target = %run.target,
            output = %self.layout.root().display(),
            "Starting scan run"
        );

        let discovery =
            Discovery::new(self.runner.clone(), self.config.clone(), self.layout.clone());
        run.live_hosts = discovery.discover(&run.target).await?;
        if run.live_hosts.is_empty() {
            tracing::warn!(target = %run.target, "No live hosts found, nothing to scan");
            return Ok(PipelineOutcome::AbortedNoHosts);
        }

        let hosts = run.live_hosts.clone();
        let ports = Arc::new(PortScanStage::new(
            self.runner.clone(),
            self.config.clone(),
            self.layout.clone(),
        ));
        self.run_stage(ports, &mut run, &hosts).await;

        if self.config.fingerprinting {
            let stage = FingerprintStage::new(
                self.runner.clone(),
                self.config.clone(),
                self.layout.clone(),
            );
            self.run_optional(Arc::new(stage), &mut run).await;
        } else {
            tracing::info!(stage = "fingerprint", "Stage disabled");
        }

        if self.config.vulnerability_scan {
            let stage = VulnerabilityStage::new(
                self.runner.clone(),
                self.config.clone(),
                self.layout.clone(),
            );
            self.run_optional(Arc::new(stage), &mut run).await;
        } else {
            tracing::info!(stage = "vulnerability", "Stage disabled");
        }

        if self.config.credential_check {
            let stage =
                CredentialStage::new(self.runner.clone(), self.config.clone(), self.layout.clone());
            match stage {
                Ok(stage) => self.run_optional(Arc::new(stage), &mut run).await,
                Err(e) => tracing::error!(stage = "credentials", error = %e, "Stage setup failed"),
            }
        } else {
            tracing::info!(stage = "credentials", "Stage disabled");
        }

        let report = report::write_reports(&self.layout, &mut run)?;
        let interrupted = self.interrupt.is_raised();
        tracing::info!(
            hosts = run.hosts.len(),
            vulnerable = run.vulnerable_hosts.len(),
            interrupted,
            "Scan run complete"
        );

        Ok(PipelineOutcome::Completed {
            run,
            report,
            interrupted,
        })
    }

    /// Run a stage over the hosts already in the store, unless there are
    /// none or the run was interrupted.
    async fn run_optional<S: Stage>(&self, stage: Arc<S>, run: &mut ScanRun) {
        if self.interrupt.is_raised() {
            tracing::warn!(stage = stage.name(), "Skipping stage after interrupt");
            return;
        }
        if run.hosts.is_empty() {
            tracing::info!(stage = stage.name(), "No host records, skipping stage");
            return;
        }
        let hosts = run.hosts.addresses().to_vec();
        self.run_stage(stage, run, &hosts).await;
    }

    async fn run_stage<S: Stage>(&self, stage: Arc<S>, run: &mut ScanRun, hosts: &[String]) {
        let batches = plan_batches(hosts, self.config.effective_batch_size());
        let total = batches.len();
        tracing::info!(
            stage = stage.name(),
            hosts = hosts.len(),
            batches = total,
            "Stage starting"
        );

        let mut failed = 0usize;
        for (index, batch) in batches.into_iter().enumerate() {
            if self.interrupt.is_raised() {
                tracing::warn!(
                    stage = stage.name(),
                    remaining = total - index,
                    "Interrupted, skipping remaining batches"
                );
                break;
            }
            tracing::info!(
                stage = stage.name(),
                batch = index + 1,
                total,
                hosts = batch.len(),
                "Processing batch"
            );

            // Every batch host has a record, in live-host order, before any
            // worker runs. A worker that fails leaves it untouched.
            for host in batch {
                run.hosts.ensure(host);
            }

            let outcome = run_batch(batch, self.config.threads, |host| {
                let stage = stage.clone();
                let record = run
                    .hosts
                    .get(&host)
                    .cloned()
                    .unwrap_or_else(|| HostRecord::new(host.as_str()));
                async move { stage.process(record).await }
            })
            .await;

            failed += outcome.failed.len();
            for record in outcome.succeeded {
                run.hosts.upsert(record);
            }
        }

        if let Err(e) = report::write_json(&self.layout, run) {
            tracing::error!(stage = stage.name(), error = %e, "Failed to checkpoint report");
        }
        tracing::info!(
            stage = stage.name(),
            failed,
            records = run.hosts.len(),
            "Stage finished"
        );
    }
}
