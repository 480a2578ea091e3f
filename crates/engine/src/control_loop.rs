//! Control loop: periodic rebalance, alert evaluation and (optionally) A/B
//! test conclusion over every campaign.

use crate::engine::CreativeEngine;
use futures_util::future::join_all;
use optimizer_core::config::ControlLoopConfig;
use optimizer_core::types::BatchFailure;
use optimizer_core::OptimizerResult;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Totals for one pass over all campaigns.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CycleReport {
    pub campaigns: usize,
    pub rebalanced: usize,
    pub rebalance_skipped: usize,
    pub alerts: usize,
    pub tests_concluded: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Default)]
struct CampaignOutcome {
    rebalanced: bool,
    rebalance_skipped: bool,
    alerts: usize,
    concluded: bool,
    failures: Vec<BatchFailure>,
}

pub struct ControlLoop {
    engine: Arc<CreativeEngine>,
    config: ControlLoopConfig,
}

impl ControlLoop {
    pub fn new(engine: Arc<CreativeEngine>, config: ControlLoopConfig) -> Self {
        Self { engine, config }
    }

    /// One pass. Campaigns run concurrently; a failing campaign only adds
    /// to `failures`.
    pub async fn run_cycle(&self) -> OptimizerResult<CycleReport> {
        let campaigns = self.engine.list_campaigns().await?;
        let outcomes = join_all(campaigns.iter().map(|c| self.run_campaign(&c.id))).await;

        let mut report = CycleReport {
            campaigns: campaigns.len(),
            ..CycleReport::default()
        };
        for outcome in outcomes {
            report.rebalanced += usize::from(outcome.rebalanced);
            report.rebalance_skipped += usize::from(outcome.rebalance_skipped);
            report.alerts += outcome.alerts;
            report.tests_concluded += usize::from(outcome.concluded);
            report.failures.extend(outcome.failures);
        }

        metrics::counter!("control_loop.cycles").increment(1);
        info!(
            campaigns = report.campaigns,
            rebalanced = report.rebalanced,
            alerts = report.alerts,
            concluded = report.tests_concluded,
            failures = report.failures.len(),
            "Control loop cycle complete"
        );
        Ok(report)
    }

    async fn run_campaign(&self, campaign_id: &str) -> CampaignOutcome {
        let mut outcome = CampaignOutcome::default();

        match self.engine.rebalance(campaign_id).await {
            Ok(report) if report.is_skipped() => outcome.rebalance_skipped = true,
            Ok(report) => {
                outcome.rebalanced = true;
                for failure in report.failures {
                    outcome.failures.push(BatchFailure::new(
                        campaign_id,
                        format!("rebalance write for {}: {}", failure.id, failure.reason),
                    ));
                }
            }
            Err(e) => {
                warn!(campaign_id = campaign_id, error = %e, "Rebalance failed");
                outcome
                    .failures
                    .push(BatchFailure::new(campaign_id, format!("rebalance: {e}")));
            }
        }

        match self.engine.get_alerts(campaign_id).await {
            Ok(alerts) => outcome.alerts = alerts.len(),
            Err(e) => {
                warn!(campaign_id = campaign_id, error = %e, "Alert evaluation failed");
                outcome
                    .failures
                    .push(BatchFailure::new(campaign_id, format!("alerts: {e}")));
            }
        }

        if self.config.auto_conclude_tests {
            match self.engine.conclude_test(campaign_id).await {
                Ok(conclusion) => outcome.concluded = conclusion.concluded,
                Err(e) => {
                    warn!(campaign_id = campaign_id, error = %e, "Test conclusion failed");
                    outcome
                        .failures
                        .push(BatchFailure::new(campaign_id, format!("conclude: {e}")));
                }
            }
        }

        outcome
    }

    /// Run `run_cycle` every `interval_secs` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.interval_secs.max(1));

        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Control loop started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; let the serve path warm up first.
            interval.tick().await;

            loop {
                interval.tick().await;
                if let Err(e) = self.run_cycle().await {
                    error!(error = %e, "Control loop cycle failed");
                    metrics::counter!("control_loop.failures").increment(1);
                }
            }
        })
    }
}
