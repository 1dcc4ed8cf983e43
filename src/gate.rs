use crate::{
    config::{Config, PairScope, ThresholdBoundary},
    duplicate::{self, DuplicateReport},
    error::JobError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub incoming_label: String,
    pub existing_label: String,
    pub report: DuplicateReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub accepted: bool,
    pub threshold_percent: f64,
    /// Every pair evaluated, in evaluation order, up to and including the
    /// rejecting one.
    pub reports: Vec<PairReport>,
    pub violation: Option<PairReport>,
}

impl GateDecision {
    pub fn to_job_error(&self) -> Option<JobError> {
        self.violation.as_ref().map(|v| JobError::DataContamination {
            incoming_label: v.incoming_label.clone(),
            existing_label: v.existing_label.clone(),
            duplicate_rate: v.report.duplicate_rate,
            threshold_percent: self.threshold_percent,
        })
    }
}

/// Compares every incoming label group against every existing label group,
/// lexicographically, and stops at the first pair over the threshold.
pub fn evaluate(
    cfg: &Config,
    incoming: &BTreeMap<String, Vec<Vec<f64>>>,
    existing: &BTreeMap<String, Vec<Vec<f64>>>,
) -> GateDecision {
    let policy = &cfg.contamination;
    let mut reports = Vec::new();

    for (inc_label, inc_vectors) in incoming {
        for (base_label, base_vectors) in existing {
            if policy.scope == PairScope::SameLabel && inc_label != base_label {
                continue;
            }
            let report = duplicate::compare(inc_vectors, base_vectors, policy.tolerance);
            info!(
                incoming = %inc_label,
                existing = %base_label,
                "cross-check {}/{} ({:.2}%)",
                report.duplicate_count,
                report.total_count,
                report.duplicate_rate
            );
            let pair = PairReport {
                incoming_label: inc_label.clone(),
                existing_label: base_label.clone(),
                report,
            };
            reports.push(pair.clone());

            if exceeds(policy.boundary, report.duplicate_rate, policy.threshold_percent) {
                error!(
                    incoming = %inc_label,
                    existing = %base_label,
                    "duplicate rate {:.2}% over threshold {}%; rejecting merge",
                    report.duplicate_rate,
                    policy.threshold_percent
                );
                return GateDecision {
                    accepted: false,
                    threshold_percent: policy.threshold_percent,
                    reports,
                    violation: Some(pair),
                };
            }
        }
    }

    GateDecision {
        accepted: true,
        threshold_percent: policy.threshold_percent,
        reports,
        violation: None,
    }
}

fn exceeds(boundary: ThresholdBoundary, rate: f64, threshold: f64) -> bool {
    match boundary {
        ThresholdBoundary::Strict => rate > threshold,
        ThresholdBoundary::Inclusive => rate >= threshold,
    }
}
