//! One S2V pass over every slice of every stack.
//!
//! Slices are registered in parallel against the same read-only volume; each
//! result lands in its own slot and transforms are only written back once the
//! whole pass has succeeded.

use super::params::RegistrationConfig;
use super::rigid::{register_slice, FixedPyramid, RegistrationOutcome};
use crate::cancel::CancellationToken;
use crate::diagnostics::elapsed_ms;
use crate::error::{Result, SrrError};
use crate::image::Volume;
use crate::stack::Stack;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum SliceStatus {
    Registered,
    /// Optimized transform scored worse than the prior; prior kept.
    Unchanged,
    /// Empty mask.
    Skipped,
    /// Registration failed; prior transform kept and slice flagged.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceRegistration {
    pub stack: String,
    pub slice: usize,
    pub status: SliceStatus,
    pub metric_before: f64,
    pub metric_after: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub registered: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_ms: f64,
    pub slices: Vec<SliceRegistration>,
}

impl PassReport {
    pub fn failed_fraction(&self) -> f64 {
        let attempted = self.registered + self.unchanged + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.failed as f64 / attempted as f64
        }
    }
}

/// Register every slice of `stacks` against `volume` and update their
/// transforms. Fails without touching any transform when cancelled or when
/// more than `max_failed_fraction` of the slices fail.
pub fn register_stacks(
    stacks: &mut [Stack],
    volume: &Volume,
    config: &RegistrationConfig,
    cancel: &CancellationToken,
) -> Result<PassReport> {
    let start = Instant::now();
    let fixed = FixedPyramid::new(volume, config)?;

    let jobs: Vec<(usize, usize)> = stacks
        .iter()
        .enumerate()
        .flat_map(|(s, stack)| (0..stack.len()).map(move |k| (s, k)))
        .collect();
    let shared: &[Stack] = stacks;
    let results: Vec<std::result::Result<RegistrationOutcome, SrrError>> = jobs
        .par_iter()
        .map(|&(s, k)| {
            cancel.check()?;
            register_slice(&shared[s].slices()[k], &fixed, config)
        })
        .collect();

    let mut report = PassReport::default();
    let mut updates = Vec::new();
    for (&(s, k), result) in jobs.iter().zip(results) {
        let stack = stacks[s].name().to_string();
        let slice = stacks[s].slices()[k].index();
        let entry = match result {
            Err(SrrError::Cancelled) => return Err(SrrError::Cancelled),
            Err(SrrError::RegistrationFailure { reason, .. }) => {
                warn!("S2V: {stack}/{slice} kept its transform: {reason}");
                report.failed += 1;
                SliceRegistration {
                    stack,
                    slice,
                    status: SliceStatus::Failed(reason),
                    metric_before: f64::NAN,
                    metric_after: f64::NAN,
                }
            }
            Err(e) => return Err(e),
            Ok(outcome) => {
                let status = if outcome.skipped {
                    report.skipped += 1;
                    SliceStatus::Skipped
                } else if outcome.improved {
                    report.registered += 1;
                    updates.push((s, k, outcome.transform));
                    SliceStatus::Registered
                } else {
                    report.unchanged += 1;
                    SliceStatus::Unchanged
                };
                SliceRegistration {
                    stack,
                    slice,
                    status,
                    metric_before: outcome.initial_metric,
                    metric_after: outcome.final_metric,
                }
            }
        };
        report.slices.push(entry);
    }

    if report.failed_fraction() > config.max_failed_fraction {
        return Err(SrrError::RegistrationFailure {
            slice: format!("{} of {} slices", report.failed, jobs.len()),
            reason: format!(
                "failed fraction {:.2} exceeds {:.2}",
                report.failed_fraction(),
                config.max_failed_fraction
            ),
        });
    }

    for (s, k, t) in updates {
        stacks[s].slices_mut()[k].set_transform(t);
    }
    report.elapsed_ms = elapsed_ms(start);
    info!(
        "S2V pass: {} registered, {} unchanged, {} skipped, {} failed in {:.1} ms",
        report.registered, report.unchanged, report.skipped, report.failed, report.elapsed_ms
    );
    Ok(report)
}
