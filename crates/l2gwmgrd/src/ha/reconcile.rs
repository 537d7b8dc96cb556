//! Reconciliation engine: read-only diffs between planes and HA scopes.
//!
//! Two axes share the same diff primitive:
//!
//! - config vs operational for one device (did the device apply its config?)
//! - HA parent vs each child, on one plane (did the fan-out reach every child?)
//!
//! The engine never mutates state. A device that cannot be read is reported on
//! its own line and the run continues with the remaining devices.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sonic_l2gw_types::{DeviceId, Plane};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::merge::{default_commands, EntityComparator, EntityDiff, Rescope};
use super::topology::HaTopologyIndex;
use crate::entities::DeviceSnapshot;
use crate::error::{L2gwError, Result};
use crate::store::DataStore;

/// Keys listed per report line before truncation.
pub const DEFAULT_DISPLAY_LIMIT: usize = 10;

/// Text report of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    /// One line per (entity type, direction, device pair) with discrepancies,
    /// plus one line per failed read.
    pub lines: Vec<String>,
    /// Device pairs compared.
    pub comparisons: usize,
    pub discrepancies: usize,
    pub read_failures: usize,
}

impl ReconciliationReport {
    fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            lines: Vec::new(),
            comparisons: 0,
            discrepancies: 0,
            read_failures: 0,
        }
    }

    /// True when nothing differs and every read succeeded.
    pub fn is_clean(&self) -> bool {
        self.discrepancies == 0 && self.read_failures == 0
    }

    fn absorb(&mut self, other: ReconciliationReport) {
        self.lines.extend(other.lines);
        self.comparisons += other.comparisons;
        self.discrepancies += other.discrepancies;
        self.read_failures += other.read_failures;
    }

    /// Writes the rendered report to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_string()).map_err(L2gwError::Io)
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Validation report generated at {}: {} comparisons, {} discrepancies, {} read failures",
            self.generated_at.to_rfc3339(),
            self.comparisons,
            self.discrepancies,
            self.read_failures
        )?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Joins `keys`, listing at most `limit` of them.
pub fn format_keys(keys: &[String], limit: usize) -> String {
    if keys.len() <= limit {
        return keys.join(", ");
    }
    format!("{}, ... ({} more)", keys[..limit].join(", "), keys.len() - limit)
}

/// Compares device state across planes and HA scopes.
pub struct ReconciliationEngine {
    store: Arc<dyn DataStore>,
    ha: Arc<HaTopologyIndex>,
    commands: Vec<Arc<dyn EntityComparator>>,
    display_limit: usize,
}

impl fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("commands", &self.commands.len())
            .field("display_limit", &self.display_limit)
            .finish()
    }
}

impl ReconciliationEngine {
    /// Creates an engine over every registered extractor.
    pub fn new(store: Arc<dyn DataStore>, ha: Arc<HaTopologyIndex>) -> Self {
        Self {
            store,
            ha,
            commands: default_commands(),
            display_limit: DEFAULT_DISPLAY_LIMIT,
        }
    }

    pub fn with_display_limit(mut self, limit: usize) -> Self {
        self.display_limit = limit;
        self
    }

    /// Diffs every table between two snapshots; only non-empty diffs are returned.
    pub fn compare_snapshots(
        &self,
        left: &DeviceSnapshot,
        right: &DeviceSnapshot,
        rescope: Rescope<'_>,
    ) -> Vec<EntityDiff> {
        self.commands
            .iter()
            .map(|command| command.compare(left, right, rescope))
            .filter(|diff| !diff.is_empty())
            .collect()
    }

    /// Runs both axes: config vs operational for `devices`, then parent vs
    /// child on both planes for every HA group.
    #[instrument(skip(self, devices), fields(devices = devices.len()))]
    pub async fn run(&self, devices: &[DeviceId]) -> ReconciliationReport {
        let (mut report, ha_config, ha_operational) = tokio::join!(
            self.validate_config_vs_operational(devices),
            self.validate_ha(Plane::Config),
            self.validate_ha(Plane::Operational),
        );
        report.absorb(ha_config);
        report.absorb(ha_operational);
        info!(
            comparisons = report.comparisons,
            discrepancies = report.discrepancies,
            read_failures = report.read_failures,
            "validation finished"
        );
        report
    }

    /// Checks that each device's operational state reflects its configuration.
    #[instrument(skip(self, devices), fields(devices = devices.len()))]
    pub async fn validate_config_vs_operational(&self, devices: &[DeviceId]) -> ReconciliationReport {
        let outcomes = join_all(devices.iter().map(|device| self.check_device(device))).await;
        let mut report = ReconciliationReport::new();
        for outcome in outcomes {
            report.absorb(outcome);
        }
        report
    }

    /// Checks every HA child (and its physical switches) against its parent on `plane`.
    #[instrument(skip(self))]
    pub async fn validate_ha(&self, plane: Plane) -> ReconciliationReport {
        let groups = self.ha.snapshot();
        let outcomes = join_all(
            groups
                .iter()
                .map(|(parent, children)| self.check_group(parent, children.iter().cloned().collect(), plane)),
        )
        .await;
        let mut report = ReconciliationReport::new();
        for outcome in outcomes {
            report.absorb(outcome);
        }
        report
    }

    async fn check_device(&self, device: &DeviceId) -> ReconciliationReport {
        let mut report = ReconciliationReport::new();
        let (config, operational) = tokio::join!(
            self.store.read_snapshot(device, Plane::Config),
            self.store.read_snapshot(device, Plane::Operational),
        );
        let config = match config {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.read_failure(&mut report, device, Plane::Config, &err);
                return report;
            }
        };
        let operational = match operational {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.read_failure(&mut report, device, Plane::Operational, &err);
                return report;
            }
        };

        report.comparisons += 1;
        for diff in self.compare_snapshots(&config, &operational, Rescope::None) {
            if !diff.missing.is_empty() {
                let text = format!(
                    "present in config but missing or mismatched in operational state of {}",
                    device
                );
                self.discrepancy(&mut report, &diff, diff.missing_keys(), &text);
            }
            if !diff.extra.is_empty() {
                let text = format!("present operationally without configuration on {}", device);
                self.discrepancy(&mut report, &diff, diff.extra_keys(), &text);
            }
        }
        report
    }

    async fn check_group(&self, parent: &DeviceId, children: Vec<DeviceId>, plane: Plane) -> ReconciliationReport {
        let mut report = ReconciliationReport::new();
        let parent_snapshot = match self.store.read_snapshot(parent, plane).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.read_failure(&mut report, parent, plane, &err);
                return report;
            }
        };

        let outcomes = join_all(
            children
                .iter()
                .map(|child| self.check_child(&parent_snapshot, child, plane)),
        )
        .await;
        for outcome in outcomes {
            report.absorb(outcome);
        }
        report
    }

    async fn check_child(&self, parent: &DeviceSnapshot, child: &DeviceId, plane: Plane) -> ReconciliationReport {
        let mut report = ReconciliationReport::new();
        match self.store.read_snapshot(child, plane).await {
            Ok(child_snapshot) => self.diff_pair(&mut report, parent, &child_snapshot, plane),
            Err(err) => self.read_failure(&mut report, child, plane, &err),
        }

        for name in parent.switches() {
            let parent_ps = parent.device.physical_switch(name);
            let child_ps = child.physical_switch(name);
            let (left, right) = tokio::join!(
                self.store.read_snapshot(&parent_ps, plane),
                self.store.read_snapshot(&child_ps, plane),
            );
            match (left, right) {
                (Ok(left), Ok(right)) => self.diff_pair(&mut report, &left, &right, plane),
                (Err(err), _) => self.read_failure(&mut report, &parent_ps, plane, &err),
                (_, Err(err)) => self.read_failure(&mut report, &child_ps, plane, &err),
            }
        }
        report
    }

    fn diff_pair(
        &self,
        report: &mut ReconciliationReport,
        parent: &DeviceSnapshot,
        child: &DeviceSnapshot,
        plane: Plane,
    ) {
        report.comparisons += 1;
        let rescope = Rescope::Right(&parent.device);
        for diff in self.compare_snapshots(parent, child, rescope) {
            if !diff.missing.is_empty() {
                let text = format!(
                    "present in parent {} but missing or mismatched in child {} ({} plane)",
                    parent.device, child.device, plane
                );
                self.discrepancy(report, &diff, diff.missing_keys(), &text);
            }
            if !diff.extra.is_empty() {
                let text = format!(
                    "present in child {} but not in parent {} ({} plane)",
                    child.device, parent.device, plane
                );
                self.discrepancy(report, &diff, diff.extra_keys(), &text);
            }
        }
    }

    fn discrepancy(&self, report: &mut ReconciliationReport, diff: &EntityDiff, keys: Vec<String>, text: &str) {
        report.discrepancies += 1;
        report.lines.push(format!(
            "{}: {} {} {}: {}",
            diff.kind,
            keys.len(),
            diff.description,
            text,
            format_keys(&keys, self.display_limit)
        ));
    }

    fn read_failure(&self, report: &mut ReconciliationReport, device: &DeviceId, plane: Plane, err: &L2gwError) {
        warn!(%device, %plane, error = %err, "snapshot read failed, device skipped");
        report.read_failures += 1;
        report
            .lines
            .push(format!("{}: failed to read {} plane: {}", device, plane, err));
    }
}
