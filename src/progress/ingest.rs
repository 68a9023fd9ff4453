//! Measurement ingestion.
//!
//! Each measurement is one unit of work: ledger write, propagation for
//! every group of the rider, milestone attribution and rider/device totals
//! all commit in a single immediate transaction. Contention retries the
//! whole unit. Cache invalidation and listener notification run only after
//! the commit.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::propagator::ProgressPropagator;
use super::retry::RetryPolicy;
use crate::clock::{Clock, SystemClock};
use crate::error::TrackingError;
use crate::goals::GoalOutcome;
use crate::hierarchy::GroupHierarchy;
use crate::history::{HistoryRecorder, SqliteHistoryRecorder};
use crate::ledger::{hour_bucket, DistanceLedger};
use crate::milestones::{MilestoneAttributor, MilestoneAward, RecordLocks};
use crate::notify::{RiderTotals, RiderTotalsListener};
use crate::storage::database::to_db_time;
use crate::storage::Database;
use crate::totals::{TotalsCache, TotalsEntity};

/// A distance increment reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// `None` when the device is not attributed to a rider
    pub rider_id: Option<Uuid>,
    pub device_id: Uuid,
    pub delta_km: f64,
    pub timestamp: DateTime<Utc>,
}

/// A device-reported running total for one hour.
///
/// Replaying the same total is a no-op; only growth is propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourTotal {
    pub rider_id: Option<Uuid>,
    pub device_id: Uuid,
    pub hour: DateTime<Utc>,
    pub total_km: f64,
}

/// What a committed ingestion changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub rider_id: Option<Uuid>,
    pub device_id: Uuid,
    /// Kilometres added to the ledger and propagated
    pub delta_km: f64,
    pub hour: DateTime<Utc>,
    /// Every group whose totals changed, each listed once
    pub groups: Vec<Uuid>,
    pub goals_reached: Vec<GoalOutcome>,
    pub awards: Vec<MilestoneAward>,
    /// The rider's all-time total after this measurement
    pub rider_total: Option<f64>,
}

/// Result of one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied(IngestReport),
    /// The rider opted out of collection; nothing was recorded
    CollectionDisabled { rider_id: Uuid },
    /// An hour total that added nothing new
    Unchanged,
}

enum LedgerWrite {
    Delta { delta_km: f64, timestamp: DateTime<Utc> },
    HourTotal { hour: DateTime<Utc>, total_km: f64 },
}

impl LedgerWrite {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LedgerWrite::Delta { timestamp, .. } => *timestamp,
            LedgerWrite::HourTotal { hour, .. } => *hour,
        }
    }
}

/// Write path for device measurements.
///
/// Owns its own database connection; run one ingestor per writer thread
/// and share the locks and cache between them.
pub struct Ingestor {
    db: Database,
    retry: RetryPolicy,
    attributor: MilestoneAttributor,
    cache: Arc<dyn TotalsCache>,
    listener: Option<Arc<dyn RiderTotalsListener>>,
    history: Arc<dyn HistoryRecorder>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(db: Database, locks: Arc<RecordLocks>, cache: Arc<dyn TotalsCache>) -> Self {
        Self {
            db,
            retry: RetryPolicy::default(),
            attributor: MilestoneAttributor::new(locks),
            cache,
            listener: None,
            history: Arc::new(SqliteHistoryRecorder),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RiderTotalsListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The ingestor's connection, for reads outside a unit of work.
    pub fn connection(&self) -> &Connection {
        self.db.connection()
    }

    /// Record a distance increment and propagate it.
    pub fn ingest(&mut self, measurement: &Measurement) -> Result<IngestOutcome, TrackingError> {
        if !measurement.delta_km.is_finite() || measurement.delta_km <= 0.0 {
            return Err(TrackingError::Validation(format!(
                "delta must be a positive number of kilometres, got {}",
                measurement.delta_km
            )));
        }

        let write = LedgerWrite::Delta {
            delta_km: measurement.delta_km,
            timestamp: measurement.timestamp,
        };
        self.run(measurement.rider_id, measurement.device_id, write)
    }

    /// Record an hour total; only growth over the stored value propagates.
    pub fn ingest_hour_total(&mut self, total: &HourTotal) -> Result<IngestOutcome, TrackingError> {
        if !total.total_km.is_finite() || total.total_km < 0.0 {
            return Err(TrackingError::Validation(format!(
                "hour total must be a non-negative number of kilometres, got {}",
                total.total_km
            )));
        }

        let write = LedgerWrite::HourTotal {
            hour: hour_bucket(total.hour),
            total_km: total.total_km,
        };
        self.run(total.rider_id, total.device_id, write)
    }

    /// Freeze ledger entries of hours before `cutoff`.
    pub fn finalize_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, TrackingError> {
        let retry = self.retry;
        retry.run("finalize ledger", || {
            let tx = self.db.begin_immediate()?;
            let changed = DistanceLedger::new(&tx).finalize_before(cutoff)?;
            tx.commit()?;
            Ok(changed)
        })
    }

    fn run(
        &mut self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        write: LedgerWrite,
    ) -> Result<IngestOutcome, TrackingError> {
        let retry = self.retry;
        let outcome = retry.run("ingest", || self.apply(rider_id, device_id, &write))?;

        if let IngestOutcome::Applied(report) = &outcome {
            self.after_commit(report, write.timestamp());
        }
        Ok(outcome)
    }

    /// One attempt. Any error rolls the whole unit back.
    fn apply(
        &mut self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        write: &LedgerWrite,
    ) -> Result<IngestOutcome, TrackingError> {
        let now = self.clock.now();
        let tx = self.db.begin_immediate()?;
        let tree = GroupHierarchy::new(&tx);

        if tree.device(device_id)?.is_none() {
            return Err(TrackingError::UnknownEntity {
                kind: "device",
                id: device_id,
            });
        }

        let groups = match rider_id {
            Some(id) => {
                let rider = tree
                    .rider(id)?
                    .ok_or(TrackingError::UnknownEntity { kind: "rider", id })?;
                if !rider.km_collection_enabled {
                    tracing::debug!("Rider {} has collection disabled, skipping", id);
                    return Ok(IngestOutcome::CollectionDisabled { rider_id: id });
                }
                tree.rider_groups(id)?
            }
            None => Vec::new(),
        };

        let mut leaf = None;
        for group in &groups {
            if tree.is_leaf(*group)? {
                leaf = Some(*group);
                break;
            }
        }
        let group_at_time = leaf.or_else(|| groups.first().copied());

        let ledger = DistanceLedger::new(&tx);
        let timestamp = write.timestamp();
        let delta_km = match write {
            LedgerWrite::Delta {
                delta_km,
                timestamp,
            } => ledger.record_delta(rider_id, device_id, *timestamp, *delta_km, group_at_time)?,
            LedgerWrite::HourTotal { hour, total_km } => {
                ledger.record_hour_total(rider_id, device_id, *hour, *total_km, group_at_time)?
            }
        };
        if delta_km <= 0.0 {
            return Ok(IngestOutcome::Unchanged);
        }

        let propagator = ProgressPropagator::new(&tx, self.history.as_ref());
        let mut touched = Vec::new();
        let mut seen = HashSet::new();
        let mut goals_reached = Vec::new();
        for group in &groups {
            let report = propagator.apply_delta(*group, delta_km, now)?;
            goals_reached.extend(report.goals_reached().cloned());
            for id in report.groups_touched {
                if seen.insert(id) {
                    touched.push(id);
                }
            }
        }

        let mut awards = Vec::new();
        for group in &groups {
            awards.extend(self.attributor.check(&tx, *group, leaf, now)?);
        }

        let seen_at = to_db_time(&timestamp);
        let rider_total = match rider_id {
            Some(id) => {
                tx.execute(
                    "UPDATE riders SET distance_total = distance_total + ?1,
                         last_active = CASE WHEN last_active IS NULL OR last_active < ?2
                                            THEN ?2 ELSE last_active END
                     WHERE id = ?3",
                    params![delta_km, seen_at, id.to_string()],
                )?;
                let total: f64 = tx.query_row(
                    "SELECT distance_total FROM riders WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )?;
                Some(total)
            }
            None => None,
        };
        tx.execute(
            "UPDATE devices SET distance_total = distance_total + ?1,
                 last_active = CASE WHEN last_active IS NULL OR last_active < ?2
                                    THEN ?2 ELSE last_active END
             WHERE id = ?3",
            params![delta_km, seen_at, device_id.to_string()],
        )?;

        tx.commit()?;

        Ok(IngestOutcome::Applied(IngestReport {
            rider_id,
            device_id,
            delta_km,
            hour: hour_bucket(timestamp),
            groups: touched,
            goals_reached,
            awards,
            rider_total,
        }))
    }

    fn after_commit(&self, report: &IngestReport, timestamp: DateTime<Utc>) {
        if let Some(rider_id) = report.rider_id {
            self.cache.invalidate_entity(&TotalsEntity::Rider(rider_id));
        }
        for group in &report.groups {
            self.cache.invalidate_entity(&TotalsEntity::Group(*group));
        }

        if let (Some(listener), Some(rider_id), Some(total)) =
            (&self.listener, report.rider_id, report.rider_total)
        {
            listener.rider_totals_changed(&RiderTotals {
                rider_id,
                distance_total: total,
                delta_km: report.delta_km,
                last_active: timestamp,
            });
        }

        for award in &report.awards {
            tracing::info!(
                "Group {} won milestone {}",
                award.winner_group_id,
                award.milestone_name
            );
        }
    }
}
