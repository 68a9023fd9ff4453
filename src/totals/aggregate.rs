//! Ledger aggregation bounded by snapshots.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::SnapshotIndex;
use crate::error::TrackingError;
use crate::hierarchy::GroupHierarchy;
use crate::storage::database::to_db_time;

/// Something whose distance can be totalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TotalsEntity {
    /// A group and its whole subtree
    Group(Uuid),
    /// A single rider
    Rider(Uuid),
}

/// Current-period totals split by calendar window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// Since the active snapshot (or all time)
    pub total: f64,
    pub daily: f64,
    /// Week starting Monday
    pub weekly: f64,
    pub monthly: f64,
    pub yearly: f64,
}

/// What to sum over.
enum Scope {
    Groups(Vec<Uuid>),
    Rider(Uuid),
}

/// Lower bound of a summed range.
#[derive(Debug, Clone, Copy)]
enum Lower {
    /// Count everything
    Unbounded,
    /// Strictly after a snapshot date
    After(DateTime<Utc>),
    /// At or after a window start
    From(DateTime<Utc>),
}

impl Lower {
    /// The tighter of a snapshot bound and a window start.
    fn tightest(snapshot: Option<DateTime<Utc>>, window_start: DateTime<Utc>) -> Self {
        match snapshot {
            Some(date) if date >= window_start => Lower::After(date),
            _ => Lower::From(window_start),
        }
    }
}

/// Read-only totals computation over the ledger.
pub struct TotalsQuery<'a> {
    conn: &'a Connection,
}

impl<'a> TotalsQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Sum of ledger entries after the active snapshot, up to `as_of`.
    pub fn effective_total(
        &self,
        entity: TotalsEntity,
        as_of: DateTime<Utc>,
    ) -> Result<f64, TrackingError> {
        let (scope, snapshot) = self.resolve(entity, as_of)?;
        let lower = snapshot.map(Lower::After).unwrap_or(Lower::Unbounded);
        self.sum(&scope, lower, as_of)
    }

    /// Effective total plus daily, weekly, monthly and yearly windows.
    pub fn period_totals(
        &self,
        entity: TotalsEntity,
        now: DateTime<Utc>,
    ) -> Result<PeriodTotals, TrackingError> {
        let (scope, snapshot) = self.resolve(entity, now)?;
        let today = now.date_naive();

        let day_start = midnight(today);
        let week_start =
            midnight(today - Duration::days(i64::from(today.weekday().num_days_from_monday())));
        let month_start = midnight(today.with_day(1).unwrap_or(today));
        let year_start = midnight(
            NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
        );

        Ok(PeriodTotals {
            total: self.sum(
                &scope,
                snapshot.map(Lower::After).unwrap_or(Lower::Unbounded),
                now,
            )?,
            daily: self.sum(&scope, Lower::tightest(snapshot, day_start), now)?,
            weekly: self.sum(&scope, Lower::tightest(snapshot, week_start), now)?,
            monthly: self.sum(&scope, Lower::tightest(snapshot, month_start), now)?,
            yearly: self.sum(&scope, Lower::tightest(snapshot, year_start), now)?,
        })
    }

    /// Work out which entries belong to the entity and its snapshot bound.
    fn resolve(
        &self,
        entity: TotalsEntity,
        as_of: DateTime<Utc>,
    ) -> Result<(Scope, Option<DateTime<Utc>>), TrackingError> {
        let tree = GroupHierarchy::new(self.conn);
        let snapshots = SnapshotIndex::new(self.conn);

        match entity {
            TotalsEntity::Group(group_id) => {
                let top = tree.top_group(group_id)?;
                let snapshot = snapshots
                    .latest_active(top, as_of)?
                    .map(|s| s.snapshot_date);
                Ok((Scope::Groups(tree.descendants(group_id)?), snapshot))
            }
            TotalsEntity::Rider(rider_id) => {
                if tree.rider(rider_id)?.is_none() {
                    return Err(TrackingError::UnknownEntity {
                        kind: "rider",
                        id: rider_id,
                    });
                }
                let mut snapshot: Option<DateTime<Utc>> = None;
                for group_id in tree.rider_groups(rider_id)? {
                    let top = tree.top_group(group_id)?;
                    if let Some(found) = snapshots.latest_active(top, as_of)? {
                        snapshot = snapshot.max(Some(found.snapshot_date));
                    }
                }
                Ok((Scope::Rider(rider_id), snapshot))
            }
        }
    }

    fn sum(&self, scope: &Scope, lower: Lower, upper: DateTime<Utc>) -> Result<f64, TrackingError> {
        let mut sql = String::from("SELECT COALESCE(SUM(distance_km), 0) FROM ledger_entries WHERE ");
        let mut args: Vec<String> = Vec::new();

        match scope {
            Scope::Groups(groups) => {
                if groups.is_empty() {
                    return Ok(0.0);
                }
                sql.push_str(&format!(
                    "group_at_time IN ({})",
                    vec!["?"; groups.len()].join(", ")
                ));
                args.extend(groups.iter().map(|g| g.to_string()));
            }
            Scope::Rider(rider_id) => {
                sql.push_str("rider_id = ?");
                args.push(rider_id.to_string());
            }
        }

        match lower {
            Lower::Unbounded => {}
            Lower::After(date) => {
                sql.push_str(" AND hour > ?");
                args.push(to_db_time(&date));
            }
            Lower::From(date) => {
                sql.push_str(" AND hour >= ?");
                args.push(to_db_time(&date));
            }
        }

        sql.push_str(" AND hour <= ?");
        args.push(to_db_time(&upper));

        let total: f64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(total)
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}
