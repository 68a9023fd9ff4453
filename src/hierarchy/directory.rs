//! Administrative writes to the hierarchy.
//!
//! The propagation path never goes through here; it only reads the tree.

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::tree::GroupHierarchy;
use super::types::{Device, Group, Rider};
use crate::error::TrackingError;
use crate::storage::database::to_db_time;

/// Creates and edits groups, riders, devices and memberships.
pub struct GroupDirectory<'a> {
    conn: &'a Connection,
}

impl<'a> GroupDirectory<'a> {
    /// Create a directory on a connection or transaction.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn tree(&self) -> GroupHierarchy<'a> {
        GroupHierarchy::new(self.conn)
    }

    /// Create a group, optionally below an existing parent.
    pub fn create_group(&self, name: &str, parent: Option<Uuid>) -> Result<Group, TrackingError> {
        if let Some(parent_id) = parent {
            self.tree().require_group(parent_id)?;
        }

        let group = Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent_id: parent,
            distance_total: 0.0,
            coins_total: 0,
            is_visible: true,
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO groups (id, name, parent_id, distance_total, coins_total, is_visible, created_at)
             VALUES (?1, ?2, ?3, 0, 0, 1, ?4)",
            params![
                group.id.to_string(),
                group.name,
                group.parent_id.map(|p| p.to_string()),
                to_db_time(&group.created_at),
            ],
        )?;

        tracing::debug!("Created group {} ({})", group.name, group.id);
        Ok(group)
    }

    /// Move a group below another parent, or make it a top group.
    pub fn set_parent(&self, group_id: Uuid, parent: Option<Uuid>) -> Result<(), TrackingError> {
        let tree = self.tree();
        tree.require_group(group_id)?;

        if let Some(parent_id) = parent {
            tree.require_group(parent_id)?;
            if tree.chain(parent_id)?.contains(&group_id) {
                return Err(TrackingError::CycleDetected(group_id));
            }
        }

        self.conn.execute(
            "UPDATE groups SET parent_id = ?1 WHERE id = ?2",
            params![parent.map(|p| p.to_string()), group_id.to_string()],
        )?;
        Ok(())
    }

    /// Show or hide a group.
    pub fn set_visible(&self, group_id: Uuid, visible: bool) -> Result<(), TrackingError> {
        let changed = self.conn.execute(
            "UPDATE groups SET is_visible = ?1 WHERE id = ?2",
            params![visible, group_id.to_string()],
        )?;
        if changed == 0 {
            return Err(TrackingError::UnknownEntity {
                kind: "group",
                id: group_id,
            });
        }
        Ok(())
    }

    /// Create a rider with distance collection enabled.
    pub fn create_rider(&self, name: &str) -> Result<Rider, TrackingError> {
        let rider = Rider {
            id: Uuid::new_v4(),
            name: name.to_string(),
            km_collection_enabled: true,
            distance_total: 0.0,
            last_active: None,
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO riders (id, name, km_collection_enabled, distance_total, created_at)
             VALUES (?1, ?2, 1, 0, ?3)",
            params![rider.id.to_string(), rider.name, to_db_time(&rider.created_at)],
        )?;

        Ok(rider)
    }

    /// Turn distance collection on or off for a rider.
    pub fn set_km_collection(&self, rider_id: Uuid, enabled: bool) -> Result<(), TrackingError> {
        let changed = self.conn.execute(
            "UPDATE riders SET km_collection_enabled = ?1 WHERE id = ?2",
            params![enabled, rider_id.to_string()],
        )?;
        if changed == 0 {
            return Err(TrackingError::UnknownEntity {
                kind: "rider",
                id: rider_id,
            });
        }
        Ok(())
    }

    /// Add a rider to a group.
    pub fn add_membership(&self, rider_id: Uuid, group_id: Uuid) -> Result<(), TrackingError> {
        let tree = self.tree();
        if tree.rider(rider_id)?.is_none() {
            return Err(TrackingError::UnknownEntity {
                kind: "rider",
                id: rider_id,
            });
        }
        tree.require_group(group_id)?;

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO group_memberships (rider_id, group_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                rider_id.to_string(),
                group_id.to_string(),
                to_db_time(&Utc::now())
            ],
        )?;
        if inserted == 0 {
            return Err(TrackingError::Validation(format!(
                "rider {} is already a member of group {}",
                rider_id, group_id
            )));
        }
        Ok(())
    }

    /// Remove a rider from a group. Returns whether a membership existed.
    pub fn remove_membership(&self, rider_id: Uuid, group_id: Uuid) -> Result<bool, TrackingError> {
        let removed = self.conn.execute(
            "DELETE FROM group_memberships WHERE rider_id = ?1 AND group_id = ?2",
            params![rider_id.to_string(), group_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Register a device.
    pub fn create_device(&self, name: &str) -> Result<Device, TrackingError> {
        let device = Device {
            id: Uuid::new_v4(),
            name: name.to_string(),
            distance_total: 0.0,
            last_active: None,
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO devices (id, name, distance_total, created_at) VALUES (?1, ?2, 0, ?3)",
            params![device.id.to_string(), device.name, to_db_time(&device.created_at)],
        )?;

        Ok(device)
    }

    /// Recompute `distance_total` for every group in a subtree from the ledger.
    ///
    /// Each group ends up with the sum of entries produced while a rider sat in
    /// that group or one of its descendants. Returns the new total of `group_id`.
    pub fn recalculate_totals(&self, group_id: Uuid) -> Result<f64, TrackingError> {
        let tree = self.tree();
        tree.require_group(group_id)?;

        let mut root_total = 0.0;
        for member in tree.descendants(group_id)? {
            let subtree = tree.descendants(member)?;
            let total = self.ledger_sum(&subtree)?;

            self.conn.execute(
                "UPDATE groups SET distance_total = ?1 WHERE id = ?2",
                params![total, member.to_string()],
            )?;

            if member == group_id {
                root_total = total;
            }
        }

        tracing::info!("Recalculated totals below group {}: {:.3} km", group_id, root_total);
        Ok(root_total)
    }

    fn ledger_sum(&self, groups: &[Uuid]) -> Result<f64, TrackingError> {
        let placeholders = vec!["?"; groups.len()].join(", ");
        let sql = format!(
            "SELECT COALESCE(SUM(distance_km), 0) FROM ledger_entries WHERE group_at_time IN ({})",
            placeholders
        );
        let ids = groups.iter().map(|g| g.to_string());
        let total: f64 = self
            .conn
            .query_row(&sql, params_from_iter(ids), |row| row.get(0))?;
        Ok(total)
    }
}
