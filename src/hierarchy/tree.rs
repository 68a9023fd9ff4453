//! Read-only lookups over the group tree.
//!
//! Every walk is iterative and bounded by a visited set; a revisited id is
//! reported as [`TrackingError::CycleDetected`].

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::{Device, Group, Rider};
use crate::error::TrackingError;
use crate::storage::database::{opt_time_at, opt_uuid_at, time_at, uuid_at};

/// Lookup facade over groups, riders and devices.
pub struct GroupHierarchy<'a> {
    conn: &'a Connection,
}

impl<'a> GroupHierarchy<'a> {
    /// Create a hierarchy view on a connection or transaction.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a group by ID.
    pub fn group(&self, id: Uuid) -> Result<Option<Group>, TrackingError> {
        self.conn
            .query_row(
                "SELECT id, name, parent_id, distance_total, coins_total, is_visible, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                parse_group_row,
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// Get a group, failing if it does not exist.
    pub fn require_group(&self, id: Uuid) -> Result<Group, TrackingError> {
        self.group(id)?
            .ok_or(TrackingError::UnknownEntity { kind: "group", id })
    }

    /// Parent of a group.
    pub fn parent_of(&self, id: Uuid) -> Result<Option<Uuid>, TrackingError> {
        let parent: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT parent_id FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match parent {
            None => Err(TrackingError::UnknownEntity { kind: "group", id }),
            Some(None) => Ok(None),
            Some(Some(text)) => Uuid::parse_str(&text).map(Some).map_err(|e| {
                TrackingError::InconsistentState(format!("group {} has bad parent id: {}", id, e))
            }),
        }
    }

    /// Direct children of a group.
    pub fn children(&self, id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM groups WHERE parent_id = ?1 ORDER BY created_at, id")?;
        let rows = stmt.query_map(params![id.to_string()], |row| uuid_at(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    /// Whether riders belong to this group directly.
    pub fn has_members(&self, id: Uuid) -> Result<bool, TrackingError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM group_memberships WHERE group_id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// A leaf has no children or has direct members.
    pub fn is_leaf(&self, id: Uuid) -> Result<bool, TrackingError> {
        let has_children: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE parent_id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(!has_children || self.has_members(id)?)
    }

    /// Ancestors of a group, nearest first.
    pub fn ancestors(&self, id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut visited = HashSet::from([id]);
        let mut chain = Vec::new();
        let mut current = self.parent_of(id)?;

        while let Some(parent) = current {
            if !visited.insert(parent) {
                return Err(TrackingError::CycleDetected(parent));
            }
            chain.push(parent);
            current = self.parent_of(parent)?;
        }

        Ok(chain)
    }

    /// The group followed by all of its ancestors.
    pub fn chain(&self, id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut chain = vec![id];
        chain.extend(self.ancestors(id)?);
        Ok(chain)
    }

    /// Root ancestor of a group (the group itself when it has no parent).
    pub fn top_group(&self, id: Uuid) -> Result<Uuid, TrackingError> {
        Ok(self.ancestors(id)?.last().copied().unwrap_or(id))
    }

    /// The group and everything below it, breadth first.
    pub fn descendants(&self, id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut visited = HashSet::from([id]);
        let mut ordered = vec![id];
        let mut queue = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for child in self.children(current)? {
                if !visited.insert(child) {
                    return Err(TrackingError::CycleDetected(child));
                }
                ordered.push(child);
                queue.push_back(child);
            }
        }

        Ok(ordered)
    }

    /// Visible leaf groups in the subtree, the group itself included.
    pub fn leaf_groups_under(&self, id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut leaves = Vec::new();
        for candidate in self.descendants(id)? {
            let visible = self
                .group(candidate)?
                .map(|g| g.is_visible)
                .unwrap_or(false);
            if visible && self.is_leaf(candidate)? {
                leaves.push(candidate);
            }
        }
        Ok(leaves)
    }

    /// Get a rider by ID.
    pub fn rider(&self, id: Uuid) -> Result<Option<Rider>, TrackingError> {
        self.conn
            .query_row(
                "SELECT id, name, km_collection_enabled, distance_total, last_active, created_at
                 FROM riders WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Rider {
                        id: uuid_at(row, 0)?,
                        name: row.get(1)?,
                        km_collection_enabled: row.get(2)?,
                        distance_total: row.get(3)?,
                        last_active: opt_time_at(row, 4)?,
                        created_at: time_at(row, 5)?,
                    })
                },
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// Groups a rider currently belongs to, in membership order.
    pub fn rider_groups(&self, rider_id: Uuid) -> Result<Vec<Uuid>, TrackingError> {
        let mut stmt = self.conn.prepare(
            "SELECT group_id FROM group_memberships WHERE rider_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![rider_id.to_string()], |row| uuid_at(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    /// Get a device by ID.
    pub fn device(&self, id: Uuid) -> Result<Option<Device>, TrackingError> {
        self.conn
            .query_row(
                "SELECT id, name, distance_total, last_active, created_at
                 FROM devices WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Device {
                        id: uuid_at(row, 0)?,
                        name: row.get(1)?,
                        distance_total: row.get(2)?,
                        last_active: opt_time_at(row, 3)?,
                        created_at: time_at(row, 4)?,
                    })
                },
            )
            .optional()
            .map_err(TrackingError::from)
    }
}

/// Parse a database row into a Group.
pub(crate) fn parse_group_row(row: &rusqlite::Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        parent_id: opt_uuid_at(row, 2)?,
        distance_total: row.get(3)?,
        coins_total: row.get(4)?,
        is_visible: row.get(5)?,
        created_at: time_at(row, 6)?,
    })
}
