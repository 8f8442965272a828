//! Slot-to-officer assignment mapping.
//!
//! An [`AssignmentMap`] holds one officer set per catalog slot. Every
//! mutation goes through [`AssignmentMap::move_officer`], which removes the
//! officer from all slots before adding it to the destination, so an officer
//! id is never present in two slots at once.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Officer, OfficerId};
use crate::slot::{SlotCatalog, SlotName};

/// One persisted `(officer, slot)` pair from the assignment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub id: Uuid,
    pub officer_id: OfficerId,
    pub slot: SlotName,
    /// Milliseconds since the Unix epoch of the last insert or update.
    pub updated_at: u64,
}

/// Officer sets for every slot in a catalog, in catalog order.
///
/// Slots with nobody posted are present as empty sets so a renderer can
/// draw every slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssignmentMap {
    slots: Vec<(SlotName, BTreeSet<OfficerId>)>,
}

impl AssignmentMap {
    /// A map with every catalog slot present and empty.
    pub fn empty(catalog: &SlotCatalog) -> Self {
        Self {
            slots: catalog
                .iter()
                .map(|name| (name.clone(), BTreeSet::new()))
                .collect(),
        }
    }

    /// Bucket persisted rows into the catalog.
    ///
    /// Rows naming a slot outside the catalog are skipped. If the table holds
    /// more than one row for an officer, the most recently updated row wins.
    pub fn from_rows(catalog: &SlotCatalog, rows: &[AssignmentRow]) -> Self {
        let mut latest: HashMap<&OfficerId, &AssignmentRow> = HashMap::new();
        for row in rows {
            if !catalog.contains(&row.slot) {
                tracing::warn!(
                    officer_id = %row.officer_id,
                    slot = %row.slot,
                    "assignment row references unknown slot, skipping"
                );
                continue;
            }
            match latest.get(&row.officer_id) {
                Some(existing) if existing.updated_at > row.updated_at => {
                    tracing::warn!(officer_id = %row.officer_id, "duplicate assignment rows");
                }
                Some(_) => {
                    tracing::warn!(officer_id = %row.officer_id, "duplicate assignment rows");
                    latest.insert(&row.officer_id, row);
                }
                None => {
                    latest.insert(&row.officer_id, row);
                }
            }
        }

        let mut map = Self::empty(catalog);
        for row in latest.values() {
            map.move_officer(&row.officer_id, Some(&row.slot));
        }
        map
    }

    /// Move `officer_id` to `destination`, or out of every slot when
    /// `destination` is `None`.
    ///
    /// Returns `false` (after still removing the officer from its old slot)
    /// if `destination` is not one of this map's slots.
    pub fn move_officer(&mut self, officer_id: &OfficerId, destination: Option<&SlotName>) -> bool {
        for (_, officers) in &mut self.slots {
            officers.remove(officer_id);
        }
        let Some(destination) = destination else {
            return true;
        };
        match self.slots.iter_mut().find(|(name, _)| name == destination) {
            Some((_, officers)) => {
                officers.insert(officer_id.clone());
                true
            }
            None => false,
        }
    }

    /// Slot currently holding `officer_id`, if any.
    pub fn slot_of(&self, officer_id: &OfficerId) -> Option<&SlotName> {
        self.slots
            .iter()
            .find(|(_, officers)| officers.contains(officer_id))
            .map(|(name, _)| name)
    }

    /// Officers posted to `slot`. `None` if the slot is not in the map.
    pub fn officers_in(&self, slot: &SlotName) -> Option<&BTreeSet<OfficerId>> {
        self.slots
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, officers)| officers)
    }

    /// Whether `officer_id` sits exactly where `expected` says.
    pub fn places(&self, officer_id: &OfficerId, expected: Option<&SlotName>) -> bool {
        self.slot_of(officer_id) == expected
    }

    /// Slots and their officer sets, in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&SlotName, &BTreeSet<OfficerId>)> {
        self.slots.iter().map(|(name, officers)| (name, officers))
    }

    /// Officers from `officers` that sit in no slot, in the given order.
    /// This is the unassigned pool.
    pub fn unassigned<'a>(&self, officers: &'a [Officer]) -> Vec<&'a Officer> {
        officers
            .iter()
            .filter(|officer| self.slot_of(&officer.id).is_none())
            .collect()
    }

    /// `true` if no officer id appears in more than one slot.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.slots
            .iter()
            .flat_map(|(_, officers)| officers.iter())
            .all(|id| seen.insert(id))
    }
}
