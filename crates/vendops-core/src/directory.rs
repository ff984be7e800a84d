//! # Machine Directory
//!
//! Lookup index over machines and their processor assignments.
//!
//! ## Processor Resolution
//! ```text
//! processor_at("vm-1", t)
//!      │
//!      ├── assignment for vm-1 active at t?  ──► its processor_id
//!      │   (latest effective_start wins)
//!      │
//!      ├── Machine.processor_id set?         ──► that processor
//!      │
//!      └── otherwise                         ──► None ("(unmapped)")
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{Machine, ProcessorAssignment};

/// Borrowed index over a snapshot's machines and assignments.
#[derive(Debug, Clone, Default)]
pub struct MachineDirectory<'a> {
    machines: HashMap<&'a str, &'a Machine>,
    assignments: HashMap<&'a str, Vec<&'a ProcessorAssignment>>,
}

impl<'a> MachineDirectory<'a> {
    /// Indexes machines and assignments. Later duplicates of a machine id
    /// replace earlier ones.
    pub fn new(machines: &'a [Machine], assignments: &'a [ProcessorAssignment]) -> Self {
        let machines = machines.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut by_machine: HashMap<&'a str, Vec<&'a ProcessorAssignment>> = HashMap::new();
        for assignment in assignments {
            by_machine
                .entry(assignment.machine_id.as_str())
                .or_default()
                .push(assignment);
        }

        MachineDirectory {
            machines,
            assignments: by_machine,
        }
    }

    /// Checks if the machine exists in the snapshot.
    pub fn contains(&self, machine_id: &str) -> bool {
        self.machines.contains_key(machine_id)
    }

    /// The machine's location, if placed.
    pub fn location_of(&self, machine_id: &str) -> Option<&'a str> {
        self.machines
            .get(machine_id)
            .and_then(|m| m.location_id.as_deref())
    }

    /// The processor handling the machine's card sales at `at`.
    pub fn processor_at(&self, machine_id: &str, at: DateTime<Utc>) -> Option<&'a str> {
        let assigned = self.assignments.get(machine_id).and_then(|list| {
            list.iter()
                .enumerate()
                .filter(|(_, a)| a.window().contains(at))
                .max_by_key(|(idx, a)| (a.effective_start, *idx))
                .map(|(_, a)| a.processor_id.as_str())
        });

        assigned.or_else(|| {
            self.machines
                .get(machine_id)
                .and_then(|m| m.processor_id.as_deref())
        })
    }

    /// Ids of every machine placed at `location_id`.
    pub fn machines_at(&self, location_id: &str) -> Vec<&'a str> {
        let mut ids: Vec<&'a str> = self
            .machines
            .values()
            .filter(|m| m.location_id.as_deref() == Some(location_id))
            .map(|m| m.id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}
