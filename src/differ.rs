//! Snapshot-to-snapshot diff of call-stack allocations
//!
//! Keys of the first snapshot are walked in ascending order. A key whose
//! allocation list was extended by a later occurrence of its tag is reported
//! as a same-file transition. Every other key is paired with the first
//! not-yet-matched key of the second snapshot carrying the same tag text.
//! Keys left over on either side are reported on their own.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::allocation::{Allocation, SnapshotRecordSet, TagKey};

const RULE: &str = "------------------------------------------------------";

/// How one address changed between two allocation lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationChange {
    Grew { address: u64, from: u64, to: u64 },
    Shrank { address: u64, from: u64, to: u64 },
    Unchanged { address: u64, size: u64 },
    Added(Allocation),
    Removed(Allocation),
}

impl fmt::Display for AllocationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grew { address, from, to } => {
                write!(f, "{:#x}: grew from {} to {} bytes", address, from, to)
            }
            Self::Shrank { address, from, to } => {
                write!(f, "{:#x}: shrank from {} to {} bytes", address, from, to)
            }
            Self::Unchanged { address, size } => {
                write!(f, "{:#x}: unchanged at {} bytes", address, size)
            }
            Self::Added(a) => write!(f, "{:#x}: added {} bytes", a.address, a.size),
            Self::Removed(a) => write!(f, "{:#x}: removed {} bytes", a.address, a.size),
        }
    }
}

/// Compare two allocation lists address by address
///
/// When an address occurs more than once in a list its first size is used.
pub fn compare_allocations(before: &[Allocation], after: &[Allocation]) -> Vec<AllocationChange> {
    let index = |list: &[Allocation]| {
        let mut map = BTreeMap::new();
        for a in list {
            map.entry(a.address).or_insert(a.size);
        }
        map
    };
    let before = index(before);
    let after = index(after);

    let mut addresses: Vec<u64> = before.keys().chain(after.keys()).copied().collect();
    addresses.sort_unstable();
    addresses.dedup();

    addresses
        .into_iter()
        .filter_map(|address| {
            let change = match (before.get(&address), after.get(&address)) {
                (Some(&from), Some(&to)) if to > from => AllocationChange::Grew { address, from, to },
                (Some(&from), Some(&to)) if to < from => {
                    AllocationChange::Shrank { address, from, to }
                }
                (Some(&size), Some(_)) => AllocationChange::Unchanged { address, size },
                (None, Some(&size)) => AllocationChange::Added(Allocation { address, size }),
                (Some(&size), None) => AllocationChange::Removed(Allocation { address, size }),
                (None, None) => return None,
            };
            Some(change)
        })
        .collect()
}

/// One line of the transition narrative
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Same tag text found in both snapshots
    Paired {
        first: TagKey,
        second: TagKey,
        before: Vec<Allocation>,
        after: Vec<Allocation>,
        changes: Vec<AllocationChange>,
    },
    /// Key extended by a later occurrence within the first snapshot
    SameFile {
        key: TagKey,
        own: Vec<Allocation>,
        appended: Vec<Allocation>,
        changes: Vec<AllocationChange>,
    },
    OnlyInFirst {
        key: TagKey,
        allocations: Vec<Allocation>,
    },
    OnlyInSecond {
        key: TagKey,
        allocations: Vec<Allocation>,
    },
}

/// Ordered transitions between two adjacent snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub first_name: String,
    pub second_name: String,
    pub transitions: Vec<Transition>,
}

impl DiffReport {
    /// Pairs of keys matched across the two snapshots
    pub fn pairs(&self) -> impl Iterator<Item = (&TagKey, &TagKey)> {
        self.transitions.iter().filter_map(|t| match t {
            Transition::Paired { first, second, .. } => Some((first, second)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Diff two snapshots' call-stack maps
pub fn diff(
    first: &SnapshotRecordSet,
    first_name: &str,
    second: &SnapshotRecordSet,
    second_name: &str,
) -> DiffReport {
    let mut candidates: BTreeMap<&str, VecDeque<&TagKey>> = BTreeMap::new();
    for key in second.keys() {
        candidates.entry(key.tag()).or_default().push_back(key);
    }

    let mut transitions = Vec::new();
    for (key, entry) in first.iter() {
        if entry.is_extended() {
            transitions.push(Transition::SameFile {
                key: key.clone(),
                own: entry.own().to_vec(),
                appended: entry.extension().to_vec(),
                changes: compare_allocations(entry.own(), entry.extension()),
            });
            continue;
        }

        let matched = candidates
            .get_mut(key.tag())
            .and_then(|queue| queue.pop_front());
        match matched.and_then(|k| second.get(k).map(|e| (k, e))) {
            Some((other, other_entry)) => transitions.push(Transition::Paired {
                first: key.clone(),
                second: other.clone(),
                before: entry.allocations().to_vec(),
                after: other_entry.allocations().to_vec(),
                changes: compare_allocations(entry.allocations(), other_entry.allocations()),
            }),
            None => transitions.push(Transition::OnlyInFirst {
                key: key.clone(),
                allocations: entry.allocations().to_vec(),
            }),
        }
    }

    let mut leftovers: Vec<&TagKey> = candidates.into_values().flatten().collect();
    leftovers.sort();
    for key in leftovers {
        if let Some(entry) = second.get(key) {
            transitions.push(Transition::OnlyInSecond {
                key: key.clone(),
                allocations: entry.allocations().to_vec(),
            });
        }
    }

    DiffReport {
        first_name: first_name.to_string(),
        second_name: second_name.to_string(),
        transitions,
    }
}

struct AllocList<'a>(&'a [Allocation]);

impl fmt::Display for AllocList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, a) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "]")
    }
}

fn write_changes(f: &mut fmt::Formatter<'_>, changes: &[AllocationChange]) -> fmt::Result {
    for change in changes {
        writeln!(f, "    {}", change)?;
    }
    Ok(())
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        for transition in &self.transitions {
            match transition {
                Transition::Paired {
                    first,
                    second,
                    before,
                    after,
                    changes,
                } => {
                    writeln!(f, "({}) {} : {}", self.first_name, first, AllocList(before))?;
                    writeln!(f, "|\n|\nV")?;
                    writeln!(f, "({}) {} : {}", self.second_name, second, AllocList(after))?;
                    write_changes(f, changes)?;
                }
                Transition::SameFile {
                    key,
                    own,
                    appended,
                    changes,
                } => {
                    writeln!(f, "({}) {} : {}", self.first_name, key, AllocList(own))?;
                    writeln!(f, "|\n|\nV (same file)")?;
                    writeln!(f, "({}) {} : {}", self.first_name, key, AllocList(appended))?;
                    write_changes(f, changes)?;
                }
                Transition::OnlyInFirst { key, allocations } => {
                    writeln!(f, "({}) {} : {}", self.first_name, key, AllocList(allocations))?;
                    writeln!(f, "    (no match in {})", self.second_name)?;
                }
                Transition::OnlyInSecond { key, allocations } => {
                    writeln!(f, "({}) {} : {}", self.second_name, key, AllocList(allocations))?;
                    writeln!(f, "    (no match in {})", self.first_name)?;
                }
            }
            writeln!(f)?;
        }
        writeln!(f, "{}", RULE)
    }
}
