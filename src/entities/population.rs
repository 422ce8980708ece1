//! population.rs
//! The immutable snapshot an evaluation runs against: person ids, group
//! memberships and externally supplied input columns.

use super::{EntityError, EntityModel};
use crate::compute::Column;
use crate::period::Period;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SNAPSHOT: AtomicU64 = AtomicU64::new(1);

/// Membership relation of one group entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    group_ids: Vec<String>,
    /// Group index of every person, in person order.
    group_of: Vec<usize>,
    /// Role key of every person inside its group.
    roles: Vec<Option<String>>,
    /// Person indices of every group, in person order.
    members: Vec<Vec<usize>>,
}

impl Membership {
    pub fn group_count(&self) -> usize { self.group_ids.len() }

    pub fn person_count(&self) -> usize { self.group_of.len() }

    pub fn group_ids(&self) -> &[String] { &self.group_ids }

    pub fn group_of(&self) -> &[usize] { &self.group_of }

    pub fn role_of(&self, person: usize) -> Option<&str> {
        self.roles.get(person).and_then(|r| r.as_deref())
    }

    pub fn members_of(&self, group: usize) -> &[usize] {
        self.members.get(group).map(|m| m.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Input {
    entity: String,
    column: Column,
}

#[derive(Debug, Clone)]
pub struct Population {
    snapshot_id: u64,
    person_key: String,
    person_ids: Vec<String>,
    memberships: BTreeMap<String, Membership>,
    inputs: HashMap<(String, Period), Input>,
}

impl Population {
    pub fn builder(model: &EntityModel) -> PopulationBuilder<'_> { PopulationBuilder::new(model) }

    /// Unique per built snapshot; caches compare it to detect a swapped population.
    pub fn snapshot_id(&self) -> u64 { self.snapshot_id }

    pub fn person_count(&self) -> usize { self.person_ids.len() }

    pub fn person_ids(&self) -> &[String] { &self.person_ids }

    pub fn membership(&self, group_key: &str) -> Option<&Membership> { self.memberships.get(group_key) }

    /// Number of instances of an entity type.
    pub fn count(&self, entity_key: &str) -> Option<usize> {
        if entity_key == self.person_key {
            Some(self.person_ids.len())
        } else {
            self.memberships.get(entity_key).map(|m| m.group_count())
        }
    }

    /// The input supplied for `name` at exactly `period`, with its entity key.
    pub fn input(&self, name: &str, period: &Period) -> Option<(&str, &Column)> {
        self.inputs
            .get(&(name.to_string(), *period))
            .map(|i| (i.entity.as_str(), &i.column))
    }

    pub fn has_input(&self, name: &str) -> bool { self.inputs.keys().any(|(n, _)| n == name) }

    /// Every input supplied for `name` as `(period, entity, column)`, in period order.
    pub fn inputs_of(&self, name: &str) -> Vec<(Period, &str, &Column)> {
        let mut found: Vec<(Period, &str, &Column)> = self
            .inputs
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|((_, period), input)| (*period, input.entity.as_str(), &input.column))
            .collect();
        found.sort_by_key(|(period, _, _)| *period);
        found
    }
}

/// Collects persons, groups and inputs; everything is validated in `build`.
pub struct PopulationBuilder<'m> {
    model: &'m EntityModel,
    person_ids: Vec<String>,
    groups: BTreeMap<String, Vec<(String, Vec<(String, Option<String>)>)>>,
    inputs: Vec<(String, String, Period, Column)>,
}

impl<'m> PopulationBuilder<'m> {
    pub fn new(model: &'m EntityModel) -> Self {
        Self { model, person_ids: Vec::new(), groups: BTreeMap::new(), inputs: Vec::new() }
    }

    pub fn person(mut self, id: &str) -> Self {
        self.person_ids.push(id.to_string());
        self
    }

    pub fn persons<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.person_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declares one group instance. Members are `(person id, role key)` pairs;
    /// pass an empty role for groups without roles.
    pub fn group(mut self, entity: &str, id: &str, members: &[(&str, &str)]) -> Self {
        let members = members
            .iter()
            .map(|(p, r)| (p.to_string(), if r.is_empty() { None } else { Some(r.to_string()) }))
            .collect();
        self.groups.entry(entity.to_string()).or_default().push((id.to_string(), members));
        self
    }

    pub fn input(mut self, name: &str, entity: &str, period: Period, column: Column) -> Self {
        self.inputs.push((name.to_string(), entity.to_string(), period, column));
        self
    }

    pub fn build(self) -> Result<Population, EntityError> {
        let person_key = self.model.person().key.clone();

        // 1. Person ids
        let mut person_index = HashMap::with_capacity(self.person_ids.len());
        for (i, id) in self.person_ids.iter().enumerate() {
            if person_index.insert(id.as_str(), i).is_some() {
                return Err(EntityError::DuplicateId { entity: person_key, id: id.clone() });
            }
        }

        for entity in self.groups.keys() {
            if self.model.group(entity).is_none() {
                return Err(EntityError::UnknownEntity(entity.clone()));
            }
        }

        // 2. Memberships, one relation per group type of the model
        let mut memberships = BTreeMap::new();
        for kind in self.model.groups() {
            let declared = self.groups.get(&kind.key).map(|g| g.as_slice()).unwrap_or(&[]);
            let mut group_ids = Vec::with_capacity(declared.len());
            let mut seen_groups = HashSet::new();
            let mut group_of: Vec<Option<usize>> = vec![None; self.person_ids.len()];
            let mut roles: Vec<Option<String>> = vec![None; self.person_ids.len()];

            for (g, (group_id, members)) in declared.iter().enumerate() {
                if !seen_groups.insert(group_id.as_str()) {
                    return Err(EntityError::DuplicateId { entity: kind.key.clone(), id: group_id.clone() });
                }
                group_ids.push(group_id.clone());

                let mut role_counts: HashMap<&str, usize> = HashMap::new();
                for (person, role) in members {
                    let p = *person_index.get(person.as_str()).ok_or_else(|| EntityError::UnknownMember {
                        entity: kind.key.clone(),
                        group: group_id.clone(),
                        person: person.clone(),
                    })?;
                    if group_of[p].is_some() {
                        return Err(EntityError::MultipleMemberships { entity: kind.key.clone(), person: person.clone() });
                    }
                    if let Some(role) = role {
                        let role_def = kind.role(role).ok_or_else(|| EntityError::UnknownRole {
                            entity: kind.key.clone(),
                            role: role.clone(),
                        })?;
                        let count = role_counts.entry(role.as_str()).or_insert(0);
                        *count += 1;
                        if let Some(max) = role_def.max {
                            if *count > max {
                                return Err(EntityError::RoleCapacity {
                                    entity: kind.key.clone(),
                                    group: group_id.clone(),
                                    role: role.clone(),
                                    max,
                                });
                            }
                        }
                    }
                    group_of[p] = Some(g);
                    roles[p] = role.clone();
                }
            }

            let mut resolved = Vec::with_capacity(group_of.len());
            let mut members = vec![Vec::new(); group_ids.len()];
            for (p, g) in group_of.into_iter().enumerate() {
                let g = g.ok_or_else(|| EntityError::MissingMembership {
                    entity: kind.key.clone(),
                    person: self.person_ids[p].clone(),
                })?;
                members[g].push(p);
                resolved.push(g);
            }

            memberships.insert(kind.key.clone(), Membership { group_ids, group_of: resolved, roles, members });
        }

        // 3. Inputs
        let mut inputs = HashMap::with_capacity(self.inputs.len());
        for (name, entity, period, column) in self.inputs {
            let expected = if entity == person_key {
                self.person_ids.len()
            } else {
                memberships
                    .get(&entity)
                    .map(|m: &Membership| m.group_count())
                    .ok_or_else(|| EntityError::UnknownEntity(entity.clone()))?
            };
            if column.len() != expected {
                return Err(EntityError::LengthMismatch { name, entity, expected, actual: column.len() });
            }
            inputs.insert((name, period), Input { entity, column });
        }

        Ok(Population {
            snapshot_id: NEXT_SNAPSHOT.fetch_add(1, Ordering::Relaxed),
            person_key,
            person_ids: self.person_ids,
            memberships,
            inputs,
        })
    }
}
