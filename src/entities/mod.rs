//! Entity model: the atomic person entity and the group entities built from it.
//!
//! Membership is an explicit relation held by the population snapshot
//! (`Membership`), and aggregation is a free function over that relation.
pub mod aggregate;
pub mod population;

pub use aggregate::{aggregate, project, AggregateOp};
pub use population::{Membership, Population, PopulationBuilder};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("Duplicate {entity} id '{id}'")]
    DuplicateId { entity: String, id: String },
    #[error("Group {entity} '{group}' lists unknown person '{person}'")]
    UnknownMember { entity: String, group: String, person: String },
    #[error("Person '{person}' belongs to more than one {entity}")]
    MultipleMemberships { entity: String, person: String },
    #[error("Person '{person}' belongs to no {entity}")]
    MissingMembership { entity: String, person: String },
    #[error("Unknown role '{role}' for entity {entity}")]
    UnknownRole { entity: String, role: String },
    #[error("Group {entity} '{group}' exceeds the capacity of role '{role}' ({max})")]
    RoleCapacity { entity: String, group: String, role: String, max: usize },
    #[error("Input '{name}' has {actual} values but entity {entity} has {expected} instances")]
    LengthMismatch { name: String, entity: String, expected: usize, actual: usize },
}

/// A role a person can hold inside a group (e.g. "adult" in a family).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub key: String,
    pub plural: String,
    /// Maximum number of members holding this role in one group.
    #[serde(default)]
    pub max: Option<usize>,
}

impl Role {
    pub fn new(key: &str, plural: &str) -> Self {
        Self { key: key.into(), plural: plural.into(), max: None }
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKind {
    pub key: String,
    pub plural: String,
    #[serde(default)]
    pub label: String,
    /// Empty for the person entity; groups without roles accept any member.
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl EntityKind {
    pub fn new(key: &str, plural: &str) -> Self {
        Self { key: key.into(), plural: plural.into(), label: String::new(), roles: Vec::new() }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn role(&self, key: &str) -> Option<&Role> { self.roles.iter().find(|r| r.key == key) }
}

/// The person entity plus every group entity type defined over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
    person: EntityKind,
    groups: Vec<EntityKind>,
}

impl EntityModel {
    pub fn new(person: EntityKind, groups: Vec<EntityKind>) -> Result<Self, EntityError> {
        let mut seen = std::collections::HashSet::new();
        for kind in std::iter::once(&person).chain(groups.iter()) {
            if !seen.insert(kind.key.as_str()) {
                return Err(EntityError::DuplicateId { entity: "entity".into(), id: kind.key.clone() });
            }
        }
        Ok(Self { person, groups })
    }

    pub fn person(&self) -> &EntityKind { &self.person }

    pub fn groups(&self) -> &[EntityKind] { &self.groups }

    pub fn group(&self, key: &str) -> Option<&EntityKind> { self.groups.iter().find(|g| g.key == key) }

    pub fn kind(&self, key: &str) -> Option<&EntityKind> {
        if self.person.key == key { Some(&self.person) } else { self.group(key) }
    }

    pub fn is_person(&self, key: &str) -> bool { self.person.key == key }
}
