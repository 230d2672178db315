use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::part::Part;
use super::scope::{AuthorizationRecord, ScopeBoundary};
use crate::errors::ProjectError;

/// Identifier of a part within its project, displayed as `part-NN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(pub u32);

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part-{:02}", self.0)
    }
}

impl FromStr for PartId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix("part-").unwrap_or(s.trim());
        digits
            .parse::<u32>()
            .map(PartId)
            .map_err(|_| format!("invalid part id '{s}'"))
    }
}

/// The original requirement, frozen at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedRequirement {
    pub text: String,
    /// Hex SHA-256 of `text`.
    pub digest: String,
    pub locked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    requirement: Option<LockedRequirement>,
    scope: ScopeBoundary,
    #[serde(default)]
    authorizations: Vec<AuthorizationRecord>,
    pub parts: Vec<Part>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
            requirement: None,
            scope: ScopeBoundary::default(),
            authorizations: Vec::new(),
            parts: Vec::new(),
        }
    }

    /// Lock the original requirement. This succeeds exactly once; the locked
    /// text also seeds the scope boundary.
    pub fn lock_requirement(&mut self, text: &str) -> Result<&LockedRequirement, ProjectError> {
        if self.requirement.is_some() {
            return Err(ProjectError::RequirementLocked);
        }
        if text.trim().is_empty() {
            return Err(ProjectError::EmptyRequirement);
        }
        self.scope = ScopeBoundary::from_requirement(text);
        Ok(self.requirement.insert(LockedRequirement {
            text: text.to_string(),
            digest: format!("{:x}", Sha256::digest(text.as_bytes())),
            locked_at: Utc::now(),
        }))
    }

    pub fn requirement(&self) -> Option<&LockedRequirement> {
        self.requirement.as_ref()
    }

    pub fn scope(&self) -> &ScopeBoundary {
        &self.scope
    }

    /// Append a new part with the given budget allocation.
    pub fn add_part(&mut self, name: impl Into<String>, budget_points: u32) -> PartId {
        let id = PartId(self.parts.len() as u32 + 1);
        self.parts.push(Part::new(id, name, budget_points));
        id
    }

    pub fn part(&self, id: PartId) -> Option<&Part> {
        self.parts.iter().find(|p| p.id == id)
    }

    pub fn part_mut(&mut self, id: PartId) -> Option<&mut Part> {
        self.parts.iter_mut().find(|p| p.id == id)
    }

    pub fn authorizations(&self) -> &[AuthorizationRecord] {
        &self.authorizations
    }

    pub fn authorization(&self, id: &str) -> Option<&AuthorizationRecord> {
        self.authorizations.iter().find(|a| a.id == id)
    }

    /// Append an authorization record. Ids are unique and records are never
    /// removed.
    pub fn record_authorization(&mut self, record: AuthorizationRecord) -> Result<(), ProjectError> {
        if record.id.trim().is_empty() {
            return Err(ProjectError::EmptyAuthorization);
        }
        if self.authorization(&record.id).is_some() {
            return Err(ProjectError::DuplicateAuthorization(record.id));
        }
        self.authorizations.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthorizationScope;

    #[test]
    fn test_requirement_is_write_once() {
        let mut project = Project::new("shop");
        let digest = project
            .lock_requirement("Users can check out\nUsers get a receipt")
            .unwrap()
            .digest
            .clone();
        assert_eq!(digest.len(), 64);

        let err = project.lock_requirement("something else").unwrap_err();
        assert_eq!(err, ProjectError::RequirementLocked);
        assert_eq!(
            project.requirement().unwrap().text,
            "Users can check out\nUsers get a receipt"
        );
    }

    #[test]
    fn test_empty_requirement_rejected() {
        let mut project = Project::new("shop");
        assert_eq!(
            project.lock_requirement("  \n ").unwrap_err(),
            ProjectError::EmptyRequirement
        );
        assert!(project.requirement().is_none());
    }

    #[test]
    fn test_locking_seeds_scope_boundary() {
        let mut project = Project::new("shop");
        project.lock_requirement("line one\n\nline three").unwrap();
        assert!(project.scope().contains(1));
        assert!(!project.scope().contains(2));
        assert!(project.scope().contains(3));
    }

    #[test]
    fn test_parts_are_numbered_from_one() {
        let mut project = Project::new("shop");
        let a = project.add_part("checkout", 25);
        let b = project.add_part("receipts", 10);
        assert_eq!(a, PartId(1));
        assert_eq!(b, PartId(2));
        assert_eq!(project.part(b).unwrap().budget_points, 10);
        assert!(project.part(PartId(3)).is_none());
    }

    #[test]
    fn test_authorizations_are_unique() {
        let mut project = Project::new("shop");
        let record = AuthorizationRecord::new(
            "AUTH-1",
            AuthorizationScope::Budget { part: PartId(1) },
            "lead",
        );
        project.record_authorization(record.clone()).unwrap();
        assert_eq!(
            project.record_authorization(record).unwrap_err(),
            ProjectError::DuplicateAuthorization("AUTH-1".into())
        );
        assert_eq!(project.authorizations().len(), 1);
    }

    #[test]
    fn test_part_id_parse_and_display() {
        assert_eq!("part-07".parse::<PartId>().unwrap(), PartId(7));
        assert_eq!("3".parse::<PartId>().unwrap(), PartId(3));
        assert!("part-x".parse::<PartId>().is_err());
        assert_eq!(PartId(12).to_string(), "part-12");
    }
}
