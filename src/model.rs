//! Record types stored in the registry.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_TAG, USER_TAG};

/// A tenant. Every other record lives inside exactly one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A principal that can own things, belong to groups, and be granted access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub domain_id: String,
    pub attributes: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Whether a group may contain other groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Members are users only.
    SingleLevel,
    /// Members may be users or other groups.
    Nested,
}

/// A named set of users and (for nested groups) other groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: String,
    pub domain_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub admin_ids: BTreeSet<String>,
    pub kind: GroupKind,
    pub created_at: u64,
    pub updated_at: u64,
}

/// What a grant or membership row names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    #[inline]
    pub(crate) fn tag(self) -> &'static str {
        match self {
            SubjectKind::User => USER_TAG,
            SubjectKind::Group => GROUP_TAG,
        }
    }

    #[inline]
    pub(crate) fn from_tag(tag: &str) -> Option<SubjectKind> {
        match tag {
            USER_TAG => Some(SubjectKind::User),
            GROUP_TAG => Some(SubjectKind::Group),
            _ => None,
        }
    }
}

/// A category of entities, declared per domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: String,
    pub domain_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A kind of access that can be granted, declared per domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionType {
    pub id: String,
    pub domain_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A shareable resource. Entities form a forest through parent pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub domain_id: String,
    pub entity_type_id: String,
    pub owner_id: String,
    pub parent_entity_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub full_text: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields for creating an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInit {
    pub id: String,
    pub entity_type_id: String,
    pub owner_id: String,
    pub parent_entity_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub full_text: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Stored payload of a grant row. Everything else lives in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub cascade: bool,
    pub granted_by: String,
    pub granted_at: u64,
}

/// One grant row assembled from its key and stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub domain_id: String,
    pub entity_id: String,
    pub permission_type_id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    /// Whether the grant also covers descendants of the entity.
    pub cascade: bool,
    pub granted_by: String,
    pub granted_at: u64,
}

/// Text comparison used by search filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Match {
    Eq(String),
    /// Case-insensitive substring.
    Like(String),
    Not(String),
}

/// One search predicate. A search matches entities that satisfy every filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchFilter {
    Name(Match),
    Description(Match),
    FullText(Match),
    EntityType(String),
    Owner(String),
    ParentEntity(String),
    /// Restrict the visibility check to this permission type.
    Permission(String),
    CreatedAfter(u64),
    CreatedBefore(u64),
    UpdatedAfter(u64),
    UpdatedBefore(u64),
}
