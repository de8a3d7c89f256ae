//! Multi-tenant sharing and access-control registry over LMDB.
//!
//! Domains are tenants. Each holds users, nested user groups, typed
//! entities arranged in a parent forest, and permission types. Owners share
//! entities with users or groups, optionally cascading down the hierarchy,
//! and the registry answers whether a user holds a permission on an entity.
//!
//! All state lives in one LMDB environment; every mutating call validates
//! and writes inside a single transaction.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! fn main() -> entitle::Result<()> {
//!     entitle::init("./data/registry")?;
//!     entitle::create_domain("lab", "Research Lab", None)?;
//!     entitle::create_user("lab", "alice", BTreeMap::new())?;
//!     entitle::create_user("lab", "bob", BTreeMap::new())?;
//!     entitle::create_entity_type("lab", "project", "Project", None)?;
//!     entitle::create_permission_type("lab", "read", "Read", None)?;
//!     entitle::create_entity(
//!         "lab",
//!         entitle::EntityInit {
//!             id: "proj-1".into(),
//!             entity_type_id: "project".into(),
//!             owner_id: "alice".into(),
//!             parent_entity_id: None,
//!             name: "Project One".into(),
//!             description: None,
//!             full_text: None,
//!             metadata: BTreeMap::new(),
//!         },
//!     )?;
//!     entitle::share_entity_with_users("lab", "proj-1", &["bob"], "read", true, "alice")?;
//!     assert!(entitle::user_has_access("lab", "bob", "proj-1", "read")?);
//!     Ok(())
//! }
//! ```

mod access;
mod catalog;
mod constants;
mod db;
mod domains;
mod error;
mod grants;
mod hierarchy;
pub mod keys;
mod membership;
mod model;
mod principals;

pub use access::{get_list_of_shared_groups, get_list_of_shared_users, user_has_access};
pub use catalog::{
    create_entity, create_entity_type, create_permission_type, delete_entity, delete_entity_type,
    delete_permission_type, entity_exists, entity_type_exists, get_entity, get_entity_type,
    get_entity_types, get_permission_type, get_permission_types, permission_type_exists,
    reparent_entity, search_entities, update_entity, update_entity_type, update_permission_type,
};
pub use constants::OWNER_PERMISSION_ID;
pub use db::{clear_all, init, init_with, test_lock, Options};
pub use domains::{
    create_domain, delete_domain, domain_exists, get_domain, get_domains, update_domain,
};
pub use error::{Error, Result};
pub use grants::{
    get_entity_grants, get_list_of_directly_shared_groups, get_list_of_directly_shared_users,
    revoke_entity_sharing_from_groups, revoke_entity_sharing_from_users, share_entity_with_groups,
    share_entity_with_users,
};
pub use hierarchy::{ancestors_of, descendants_of};
pub use membership::{get_all_member_groups_for_user, is_member};
pub use model::{
    Domain, Entity, EntityInit, EntityType, Grant, GrantRecord, GroupKind, Match, PermissionType,
    SearchFilter, SubjectKind, User, UserGroup,
};
pub use principals::{
    add_child_groups_to_parent_group, add_group_admins, add_users_to_group, create_group,
    create_user, delete_group, delete_user, get_group, get_group_members_of_type_group,
    get_group_members_of_type_user, get_groups, get_user, get_users, group_exists,
    has_admin_access, has_owner_access, remove_child_group_from_parent_group, remove_group_admins,
    remove_users_from_group, transfer_group_ownership, update_group, update_user, user_exists,
};
