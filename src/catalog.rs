//! Entity types, permission types, and the entity catalog.

use heed::RoTxn;

use crate::access;
use crate::constants::OWNER_PERMISSION_ID;
use crate::db::{self, check_id, current_epoch, delete_prefixed, Dbs};
use crate::domains::load_domain;
use crate::error::{Error, Result};
use crate::hierarchy;
use crate::keys::{build_key, build_prefix, get_part};
use crate::membership;
use crate::model::{Entity, EntityInit, EntityType, Match, PermissionType, SearchFilter};
use crate::principals::load_user;

pub(crate) fn load_entity_type(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    type_id: &str,
) -> Result<EntityType> {
    check_id("domain", domain_id)?;
    check_id("entity type", type_id)?;
    let et = d
        .entity_types
        .get(txn, &build_key(&[domain_id, type_id]))?
        .ok_or_else(|| Error::not_found("entity type", type_id))?;
    if et.domain_id != domain_id {
        return Err(Error::ScopeViolation {
            expected: domain_id.to_string(),
            found: et.domain_id,
        });
    }
    Ok(et)
}

pub(crate) fn load_permission_type(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    permission_id: &str,
) -> Result<PermissionType> {
    check_id("domain", domain_id)?;
    check_id("permission type", permission_id)?;
    let pt = d
        .permission_types
        .get(txn, &build_key(&[domain_id, permission_id]))?
        .ok_or_else(|| Error::not_found("permission type", permission_id))?;
    if pt.domain_id != domain_id {
        return Err(Error::ScopeViolation {
            expected: domain_id.to_string(),
            found: pt.domain_id,
        });
    }
    Ok(pt)
}

pub(crate) fn load_entity(d: &Dbs, txn: &RoTxn, domain_id: &str, entity_id: &str) -> Result<Entity> {
    check_id("domain", domain_id)?;
    check_id("entity", entity_id)?;
    let entity = d
        .entities
        .get(txn, &build_key(&[domain_id, entity_id]))?
        .ok_or_else(|| Error::not_found("entity", entity_id))?;
    if entity.domain_id != domain_id {
        return Err(Error::ScopeViolation {
            expected: domain_id.to_string(),
            found: entity.domain_id,
        });
    }
    Ok(entity)
}

// ============================================================================
// Entity types
// ============================================================================

pub fn create_entity_type(
    domain_id: &str,
    type_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<EntityType> {
    check_id("entity type", type_id)?;
    db::write(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let key = build_key(&[domain_id, type_id]);
        if d.entity_types.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("entity type", type_id));
        }
        let now = current_epoch();
        let et = EntityType {
            id: type_id.to_string(),
            domain_id: domain_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        d.entity_types.put(txn, &key, &et)?;
        Ok(et)
    })
}

pub fn update_entity_type(
    domain_id: &str,
    type_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<EntityType> {
    db::write(|d, txn| {
        let mut et = load_entity_type(d, txn, domain_id, type_id)?;
        et.name = name.to_string();
        et.description = description.map(str::to_string);
        et.updated_at = current_epoch();
        d.entity_types.put(txn, &build_key(&[domain_id, type_id]), &et)?;
        Ok(et)
    })
}

pub fn entity_type_exists(domain_id: &str, type_id: &str) -> Result<bool> {
    check_id("domain", domain_id)?;
    check_id("entity type", type_id)?;
    db::read(|d, txn| {
        Ok(d.entity_types
            .get(txn, &build_key(&[domain_id, type_id]))?
            .is_some())
    })
}

pub fn get_entity_type(domain_id: &str, type_id: &str) -> Result<EntityType> {
    db::read(|d, txn| load_entity_type(d, txn, domain_id, type_id))
}

pub fn get_entity_types(
    domain_id: &str,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<EntityType>> {
    db::read(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d.entity_types.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (_, et) = item?;
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(et);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Delete an entity type. Refused while entities still use it.
pub fn delete_entity_type(domain_id: &str, type_id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_entity_type(d, txn, domain_id, type_id)?;
        for item in d.entities.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (_, entity) = item?;
            if entity.entity_type_id == type_id {
                return Err(Error::invalid(format!(
                    "entity type {type_id} is still used by entity {}",
                    entity.id
                )));
            }
        }
        d.entity_types.delete(txn, &build_key(&[domain_id, type_id]))?;
        Ok(())
    })
}

// ============================================================================
// Permission types
// ============================================================================

pub fn create_permission_type(
    domain_id: &str,
    permission_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<PermissionType> {
    check_id("permission type", permission_id)?;
    db::write(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let key = build_key(&[domain_id, permission_id]);
        if d.permission_types.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("permission type", permission_id));
        }
        let now = current_epoch();
        let pt = PermissionType {
            id: permission_id.to_string(),
            domain_id: domain_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        d.permission_types.put(txn, &key, &pt)?;
        Ok(pt)
    })
}

pub fn update_permission_type(
    domain_id: &str,
    permission_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<PermissionType> {
    db::write(|d, txn| {
        let mut pt = load_permission_type(d, txn, domain_id, permission_id)?;
        pt.name = name.to_string();
        pt.description = description.map(str::to_string);
        pt.updated_at = current_epoch();
        d.permission_types
            .put(txn, &build_key(&[domain_id, permission_id]), &pt)?;
        Ok(pt)
    })
}

pub fn permission_type_exists(domain_id: &str, permission_id: &str) -> Result<bool> {
    check_id("domain", domain_id)?;
    check_id("permission type", permission_id)?;
    db::read(|d, txn| {
        Ok(d.permission_types
            .get(txn, &build_key(&[domain_id, permission_id]))?
            .is_some())
    })
}

pub fn get_permission_type(domain_id: &str, permission_id: &str) -> Result<PermissionType> {
    db::read(|d, txn| load_permission_type(d, txn, domain_id, permission_id))
}

pub fn get_permission_types(
    domain_id: &str,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<PermissionType>> {
    db::read(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d
            .permission_types
            .prefix_iter(txn, &build_prefix(&[domain_id]))?
        {
            let (_, pt) = item?;
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(pt);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Delete a permission type. The reserved owner permission and permission
/// types still named by grant rows are refused.
pub fn delete_permission_type(domain_id: &str, permission_id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_permission_type(d, txn, domain_id, permission_id)?;
        if permission_id == OWNER_PERMISSION_ID {
            return Err(Error::invalid("the owner permission type is reserved"));
        }
        for item in d.grants.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (k, _) = item?;
            if get_part(k, 2) == Some(permission_id) {
                return Err(Error::invalid(format!(
                    "permission type {permission_id} is still used by grants"
                )));
            }
        }
        d.permission_types
            .delete(txn, &build_key(&[domain_id, permission_id]))?;
        Ok(())
    })
}

// ============================================================================
// Entities
// ============================================================================

/// Create an entity. Its type, owner, and optional parent must already exist.
pub fn create_entity(domain_id: &str, init: EntityInit) -> Result<Entity> {
    check_id("entity", &init.id)?;
    db::write(|d, txn| {
        load_domain(d, txn, domain_id)?;
        load_entity_type(d, txn, domain_id, &init.entity_type_id)?;
        load_user(d, txn, domain_id, &init.owner_id)?;
        if let Some(parent_id) = init.parent_entity_id.as_deref() {
            if parent_id == init.id {
                return Err(Error::invalid("entity cannot be its own parent"));
            }
            load_entity(d, txn, domain_id, parent_id)?;
        }
        let key = build_key(&[domain_id, &init.id]);
        if d.entities.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("entity", &init.id));
        }
        let now = current_epoch();
        let entity = Entity {
            id: init.id,
            domain_id: domain_id.to_string(),
            entity_type_id: init.entity_type_id,
            owner_id: init.owner_id,
            parent_entity_id: init.parent_entity_id,
            name: init.name,
            description: init.description,
            full_text: init.full_text,
            metadata: init.metadata,
            created_at: now,
            updated_at: now,
        };
        d.entities.put(txn, &key, &entity)?;
        if let Some(parent_id) = entity.parent_entity_id.as_deref() {
            d.children
                .put(txn, &build_key(&[domain_id, parent_id, &entity.id]), &now)?;
        }
        Ok(entity)
    })
}

/// Replace an entity's display fields.
pub fn update_entity(
    domain_id: &str,
    entity_id: &str,
    name: &str,
    description: Option<&str>,
    full_text: Option<&str>,
    metadata: std::collections::BTreeMap<String, String>,
) -> Result<Entity> {
    db::write(|d, txn| {
        let mut entity = load_entity(d, txn, domain_id, entity_id)?;
        entity.name = name.to_string();
        entity.description = description.map(str::to_string);
        entity.full_text = full_text.map(str::to_string);
        entity.metadata = metadata;
        entity.updated_at = current_epoch();
        d.entities.put(txn, &build_key(&[domain_id, entity_id]), &entity)?;
        Ok(entity)
    })
}

/// Move an entity under a new parent, or detach it with `None`.
///
/// Access held through cascading grants follows the new chain on the next
/// query.
pub fn reparent_entity(
    domain_id: &str,
    entity_id: &str,
    new_parent_id: Option<&str>,
) -> Result<Entity> {
    db::write(|d, txn| {
        let mut entity = load_entity(d, txn, domain_id, entity_id)?;
        if let Some(parent_id) = new_parent_id {
            if parent_id == entity_id {
                return Err(Error::invalid("entity cannot be its own parent"));
            }
            load_entity(d, txn, domain_id, parent_id)?;
            let chain = hierarchy::ancestor_chain(d, txn, domain_id, parent_id)?;
            if chain.iter().any(|a| a == entity_id) {
                return Err(Error::invalid(format!(
                    "moving {entity_id} under {parent_id} would close a hierarchy cycle"
                )));
            }
        }
        if let Some(old_parent) = entity.parent_entity_id.as_deref() {
            d.children
                .delete(txn, &build_key(&[domain_id, old_parent, entity_id]))?;
        }
        if let Some(parent_id) = new_parent_id {
            d.children
                .put(txn, &build_key(&[domain_id, parent_id, entity_id]), &current_epoch())?;
        }
        entity.parent_entity_id = new_parent_id.map(str::to_string);
        entity.updated_at = current_epoch();
        d.entities.put(txn, &build_key(&[domain_id, entity_id]), &entity)?;
        Ok(entity)
    })
}

pub fn entity_exists(domain_id: &str, entity_id: &str) -> Result<bool> {
    check_id("domain", domain_id)?;
    check_id("entity", entity_id)?;
    db::read(|d, txn| {
        Ok(d.entities
            .get(txn, &build_key(&[domain_id, entity_id]))?
            .is_some())
    })
}

pub fn get_entity(domain_id: &str, entity_id: &str) -> Result<Entity> {
    db::read(|d, txn| load_entity(d, txn, domain_id, entity_id))
}

/// Delete an entity, its grant rows, and detach its children.
pub fn delete_entity(domain_id: &str, entity_id: &str) -> Result<()> {
    db::write(|d, txn| {
        let entity = load_entity(d, txn, domain_id, entity_id)?;
        delete_prefixed(&d.grants, txn, &build_prefix(&[domain_id, entity_id]))?;
        let mut children = Vec::new();
        for item in d
            .children
            .prefix_iter(txn, &build_prefix(&[domain_id, entity_id]))?
        {
            let (k, _) = item?;
            if let Some(child) = get_part(k, 2) {
                children.push(child.to_string());
            }
        }
        for child_id in &children {
            let mut child = load_entity(d, txn, domain_id, child_id)?;
            child.parent_entity_id = None;
            child.updated_at = current_epoch();
            d.entities.put(txn, &build_key(&[domain_id, child_id]), &child)?;
            d.children
                .delete(txn, &build_key(&[domain_id, entity_id, child_id]))?;
        }
        if let Some(parent_id) = entity.parent_entity_id.as_deref() {
            d.children
                .delete(txn, &build_key(&[domain_id, parent_id, entity_id]))?;
        }
        d.entities.delete(txn, &build_key(&[domain_id, entity_id]))?;
        Ok(())
    })
}

// ============================================================================
// Search
// ============================================================================

fn text_matches(m: &Match, value: &str) -> bool {
    match m {
        Match::Eq(s) => value == s,
        Match::Like(s) => value.to_lowercase().contains(&s.to_lowercase()),
        Match::Not(s) => value != s,
    }
}

fn filter_matches(filter: &SearchFilter, entity: &Entity) -> bool {
    match filter {
        SearchFilter::Name(m) => text_matches(m, &entity.name),
        SearchFilter::Description(m) => {
            text_matches(m, entity.description.as_deref().unwrap_or(""))
        }
        SearchFilter::FullText(m) => text_matches(m, entity.full_text.as_deref().unwrap_or("")),
        SearchFilter::EntityType(t) => entity.entity_type_id == *t,
        SearchFilter::Owner(o) => entity.owner_id == *o,
        SearchFilter::ParentEntity(p) => entity.parent_entity_id.as_deref() == Some(p.as_str()),
        SearchFilter::Permission(_) => true,
        SearchFilter::CreatedAfter(t) => entity.created_at >= *t,
        SearchFilter::CreatedBefore(t) => entity.created_at <= *t,
        SearchFilter::UpdatedAfter(t) => entity.updated_at >= *t,
        SearchFilter::UpdatedBefore(t) => entity.updated_at <= *t,
    }
}

/// Entities in id order that match every filter and are visible to
/// `user_id`.
///
/// Visibility means ownership or an applicable grant. A `Permission` filter
/// restricts the grant check to that permission type; otherwise any
/// permission counts.
pub fn search_entities(
    domain_id: &str,
    user_id: &str,
    filters: &[SearchFilter],
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<Entity>> {
    db::read(|d, txn| {
        load_user(d, txn, domain_id, user_id)?;
        let permission = filters.iter().find_map(|f| match f {
            SearchFilter::Permission(p) => Some(p.as_str()),
            _ => None,
        });
        if let Some(p) = permission {
            load_permission_type(d, txn, domain_id, p)?;
        }
        let groups = membership::groups_containing(d, txn, domain_id, user_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d.entities.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (_, entity) = item?;
            if !filters.iter().all(|f| filter_matches(f, &entity)) {
                continue;
            }
            let visible = match permission {
                Some(p) => access::has_access_in(d, txn, domain_id, user_id, &groups, &entity, p)?,
                None => access::has_any_access_in(d, txn, domain_id, user_id, &groups, &entity)?,
            };
            if !visible {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(entity);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}
