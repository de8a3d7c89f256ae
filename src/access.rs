//! Effective access resolution.
//!
//! Access holds when any of four conditions does: the user owns the entity,
//! a direct user grant names them, a direct group grant names a group that
//! transitively contains them, or a cascading grant on a live ancestor does
//! either. Cascades are resolved against the parent chain at query time, so
//! reparenting an entity changes its effective access immediately.

use std::collections::BTreeSet;

use heed::RoTxn;

use crate::catalog::{load_entity, load_permission_type};
use crate::constants::{GROUP_TAG, USER_TAG};
use crate::db::{self, Dbs};
use crate::error::Result;
use crate::hierarchy::ancestor_chain;
use crate::keys::{build_key, build_prefix, get_part};
use crate::membership::{groups_containing, member_user_closure};
use crate::model::{Entity, User, UserGroup};
use crate::principals::{load_group, load_user};

/// Grant rows for one permission on one entity that apply to the user or
/// their group closure. With `cascade_only`, non-cascading rows are skipped.
fn row_applies(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
    user_id: &str,
    groups: &BTreeSet<String>,
    cascade_only: bool,
) -> Result<bool> {
    let user_key = build_key(&[domain_id, entity_id, permission_id, USER_TAG, user_id]);
    if let Some(record) = d.grants.get(txn, &user_key)? {
        if record.cascade || !cascade_only {
            return Ok(true);
        }
    }
    for item in d.grants.prefix_iter(
        txn,
        &build_prefix(&[domain_id, entity_id, permission_id, GROUP_TAG]),
    )? {
        let (k, record) = item?;
        if cascade_only && !record.cascade {
            continue;
        }
        if let Some(subject) = get_part(k, 4) {
            if groups.contains(subject) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Like [`row_applies`], but across every permission type.
fn any_row_applies(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    entity_id: &str,
    user_id: &str,
    groups: &BTreeSet<String>,
    cascade_only: bool,
) -> Result<bool> {
    for item in d
        .grants
        .prefix_iter(txn, &build_prefix(&[domain_id, entity_id]))?
    {
        let (k, record) = item?;
        if cascade_only && !record.cascade {
            continue;
        }
        let (tag, subject) = match (get_part(k, 3), get_part(k, 4)) {
            (Some(t), Some(s)) => (t, s),
            _ => continue,
        };
        match tag {
            USER_TAG if subject == user_id => return Ok(true),
            GROUP_TAG if groups.contains(subject) => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

pub(crate) fn has_access_in(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    user_id: &str,
    groups: &BTreeSet<String>,
    entity: &Entity,
    permission_id: &str,
) -> Result<bool> {
    if entity.owner_id == user_id {
        return Ok(true);
    }
    if row_applies(d, txn, domain_id, &entity.id, permission_id, user_id, groups, false)? {
        return Ok(true);
    }
    for ancestor in ancestor_chain(d, txn, domain_id, &entity.id)? {
        if row_applies(d, txn, domain_id, &ancestor, permission_id, user_id, groups, true)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn has_any_access_in(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    user_id: &str,
    groups: &BTreeSet<String>,
    entity: &Entity,
) -> Result<bool> {
    if entity.owner_id == user_id {
        return Ok(true);
    }
    if any_row_applies(d, txn, domain_id, &entity.id, user_id, groups, false)? {
        return Ok(true);
    }
    for ancestor in ancestor_chain(d, txn, domain_id, &entity.id)? {
        if any_row_applies(d, txn, domain_id, &ancestor, user_id, groups, true)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `user_id` holds `permission_id` on `entity_id`.
pub fn user_has_access(
    domain_id: &str,
    user_id: &str,
    entity_id: &str,
    permission_id: &str,
) -> Result<bool> {
    db::read(|d, txn| {
        load_user(d, txn, domain_id, user_id)?;
        let entity = load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        if entity.owner_id == user_id {
            return Ok(true);
        }
        let groups = groups_containing(d, txn, domain_id, user_id)?;
        has_access_in(d, txn, domain_id, user_id, &groups, &entity, permission_id)
    })
}

fn collect_subjects(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
    cascade_only: bool,
    users: &mut BTreeSet<String>,
    groups: &mut BTreeSet<String>,
) -> Result<()> {
    for item in d.grants.prefix_iter(
        txn,
        &build_prefix(&[domain_id, entity_id, permission_id]),
    )? {
        let (k, record) = item?;
        if cascade_only && !record.cascade {
            continue;
        }
        let (tag, subject) = match (get_part(k, 3), get_part(k, 4)) {
            (Some(t), Some(s)) => (t, s),
            _ => continue,
        };
        match tag {
            USER_TAG => {
                users.insert(subject.to_string());
            }
            GROUP_TAG => {
                groups.insert(subject.to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Users with effective access through grant rows: direct rows plus
/// cascading rows on live ancestors, with group subjects expanded to their
/// transitive user members. Ownership is not represented here.
pub fn get_list_of_shared_users(
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
) -> Result<Vec<User>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        let mut users: BTreeSet<String> = BTreeSet::new();
        let mut groups: BTreeSet<String> = BTreeSet::new();
        collect_subjects(d, txn, domain_id, entity_id, permission_id, false, &mut users, &mut groups)?;
        for ancestor in ancestor_chain(d, txn, domain_id, entity_id)? {
            collect_subjects(d, txn, domain_id, &ancestor, permission_id, true, &mut users, &mut groups)?;
        }
        for group_id in &groups {
            users.extend(member_user_closure(d, txn, domain_id, group_id)?);
        }
        users
            .iter()
            .map(|u| load_user(d, txn, domain_id, u))
            .collect()
    })
}

/// Groups with effective access: direct rows plus cascading ancestor rows.
/// Nested member groups are not expanded.
pub fn get_list_of_shared_groups(
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
) -> Result<Vec<UserGroup>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        let mut users: BTreeSet<String> = BTreeSet::new();
        let mut groups: BTreeSet<String> = BTreeSet::new();
        collect_subjects(d, txn, domain_id, entity_id, permission_id, false, &mut users, &mut groups)?;
        for ancestor in ancestor_chain(d, txn, domain_id, entity_id)? {
            collect_subjects(d, txn, domain_id, &ancestor, permission_id, true, &mut users, &mut groups)?;
        }
        groups
            .iter()
            .map(|g| load_group(d, txn, domain_id, g))
            .collect()
    })
}
