//! Users, groups, and group administration.

use std::collections::{BTreeMap, BTreeSet};

use heed::{RoTxn, RwTxn};
use tracing::{debug, warn};

use crate::constants::{GROUP_TAG, USER_TAG};
use crate::db::{self, check_id, current_epoch, Dbs};
use crate::domains::load_domain;
use crate::error::{Error, Result};
use crate::keys::{build_key, build_prefix, get_part};
use crate::membership;
use crate::model::{GroupKind, User, UserGroup};

pub(crate) fn load_user(d: &Dbs, txn: &RoTxn, domain_id: &str, user_id: &str) -> Result<User> {
    check_id("domain", domain_id)?;
    check_id("user", user_id)?;
    let user = d
        .users
        .get(txn, &build_key(&[domain_id, user_id]))?
        .ok_or_else(|| Error::not_found("user", user_id))?;
    if user.domain_id != domain_id {
        return Err(Error::ScopeViolation {
            expected: domain_id.to_string(),
            found: user.domain_id,
        });
    }
    Ok(user)
}

pub(crate) fn load_group(d: &Dbs, txn: &RoTxn, domain_id: &str, group_id: &str) -> Result<UserGroup> {
    check_id("domain", domain_id)?;
    check_id("group", group_id)?;
    let group = d
        .groups
        .get(txn, &build_key(&[domain_id, group_id]))?
        .ok_or_else(|| Error::not_found("group", group_id))?;
    if group.domain_id != domain_id {
        return Err(Error::ScopeViolation {
            expected: domain_id.to_string(),
            found: group.domain_id,
        });
    }
    Ok(group)
}

fn put_member_edge(
    d: &Dbs,
    txn: &mut RwTxn,
    domain_id: &str,
    group_id: &str,
    tag: &str,
    member_id: &str,
) -> Result<()> {
    let stamp = current_epoch();
    d.members
        .put(txn, &build_key(&[domain_id, group_id, tag, member_id]), &stamp)?;
    d.members_rev
        .put(txn, &build_key(&[domain_id, tag, member_id, group_id]), &stamp)?;
    Ok(())
}

fn del_member_edge(
    d: &Dbs,
    txn: &mut RwTxn,
    domain_id: &str,
    group_id: &str,
    tag: &str,
    member_id: &str,
) -> Result<bool> {
    let removed = d
        .members
        .delete(txn, &build_key(&[domain_id, group_id, tag, member_id]))?;
    d.members_rev
        .delete(txn, &build_key(&[domain_id, tag, member_id, group_id]))?;
    Ok(removed)
}

// ============================================================================
// Users
// ============================================================================

pub fn create_user(
    domain_id: &str,
    user_id: &str,
    attributes: BTreeMap<String, String>,
) -> Result<User> {
    check_id("user", user_id)?;
    db::write(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let key = build_key(&[domain_id, user_id]);
        if d.users.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("user", user_id));
        }
        let now = current_epoch();
        let user = User {
            id: user_id.to_string(),
            domain_id: domain_id.to_string(),
            attributes,
            created_at: now,
            updated_at: now,
        };
        d.users.put(txn, &key, &user)?;
        Ok(user)
    })
}

/// Replace a user's attributes.
pub fn update_user(
    domain_id: &str,
    user_id: &str,
    attributes: BTreeMap<String, String>,
) -> Result<User> {
    db::write(|d, txn| {
        let mut user = load_user(d, txn, domain_id, user_id)?;
        user.attributes = attributes;
        user.updated_at = current_epoch();
        d.users.put(txn, &build_key(&[domain_id, user_id]), &user)?;
        Ok(user)
    })
}

pub fn user_exists(domain_id: &str, user_id: &str) -> Result<bool> {
    check_id("domain", domain_id)?;
    check_id("user", user_id)?;
    db::read(|d, txn| Ok(d.users.get(txn, &build_key(&[domain_id, user_id]))?.is_some()))
}

pub fn get_user(domain_id: &str, user_id: &str) -> Result<User> {
    db::read(|d, txn| load_user(d, txn, domain_id, user_id))
}

/// List a domain's users in id order.
pub fn get_users(domain_id: &str, offset: usize, limit: Option<usize>) -> Result<Vec<User>> {
    db::read(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d.users.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (_, user) = item?;
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(user);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Delete a user along with their memberships, admin entries, and grants.
///
/// Refused while the user still owns groups or entities; ownership must be
/// transferred first.
pub fn delete_user(domain_id: &str, user_id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_user(d, txn, domain_id, user_id)?;
        let domain_prefix = build_prefix(&[domain_id]);
        for item in d.groups.prefix_iter(txn, &domain_prefix)? {
            let (_, group) = item?;
            if group.owner_id == user_id {
                return Err(Error::invalid(format!(
                    "user {user_id} still owns group {}",
                    group.id
                )));
            }
        }
        for item in d.entities.prefix_iter(txn, &domain_prefix)? {
            let (_, entity) = item?;
            if entity.owner_id == user_id {
                return Err(Error::invalid(format!(
                    "user {user_id} still owns entity {}",
                    entity.id
                )));
            }
        }
        let mut memberships = Vec::new();
        for item in d
            .members_rev
            .prefix_iter(txn, &build_prefix(&[domain_id, USER_TAG, user_id]))?
        {
            let (k, _) = item?;
            if let Some(group) = get_part(k, 3) {
                memberships.push(group.to_string());
            }
        }
        for group_id in &memberships {
            del_member_edge(d, txn, domain_id, group_id, USER_TAG, user_id)?;
        }
        let mut demoted = Vec::new();
        for item in d.groups.prefix_iter(txn, &domain_prefix)? {
            let (_, group) = item?;
            if group.admin_ids.contains(user_id) {
                demoted.push(group);
            }
        }
        for mut group in demoted {
            group.admin_ids.remove(user_id);
            group.updated_at = current_epoch();
            d.groups.put(txn, &build_key(&[domain_id, &group.id]), &group)?;
        }
        let mut doomed = Vec::new();
        for item in d.grants.prefix_iter(txn, &domain_prefix)? {
            let (k, _) = item?;
            if get_part(k, 3) == Some(USER_TAG) && get_part(k, 4) == Some(user_id) {
                doomed.push(k.to_vec());
            }
        }
        for k in &doomed {
            d.grants.delete(txn, k)?;
        }
        d.users.delete(txn, &build_key(&[domain_id, user_id]))?;
        Ok(())
    })
}

// ============================================================================
// Groups
// ============================================================================

/// Create a group. The owner is enrolled as its first member.
pub fn create_group(
    domain_id: &str,
    group_id: &str,
    name: &str,
    description: Option<&str>,
    owner_id: &str,
    kind: GroupKind,
) -> Result<UserGroup> {
    check_id("group", group_id)?;
    db::write(|d, txn| {
        load_domain(d, txn, domain_id)?;
        load_user(d, txn, domain_id, owner_id)?;
        let key = build_key(&[domain_id, group_id]);
        if d.groups.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("group", group_id));
        }
        let now = current_epoch();
        let group = UserGroup {
            id: group_id.to_string(),
            domain_id: domain_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            owner_id: owner_id.to_string(),
            admin_ids: BTreeSet::new(),
            kind,
            created_at: now,
            updated_at: now,
        };
        d.groups.put(txn, &key, &group)?;
        put_member_edge(d, txn, domain_id, group_id, USER_TAG, owner_id)?;
        Ok(group)
    })
}

/// Replace a group's display fields.
pub fn update_group(
    domain_id: &str,
    group_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<UserGroup> {
    db::write(|d, txn| {
        let mut group = load_group(d, txn, domain_id, group_id)?;
        group.name = name.to_string();
        group.description = description.map(str::to_string);
        group.updated_at = current_epoch();
        d.groups.put(txn, &build_key(&[domain_id, group_id]), &group)?;
        Ok(group)
    })
}

pub fn group_exists(domain_id: &str, group_id: &str) -> Result<bool> {
    check_id("domain", domain_id)?;
    check_id("group", group_id)?;
    db::read(|d, txn| Ok(d.groups.get(txn, &build_key(&[domain_id, group_id]))?.is_some()))
}

pub fn get_group(domain_id: &str, group_id: &str) -> Result<UserGroup> {
    db::read(|d, txn| load_group(d, txn, domain_id, group_id))
}

/// List a domain's groups in id order.
pub fn get_groups(domain_id: &str, offset: usize, limit: Option<usize>) -> Result<Vec<UserGroup>> {
    db::read(|d, txn| {
        load_domain(d, txn, domain_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d.groups.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (_, group) = item?;
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(group);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Delete a group, its membership edges in both directions, and grants
/// naming it.
pub fn delete_group(domain_id: &str, group_id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_group(d, txn, domain_id, group_id)?;
        let mut members = Vec::new();
        for item in d
            .members
            .prefix_iter(txn, &build_prefix(&[domain_id, group_id]))?
        {
            let (k, _) = item?;
            if let (Some(tag), Some(member)) = (get_part(k, 2), get_part(k, 3)) {
                members.push((tag.to_string(), member.to_string()));
            }
        }
        for (tag, member) in &members {
            del_member_edge(d, txn, domain_id, group_id, tag, member)?;
        }
        let mut parents = Vec::new();
        for item in d
            .members_rev
            .prefix_iter(txn, &build_prefix(&[domain_id, GROUP_TAG, group_id]))?
        {
            let (k, _) = item?;
            if let Some(parent) = get_part(k, 3) {
                parents.push(parent.to_string());
            }
        }
        for parent in &parents {
            del_member_edge(d, txn, domain_id, parent, GROUP_TAG, group_id)?;
        }
        let mut doomed = Vec::new();
        for item in d.grants.prefix_iter(txn, &build_prefix(&[domain_id]))? {
            let (k, _) = item?;
            if get_part(k, 3) == Some(GROUP_TAG) && get_part(k, 4) == Some(group_id) {
                doomed.push(k.to_vec());
            }
        }
        for k in &doomed {
            d.grants.delete(txn, k)?;
        }
        d.groups.delete(txn, &build_key(&[domain_id, group_id]))?;
        Ok(())
    })
}

// ============================================================================
// Membership
// ============================================================================

/// Enroll users as direct members. Re-adding a member refreshes its stamp.
pub fn add_users_to_group(domain_id: &str, user_ids: &[&str], group_id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_group(d, txn, domain_id, group_id)?;
        for &user_id in user_ids {
            load_user(d, txn, domain_id, user_id)?;
            put_member_edge(d, txn, domain_id, group_id, USER_TAG, user_id)?;
        }
        Ok(())
    })?;
    debug!(group = group_id, count = user_ids.len(), "added users to group");
    Ok(())
}

/// Remove direct user memberships. Absent memberships are ignored.
pub fn remove_users_from_group(domain_id: &str, user_ids: &[&str], group_id: &str) -> Result<()> {
    db::write(|d, txn| {
        let group = load_group(d, txn, domain_id, group_id)?;
        for &user_id in user_ids {
            check_id("user", user_id)?;
            if user_id == group.owner_id {
                return Err(Error::invalid(format!(
                    "cannot remove owner {user_id} from group {group_id}"
                )));
            }
            del_member_edge(d, txn, domain_id, group_id, USER_TAG, user_id)?;
        }
        Ok(())
    })?;
    debug!(group = group_id, count = user_ids.len(), "removed users from group");
    Ok(())
}

/// Nest groups under a parent. Fails atomically if any edge would close a
/// membership cycle.
pub fn add_child_groups_to_parent_group(
    domain_id: &str,
    child_ids: &[&str],
    parent_id: &str,
) -> Result<()> {
    db::write(|d, txn| {
        let parent = load_group(d, txn, domain_id, parent_id)?;
        if parent.kind != GroupKind::Nested {
            return Err(Error::invalid(format!(
                "group {parent_id} is single-level and cannot contain groups"
            )));
        }
        for &child_id in child_ids {
            load_group(d, txn, domain_id, child_id)?;
            if membership::would_close_cycle(d, txn, domain_id, parent_id, child_id)? {
                warn!(group = parent_id, member = child_id, "rejected cyclic group nesting");
                return Err(Error::CyclicMembership {
                    group: parent_id.to_string(),
                    member: child_id.to_string(),
                });
            }
            put_member_edge(d, txn, domain_id, parent_id, GROUP_TAG, child_id)?;
        }
        Ok(())
    })
}

/// Remove one nested-group edge. Absent edges are ignored.
pub fn remove_child_group_from_parent_group(
    domain_id: &str,
    child_id: &str,
    parent_id: &str,
) -> Result<()> {
    db::write(|d, txn| {
        load_group(d, txn, domain_id, parent_id)?;
        check_id("group", child_id)?;
        del_member_edge(d, txn, domain_id, parent_id, GROUP_TAG, child_id)?;
        Ok(())
    })
}

// ============================================================================
// Ownership and admins
// ============================================================================

/// Transfer group ownership. The new owner is enrolled as a member; the
/// previous owner keeps their membership.
pub fn transfer_group_ownership(
    domain_id: &str,
    group_id: &str,
    new_owner_id: &str,
) -> Result<UserGroup> {
    db::write(|d, txn| {
        let mut group = load_group(d, txn, domain_id, group_id)?;
        load_user(d, txn, domain_id, new_owner_id)?;
        let member_key = build_key(&[domain_id, group_id, USER_TAG, new_owner_id]);
        if d.members.get(txn, &member_key)?.is_none() {
            put_member_edge(d, txn, domain_id, group_id, USER_TAG, new_owner_id)?;
        }
        group.owner_id = new_owner_id.to_string();
        group.updated_at = current_epoch();
        d.groups.put(txn, &build_key(&[domain_id, group_id]), &group)?;
        Ok(group)
    })
}

/// Appoint group admins. When the environment runs with
/// `auto_enroll_admins`, new admins are enrolled as members too.
pub fn add_group_admins(domain_id: &str, group_id: &str, admin_ids: &[&str]) -> Result<UserGroup> {
    let opts = db::options();
    db::write(|d, txn| {
        let mut group = load_group(d, txn, domain_id, group_id)?;
        for &admin_id in admin_ids {
            load_user(d, txn, domain_id, admin_id)?;
            group.admin_ids.insert(admin_id.to_string());
            if opts.auto_enroll_admins {
                let member_key = build_key(&[domain_id, group_id, USER_TAG, admin_id]);
                if d.members.get(txn, &member_key)?.is_none() {
                    put_member_edge(d, txn, domain_id, group_id, USER_TAG, admin_id)?;
                }
            }
        }
        group.updated_at = current_epoch();
        d.groups.put(txn, &build_key(&[domain_id, group_id]), &group)?;
        Ok(group)
    })
}

/// Withdraw admin rights. Membership is untouched.
pub fn remove_group_admins(
    domain_id: &str,
    group_id: &str,
    admin_ids: &[&str],
) -> Result<UserGroup> {
    db::write(|d, txn| {
        let mut group = load_group(d, txn, domain_id, group_id)?;
        for &admin_id in admin_ids {
            group.admin_ids.remove(admin_id);
        }
        group.updated_at = current_epoch();
        d.groups.put(txn, &build_key(&[domain_id, group_id]), &group)?;
        Ok(group)
    })
}

pub fn has_owner_access(domain_id: &str, group_id: &str, user_id: &str) -> Result<bool> {
    db::read(|d, txn| Ok(load_group(d, txn, domain_id, group_id)?.owner_id == user_id))
}

/// Owners count as admins.
pub fn has_admin_access(domain_id: &str, group_id: &str, user_id: &str) -> Result<bool> {
    db::read(|d, txn| {
        let group = load_group(d, txn, domain_id, group_id)?;
        Ok(group.owner_id == user_id || group.admin_ids.contains(user_id))
    })
}

// ============================================================================
// Member listing
// ============================================================================

/// Direct user members in id order.
pub fn get_group_members_of_type_user(
    domain_id: &str,
    group_id: &str,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<User>> {
    db::read(|d, txn| {
        load_group(d, txn, domain_id, group_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d
            .members
            .prefix_iter(txn, &build_prefix(&[domain_id, group_id, USER_TAG]))?
        {
            let (k, _) = item?;
            let member = match get_part(k, 3) {
                Some(m) => m,
                None => continue,
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(load_user(d, txn, domain_id, member)?);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Direct nested-group members in id order.
pub fn get_group_members_of_type_group(
    domain_id: &str,
    group_id: &str,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<UserGroup>> {
    db::read(|d, txn| {
        load_group(d, txn, domain_id, group_id)?;
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d
            .members
            .prefix_iter(txn, &build_prefix(&[domain_id, group_id, GROUP_TAG]))?
        {
            let (k, _) = item?;
            let member = match get_part(k, 3) {
                Some(m) => m,
                None => continue,
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(load_group(d, txn, domain_id, member)?);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}
