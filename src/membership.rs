//! Group membership closure and cycle checks.
//!
//! Membership edges live in two indexes kept in sync: `members` keyed
//! [domain][group][kind][member] and `members_rev` keyed
//! [domain][kind][member][group]. Closures are iterative BFS walks with a
//! visited set, so they terminate on any edge set.

use std::collections::{BTreeSet, HashSet, VecDeque};

use heed::RoTxn;

use crate::constants::{GROUP_TAG, USER_TAG};
use crate::db::{self, Dbs};
use crate::error::Result;
use crate::keys::{build_prefix, get_part};
use crate::model::UserGroup;
use crate::principals;

/// Every group that contains `user_id`, directly or through nesting.
pub(crate) fn groups_containing(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    user_id: &str,
) -> Result<BTreeSet<String>> {
    let mut found: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<(String, &'static str)> = VecDeque::new();
    queue.push_back((user_id.to_string(), USER_TAG));
    while let Some((id, tag)) = queue.pop_front() {
        for item in d
            .members_rev
            .prefix_iter(txn, &build_prefix(&[domain_id, tag, &id]))?
        {
            let (k, _) = item?;
            if let Some(group) = get_part(k, 3) {
                if found.insert(group.to_string()) {
                    queue.push_back((group.to_string(), GROUP_TAG));
                }
            }
        }
    }
    Ok(found)
}

/// Every user reachable from `group_id` through member edges.
pub(crate) fn member_user_closure(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    group_id: &str,
) -> Result<BTreeSet<String>> {
    let mut users = BTreeSet::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    seen.insert(group_id.to_string());
    queue.push_back(group_id.to_string());
    while let Some(g) = queue.pop_front() {
        for item in d.members.prefix_iter(txn, &build_prefix(&[domain_id, &g]))? {
            let (k, _) = item?;
            let (tag, member) = match (get_part(k, 2), get_part(k, 3)) {
                (Some(t), Some(m)) => (t, m),
                _ => continue,
            };
            match tag {
                USER_TAG => {
                    users.insert(member.to_string());
                }
                GROUP_TAG => {
                    if seen.insert(member.to_string()) {
                        queue.push_back(member.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(users)
}

/// True if making `child_id` a member of `parent_id` closes a containment
/// loop. Runs against the caller's transaction, so edges written earlier in
/// the same batch are visible.
pub(crate) fn would_close_cycle(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    parent_id: &str,
    child_id: &str,
) -> Result<bool> {
    if parent_id == child_id {
        return Ok(true);
    }
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    seen.insert(child_id.to_string());
    queue.push_back(child_id.to_string());
    while let Some(g) = queue.pop_front() {
        for item in d
            .members
            .prefix_iter(txn, &build_prefix(&[domain_id, &g, GROUP_TAG]))?
        {
            let (k, _) = item?;
            if let Some(member) = get_part(k, 3) {
                if member == parent_id {
                    return Ok(true);
                }
                if seen.insert(member.to_string()) {
                    queue.push_back(member.to_string());
                }
            }
        }
    }
    Ok(false)
}

/// Transitive membership test.
pub fn is_member(domain_id: &str, user_id: &str, group_id: &str) -> Result<bool> {
    db::read(|d, txn| {
        principals::load_user(d, txn, domain_id, user_id)?;
        principals::load_group(d, txn, domain_id, group_id)?;
        Ok(groups_containing(d, txn, domain_id, user_id)?.contains(group_id))
    })
}

/// All groups the user belongs to, directly or transitively, in id order.
pub fn get_all_member_groups_for_user(domain_id: &str, user_id: &str) -> Result<Vec<UserGroup>> {
    db::read(|d, txn| {
        principals::load_user(d, txn, domain_id, user_id)?;
        let ids = groups_containing(d, txn, domain_id, user_id)?;
        ids.iter()
            .map(|g| principals::load_group(d, txn, domain_id, g))
            .collect()
    })
}
