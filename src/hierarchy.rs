//! Entity parent-chain and subtree resolution.
//!
//! Parent pointers live on the entity records; the `children` index keyed
//! [domain][parent][child] is their reverse, kept in sync by the catalog.

use std::collections::{BTreeSet, HashSet, VecDeque};

use heed::RoTxn;

use crate::catalog::load_entity;
use crate::constants::MAX_HIERARCHY_DEPTH;
use crate::db::{self, Dbs};
use crate::error::{Error, Result};
use crate::keys::{build_prefix, get_part};

/// Parent chain of an entity, nearest first.
pub(crate) fn ancestor_chain(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    entity_id: &str,
) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut cur = load_entity(d, txn, domain_id, entity_id)?;
    seen.insert(cur.id.clone());
    while let Some(parent_id) = cur.parent_entity_id.clone() {
        if !seen.insert(parent_id.clone()) || chain.len() >= MAX_HIERARCHY_DEPTH {
            return Err(Error::invalid(format!(
                "entity hierarchy is cyclic or too deep at {parent_id}"
            )));
        }
        cur = load_entity(d, txn, domain_id, &parent_id)?;
        chain.push(parent_id);
    }
    Ok(chain)
}

/// Everything below an entity, via BFS over the children index.
pub(crate) fn descendant_set(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    entity_id: &str,
) -> Result<BTreeSet<String>> {
    let mut found = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(entity_id.to_string());
    while let Some(e) = queue.pop_front() {
        for item in d.children.prefix_iter(txn, &build_prefix(&[domain_id, &e]))? {
            let (k, _) = item?;
            if let Some(child) = get_part(k, 2) {
                if found.insert(child.to_string()) {
                    queue.push_back(child.to_string());
                }
            }
        }
    }
    Ok(found)
}

/// Ancestor ids of an entity, nearest parent first.
pub fn ancestors_of(domain_id: &str, entity_id: &str) -> Result<Vec<String>> {
    db::read(|d, txn| ancestor_chain(d, txn, domain_id, entity_id))
}

/// Ids of every entity below `entity_id`.
pub fn descendants_of(domain_id: &str, entity_id: &str) -> Result<BTreeSet<String>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        descendant_set(d, txn, domain_id, entity_id)
    })
}
