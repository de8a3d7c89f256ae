//! Domain lifecycle.

use heed::RoTxn;
use tracing::info;

use crate::constants::OWNER_PERMISSION_ID;
use crate::db::{self, check_id, current_epoch, delete_prefixed, Dbs};
use crate::error::{Error, Result};
use crate::keys::{build_key, build_prefix};
use crate::model::{Domain, PermissionType};

pub(crate) fn load_domain(d: &Dbs, txn: &RoTxn, id: &str) -> Result<Domain> {
    check_id("domain", id)?;
    d.domains
        .get(txn, &build_key(&[id]))?
        .ok_or_else(|| Error::not_found("domain", id))
}

/// Create a domain and register its reserved owner permission type.
pub fn create_domain(id: &str, name: &str, description: Option<&str>) -> Result<Domain> {
    check_id("domain", id)?;
    let domain = db::write(|d, txn| {
        let key = build_key(&[id]);
        if d.domains.get(txn, &key)?.is_some() {
            return Err(Error::duplicate("domain", id));
        }
        let now = current_epoch();
        let domain = Domain {
            id: id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        d.domains.put(txn, &key, &domain)?;
        let owner = PermissionType {
            id: OWNER_PERMISSION_ID.to_string(),
            domain_id: id.to_string(),
            name: "Owner".to_string(),
            description: Some("Reserved permission held by entity owners".to_string()),
            created_at: now,
            updated_at: now,
        };
        d.permission_types
            .put(txn, &build_key(&[id, OWNER_PERMISSION_ID]), &owner)?;
        Ok(domain)
    })?;
    info!(domain = id, "created domain");
    Ok(domain)
}

/// Replace a domain's display fields.
pub fn update_domain(id: &str, name: &str, description: Option<&str>) -> Result<Domain> {
    db::write(|d, txn| {
        let mut domain = load_domain(d, txn, id)?;
        let key = build_key(&[id]);
        domain.name = name.to_string();
        domain.description = description.map(str::to_string);
        domain.updated_at = current_epoch();
        d.domains.put(txn, &key, &domain)?;
        Ok(domain)
    })
}

pub fn domain_exists(id: &str) -> Result<bool> {
    check_id("domain", id)?;
    db::read(|d, txn| Ok(d.domains.get(txn, &build_key(&[id]))?.is_some()))
}

pub fn get_domain(id: &str) -> Result<Domain> {
    db::read(|d, txn| load_domain(d, txn, id))
}

/// List domains in id order.
pub fn get_domains(offset: usize, limit: Option<usize>) -> Result<Vec<Domain>> {
    db::read(|d, txn| {
        let cap = limit.unwrap_or(usize::MAX);
        let mut skipped = 0;
        let mut out = Vec::new();
        for item in d.domains.iter(txn)? {
            let (_, domain) = item?;
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(domain);
            if out.len() >= cap {
                break;
            }
        }
        Ok(out)
    })
}

/// Delete a domain and every record scoped to it.
pub fn delete_domain(id: &str) -> Result<()> {
    db::write(|d, txn| {
        load_domain(d, txn, id)?;
        let key = build_key(&[id]);
        let prefix = build_prefix(&[id]);
        delete_prefixed(&d.users, txn, &prefix)?;
        delete_prefixed(&d.groups, txn, &prefix)?;
        delete_prefixed(&d.members, txn, &prefix)?;
        delete_prefixed(&d.members_rev, txn, &prefix)?;
        delete_prefixed(&d.entity_types, txn, &prefix)?;
        delete_prefixed(&d.permission_types, txn, &prefix)?;
        delete_prefixed(&d.entities, txn, &prefix)?;
        delete_prefixed(&d.children, txn, &prefix)?;
        delete_prefixed(&d.grants, txn, &prefix)?;
        d.domains.delete(txn, &key)?;
        Ok(())
    })?;
    info!(domain = id, "deleted domain");
    Ok(())
}
