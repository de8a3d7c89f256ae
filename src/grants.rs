//! The grant ledger: direct sharing rows.
//!
//! A grant row is keyed [domain][entity][permission][kind][subject] and
//! stores only the cascade flag and provenance. Writing the same key again
//! replaces the row, which makes sharing idempotent and lets a re-share
//! change the cascade flag in place.

use heed::RoTxn;
use tracing::debug;

use crate::catalog::{load_entity, load_permission_type};
use crate::constants::{GROUP_TAG, OWNER_PERMISSION_ID, USER_TAG};
use crate::db::{self, check_id, current_epoch, Dbs};
use crate::error::{Error, Result};
use crate::keys::{build_key, build_prefix, get_part};
use crate::model::{Grant, GrantRecord, SubjectKind, User, UserGroup};
use crate::principals::{load_group, load_user};

pub(crate) fn grant_from_row(key: &[u8], record: &GrantRecord) -> Option<Grant> {
    Some(Grant {
        domain_id: get_part(key, 0)?.to_string(),
        entity_id: get_part(key, 1)?.to_string(),
        permission_type_id: get_part(key, 2)?.to_string(),
        subject_kind: SubjectKind::from_tag(get_part(key, 3)?)?,
        subject_id: get_part(key, 4)?.to_string(),
        cascade: record.cascade,
        granted_by: record.granted_by.clone(),
        granted_at: record.granted_at,
    })
}

fn check_subject(
    d: &Dbs,
    txn: &RoTxn,
    domain_id: &str,
    kind: SubjectKind,
    subject_id: &str,
) -> Result<()> {
    match kind {
        SubjectKind::User => load_user(d, txn, domain_id, subject_id).map(|_| ()),
        SubjectKind::Group => load_group(d, txn, domain_id, subject_id).map(|_| ()),
    }
}

fn share(
    domain_id: &str,
    entity_id: &str,
    kind: SubjectKind,
    subject_ids: &[&str],
    permission_id: &str,
    cascade: bool,
    granted_by: &str,
) -> Result<()> {
    db::write(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        if permission_id == OWNER_PERMISSION_ID {
            return Err(Error::invalid(
                "the owner permission cannot be granted; transfer ownership instead",
            ));
        }
        let now = current_epoch();
        for &subject_id in subject_ids {
            check_subject(d, txn, domain_id, kind, subject_id)?;
            let record = GrantRecord {
                cascade,
                granted_by: granted_by.to_string(),
                granted_at: now,
            };
            d.grants.put(
                txn,
                &build_key(&[domain_id, entity_id, permission_id, kind.tag(), subject_id]),
                &record,
            )?;
        }
        Ok(())
    })?;
    debug!(
        entity = entity_id,
        permission = permission_id,
        count = subject_ids.len(),
        cascade,
        "shared entity"
    );
    Ok(())
}

fn revoke(
    domain_id: &str,
    entity_id: &str,
    kind: SubjectKind,
    subject_ids: &[&str],
    permission_id: &str,
) -> Result<()> {
    db::write(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        let subject_kind = match kind {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
        };
        for &subject_id in subject_ids {
            check_id(subject_kind, subject_id)?;
            d.grants.delete(
                txn,
                &build_key(&[domain_id, entity_id, permission_id, kind.tag(), subject_id]),
            )?;
        }
        Ok(())
    })?;
    debug!(
        entity = entity_id,
        permission = permission_id,
        count = subject_ids.len(),
        "revoked entity sharing"
    );
    Ok(())
}

/// Grant users a permission on an entity. Idempotent per subject; each call
/// is all-or-nothing.
pub fn share_entity_with_users(
    domain_id: &str,
    entity_id: &str,
    user_ids: &[&str],
    permission_id: &str,
    cascade: bool,
    granted_by: &str,
) -> Result<()> {
    share(domain_id, entity_id, SubjectKind::User, user_ids, permission_id, cascade, granted_by)
}

/// Grant groups a permission on an entity.
pub fn share_entity_with_groups(
    domain_id: &str,
    entity_id: &str,
    group_ids: &[&str],
    permission_id: &str,
    cascade: bool,
    granted_by: &str,
) -> Result<()> {
    share(domain_id, entity_id, SubjectKind::Group, group_ids, permission_id, cascade, granted_by)
}

/// Delete exactly the named direct grant rows. Grants on ancestors are
/// never touched; absent rows are ignored.
pub fn revoke_entity_sharing_from_users(
    domain_id: &str,
    entity_id: &str,
    user_ids: &[&str],
    permission_id: &str,
) -> Result<()> {
    revoke(domain_id, entity_id, SubjectKind::User, user_ids, permission_id)
}

/// Delete exactly the named direct group grant rows.
pub fn revoke_entity_sharing_from_groups(
    domain_id: &str,
    entity_id: &str,
    group_ids: &[&str],
    permission_id: &str,
) -> Result<()> {
    revoke(domain_id, entity_id, SubjectKind::Group, group_ids, permission_id)
}

/// Users named by direct grant rows on the entity, id order.
pub fn get_list_of_directly_shared_users(
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
) -> Result<Vec<User>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        let mut out = Vec::new();
        for item in d.grants.prefix_iter(
            txn,
            &build_prefix(&[domain_id, entity_id, permission_id, USER_TAG]),
        )? {
            let (k, _) = item?;
            if let Some(subject) = get_part(k, 4) {
                out.push(load_user(d, txn, domain_id, subject)?);
            }
        }
        Ok(out)
    })
}

/// Groups named by direct grant rows on the entity, id order.
pub fn get_list_of_directly_shared_groups(
    domain_id: &str,
    entity_id: &str,
    permission_id: &str,
) -> Result<Vec<UserGroup>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        load_permission_type(d, txn, domain_id, permission_id)?;
        let mut out = Vec::new();
        for item in d.grants.prefix_iter(
            txn,
            &build_prefix(&[domain_id, entity_id, permission_id, GROUP_TAG]),
        )? {
            let (k, _) = item?;
            if let Some(subject) = get_part(k, 4) {
                out.push(load_group(d, txn, domain_id, subject)?);
            }
        }
        Ok(out)
    })
}

/// Every grant row on the entity.
pub fn get_entity_grants(domain_id: &str, entity_id: &str) -> Result<Vec<Grant>> {
    db::read(|d, txn| {
        load_entity(d, txn, domain_id, entity_id)?;
        let mut out = Vec::new();
        for item in d
            .grants
            .prefix_iter(txn, &build_prefix(&[domain_id, entity_id]))?
        {
            let (k, record) = item?;
            if let Some(grant) = grant_from_row(k, &record) {
                out.push(grant);
            }
        }
        Ok(out)
    })
}
