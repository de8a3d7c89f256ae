//! Grant ledger behavior: idempotent shares, precise revokes, and the
//! reserved owner permission.

use std::collections::BTreeMap;
use std::sync::{MutexGuard, OnceLock};

use entitle::{
    clear_all, init, test_lock, EntityInit, Error, GroupKind, SubjectKind, OWNER_PERMISSION_ID,
};
use tempfile::TempDir;

static DIR: OnceLock<TempDir> = OnceLock::new();

fn setup() -> MutexGuard<'static, ()> {
    let lock = test_lock();
    let dir = DIR.get_or_init(|| TempDir::new().unwrap());
    init(dir.path().to_str().unwrap()).unwrap();
    clear_all().unwrap();
    lock
}

fn seed() {
    entitle::create_domain("lab", "Lab", None).unwrap();
    for user in ["alice", "bob", "carol", "dave"] {
        entitle::create_user("lab", user, BTreeMap::new()).unwrap();
    }
    entitle::create_entity_type("lab", "project", "Project", None).unwrap();
    entitle::create_permission_type("lab", "read", "Read", None).unwrap();
    entitle::create_permission_type("lab", "write", "Write", None).unwrap();
    entitle::create_entity(
        "lab",
        EntityInit {
            id: "p1".to_string(),
            entity_type_id: "project".to_string(),
            owner_id: "alice".to_string(),
            parent_entity_id: None,
            name: "P1".to_string(),
            description: None,
            full_text: None,
            metadata: BTreeMap::new(),
        },
    )
    .unwrap();
}

#[test]
fn sharing_twice_keeps_a_single_row() {
    let _lock = setup();
    seed();

    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", false, "alice").unwrap();
    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", false, "alice").unwrap();

    let grants = entitle::get_entity_grants("lab", "p1").unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].subject_id, "bob");
    assert_eq!(grants[0].subject_kind, SubjectKind::User);
    assert_eq!(grants[0].permission_type_id, "read");
    assert_eq!(grants[0].granted_by, "alice");
    assert!(grants[0].granted_at > 0);
    assert!(!grants[0].cascade);
}

#[test]
fn resharing_updates_cascade_in_place() {
    let _lock = setup();
    seed();

    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", false, "alice").unwrap();
    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", true, "alice").unwrap();

    let grants = entitle::get_entity_grants("lab", "p1").unwrap();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].cascade);
}

#[test]
fn revoke_removes_exactly_the_named_row() {
    let _lock = setup();
    seed();

    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", false, "alice").unwrap();
    entitle::share_entity_with_users("lab", "p1", &["bob"], "write", false, "alice").unwrap();

    entitle::revoke_entity_sharing_from_users("lab", "p1", &["bob"], "read").unwrap();
    assert!(!entitle::user_has_access("lab", "bob", "p1", "read").unwrap());
    assert!(entitle::user_has_access("lab", "bob", "p1", "write").unwrap());

    // Revoking a row that does not exist is a no-op.
    entitle::revoke_entity_sharing_from_users("lab", "p1", &["carol"], "read").unwrap();
}

#[test]
fn bulk_share_is_atomic_on_unknown_subject() {
    let _lock = setup();
    seed();

    let err = entitle::share_entity_with_users("lab", "p1", &["bob", "ghost"], "read", false, "alice")
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(entitle::get_entity_grants("lab", "p1").unwrap().is_empty());
    assert!(!entitle::user_has_access("lab", "bob", "p1", "read").unwrap());
}

#[test]
fn group_share_reaches_transitive_members() {
    let _lock = setup();
    seed();
    entitle::create_group("lab", "outer", "Outer", None, "alice", GroupKind::Nested).unwrap();
    entitle::create_group("lab", "inner", "Inner", None, "alice", GroupKind::Nested).unwrap();
    entitle::add_child_groups_to_parent_group("lab", &["inner"], "outer").unwrap();
    entitle::add_users_to_group("lab", &["bob"], "outer").unwrap();
    entitle::add_users_to_group("lab", &["carol"], "inner").unwrap();

    entitle::share_entity_with_groups("lab", "p1", &["outer"], "read", false, "alice").unwrap();

    assert!(entitle::user_has_access("lab", "bob", "p1", "read").unwrap());
    assert!(entitle::user_has_access("lab", "carol", "p1", "read").unwrap());
    assert!(!entitle::user_has_access("lab", "dave", "p1", "read").unwrap());

    entitle::revoke_entity_sharing_from_groups("lab", "p1", &["outer"], "read").unwrap();
    assert!(!entitle::user_has_access("lab", "carol", "p1", "read").unwrap());
}

#[test]
fn revoking_one_group_grant_leaves_access_via_another() {
    let _lock = setup();
    seed();
    entitle::create_group("lab", "g1", "G1", None, "alice", GroupKind::Nested).unwrap();
    entitle::create_group("lab", "g2", "G2", None, "alice", GroupKind::Nested).unwrap();
    entitle::add_users_to_group("lab", &["bob"], "g1").unwrap();
    entitle::add_users_to_group("lab", &["bob"], "g2").unwrap();

    entitle::share_entity_with_groups("lab", "p1", &["g1", "g2"], "read", false, "alice").unwrap();
    entitle::revoke_entity_sharing_from_groups("lab", "p1", &["g1"], "read").unwrap();

    assert!(entitle::user_has_access("lab", "bob", "p1", "read").unwrap());
    entitle::revoke_entity_sharing_from_groups("lab", "p1", &["g2"], "read").unwrap();
    assert!(!entitle::user_has_access("lab", "bob", "p1", "read").unwrap());
}

#[test]
fn owner_permission_cannot_be_granted() {
    let _lock = setup();
    seed();

    let err =
        entitle::share_entity_with_users("lab", "p1", &["bob"], OWNER_PERMISSION_ID, false, "alice")
            .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(entitle::get_entity_grants("lab", "p1").unwrap().is_empty());
}

#[test]
fn direct_share_lists_are_per_permission() {
    let _lock = setup();
    seed();
    entitle::create_group("lab", "team", "Team", None, "alice", GroupKind::Nested).unwrap();

    entitle::share_entity_with_users("lab", "p1", &["bob", "carol"], "read", false, "alice")
        .unwrap();
    entitle::share_entity_with_users("lab", "p1", &["dave"], "write", false, "alice").unwrap();
    entitle::share_entity_with_groups("lab", "p1", &["team"], "read", false, "alice").unwrap();

    let readers = entitle::get_list_of_directly_shared_users("lab", "p1", "read").unwrap();
    let ids: Vec<&str> = readers.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["bob", "carol"]);

    let writers = entitle::get_list_of_directly_shared_users("lab", "p1", "write").unwrap();
    let ids: Vec<&str> = writers.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["dave"]);

    let groups = entitle::get_list_of_directly_shared_groups("lab", "p1", "read").unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, "team");
    assert!(entitle::get_list_of_directly_shared_groups("lab", "p1", "write")
        .unwrap()
        .is_empty());
}

#[test]
fn share_validates_entity_and_permission() {
    let _lock = setup();
    seed();

    assert!(matches!(
        entitle::share_entity_with_users("lab", "ghost", &["bob"], "read", false, "alice")
            .unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        entitle::share_entity_with_users("lab", "p1", &["bob"], "ghost", false, "alice")
            .unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        entitle::revoke_entity_sharing_from_users("lab", "ghost", &["bob"], "read").unwrap_err(),
        Error::NotFound { .. }
    ));
}
