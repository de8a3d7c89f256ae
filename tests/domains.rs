//! Domain lifecycle and the reserved owner permission type.

use std::sync::{MutexGuard, OnceLock};

use entitle::{clear_all, init, test_lock, Error, OWNER_PERMISSION_ID};
use tempfile::TempDir;

static DIR: OnceLock<TempDir> = OnceLock::new();

fn setup() -> MutexGuard<'static, ()> {
    let lock = test_lock();
    let dir = DIR.get_or_init(|| TempDir::new().unwrap());
    init(dir.path().to_str().unwrap()).unwrap();
    clear_all().unwrap();
    lock
}

#[test]
fn create_and_get_domain() {
    let _lock = setup();

    let created =
        entitle::create_domain("lab", "Research Lab", Some("Shared instruments")).unwrap();
    assert_eq!(created.id, "lab");
    assert_eq!(created.name, "Research Lab");
    assert_eq!(created.description.as_deref(), Some("Shared instruments"));
    assert!(created.created_at > 0);

    let fetched = entitle::get_domain("lab").unwrap();
    assert_eq!(fetched, created);
    assert!(entitle::domain_exists("lab").unwrap());
}

#[test]
fn duplicate_domain_rejected() {
    let _lock = setup();

    entitle::create_domain("lab", "Lab", None).unwrap();
    let err = entitle::create_domain("lab", "Lab again", None).unwrap_err();
    assert!(matches!(err, Error::DuplicateEntry { .. }));
}

/// Creating a domain registers its reserved owner permission type, and that
/// type can never be deleted.
#[test]
fn owner_permission_registered_with_domain() {
    let _lock = setup();

    entitle::create_domain("lab", "Lab", None).unwrap();
    let owner = entitle::get_permission_type("lab", OWNER_PERMISSION_ID).unwrap();
    assert_eq!(owner.id, OWNER_PERMISSION_ID);
    assert_eq!(owner.name, "Owner");

    let err = entitle::delete_permission_type("lab", OWNER_PERMISSION_ID).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn update_domain_replaces_display_fields() {
    let _lock = setup();

    let created = entitle::create_domain("lab", "Lab", Some("old")).unwrap();
    let updated = entitle::update_domain("lab", "Laboratory", None).unwrap();
    assert_eq!(updated.name, "Laboratory");
    assert_eq!(updated.description, None);
    assert!(updated.updated_at >= created.created_at);
    assert_eq!(entitle::get_domain("lab").unwrap(), updated);
}

#[test]
fn list_domains_in_id_order_with_pagination() {
    let _lock = setup();

    entitle::create_domain("gamma", "C", None).unwrap();
    entitle::create_domain("alpha", "A", None).unwrap();
    entitle::create_domain("beta", "B", None).unwrap();

    let all = entitle::get_domains(0, None).unwrap();
    let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["alpha", "beta", "gamma"]);

    let page = entitle::get_domains(1, Some(1)).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "beta");

    assert!(entitle::get_domains(3, None).unwrap().is_empty());
    assert!(entitle::get_domains(10, Some(2)).unwrap().is_empty());
}

#[test]
fn missing_domain_is_not_found() {
    let _lock = setup();

    assert!(!entitle::domain_exists("ghost").unwrap());
    assert!(matches!(
        entitle::get_domain("ghost").unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        entitle::delete_domain("ghost").unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        entitle::update_domain("ghost", "x", None).unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[test]
fn empty_and_oversized_ids_rejected() {
    let _lock = setup();

    assert!(matches!(
        entitle::create_domain("", "Empty", None).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    let long = "x".repeat(300);
    assert!(matches!(
        entitle::create_domain(&long, "Long", None).unwrap_err(),
        Error::InvalidArgument(_)
    ));
}
