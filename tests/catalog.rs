//! Entity type, permission type, and entity catalog behavior, including
//! hierarchy edits and search.

use std::collections::BTreeMap;
use std::sync::{MutexGuard, OnceLock};

use entitle::{clear_all, init, test_lock, EntityInit, Error, Match, SearchFilter};
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
    entitle::create_user("lab", "alice", BTreeMap::new()).unwrap();
    entitle::create_user("lab", "bob", BTreeMap::new()).unwrap();
    entitle::create_entity_type("lab", "project", "Project", None).unwrap();
    entitle::create_permission_type("lab", "read", "Read", None).unwrap();
}

fn project(id: &str, owner: &str, parent: Option<&str>) -> EntityInit {
    EntityInit {
        id: id.to_string(),
        entity_type_id: "project".to_string(),
        owner_id: owner.to_string(),
        parent_entity_id: parent.map(str::to_string),
        name: id.to_string(),
        description: None,
        full_text: None,
        metadata: BTreeMap::new(),
    }
}

#[test]
fn entity_type_crud() {
    let _lock = setup();
    seed();

    let et = entitle::get_entity_type("lab", "project").unwrap();
    assert_eq!(et.name, "Project");

    let err = entitle::create_entity_type("lab", "project", "Again", None).unwrap_err();
    assert!(matches!(err, Error::DuplicateEntry { .. }));

    let updated = entitle::update_entity_type("lab", "project", "Projects", Some("d")).unwrap();
    assert_eq!(updated.name, "Projects");

    entitle::create_entity_type("lab", "dataset", "Dataset", None).unwrap();
    let all = entitle::get_entity_types("lab", 0, None).unwrap();
    let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["dataset", "project"]);

    entitle::delete_entity_type("lab", "dataset").unwrap();
    assert!(!entitle::entity_type_exists("lab", "dataset").unwrap());
    assert!(matches!(
        entitle::get_entity_type("lab", "dataset").unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[test]
fn permission_type_crud() {
    let _lock = setup();
    seed();

    let err = entitle::create_permission_type("lab", "read", "Again", None).unwrap_err();
    assert!(matches!(err, Error::DuplicateEntry { .. }));

    entitle::create_permission_type("lab", "write", "Write", None).unwrap();
    let all = entitle::get_permission_types("lab", 0, None).unwrap();
    // The reserved owner permission is part of the catalog.
    let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["owner", "read", "write"]);

    entitle::delete_permission_type("lab", "write").unwrap();
    assert!(!entitle::permission_type_exists("lab", "write").unwrap());
}

#[test]
fn entity_type_in_use_cannot_be_deleted() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("p1", "alice", None)).unwrap();
    let err = entitle::delete_entity_type("lab", "project").unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    entitle::delete_entity("lab", "p1").unwrap();
    entitle::delete_entity_type("lab", "project").unwrap();
}

#[test]
fn permission_type_in_use_cannot_be_deleted() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("p1", "alice", None)).unwrap();
    entitle::share_entity_with_users("lab", "p1", &["bob"], "read", false, "alice").unwrap();

    let err = entitle::delete_permission_type("lab", "read").unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    entitle::revoke_entity_sharing_from_users("lab", "p1", &["bob"], "read").unwrap();
    entitle::delete_permission_type("lab", "read").unwrap();
}

#[test]
fn create_entity_validates_references() {
    let _lock = setup();
    seed();

    let mut bad_type = project("p1", "alice", None);
    bad_type.entity_type_id = "ghost".to_string();
    assert!(matches!(
        entitle::create_entity("lab", bad_type).unwrap_err(),
        Error::NotFound { .. }
    ));

    assert!(matches!(
        entitle::create_entity("lab", project("p1", "ghost", None)).unwrap_err(),
        Error::NotFound { .. }
    ));

    assert!(matches!(
        entitle::create_entity("lab", project("p1", "alice", Some("ghost"))).unwrap_err(),
        Error::NotFound { .. }
    ));

    assert!(matches!(
        entitle::create_entity("lab", project("p1", "alice", Some("p1"))).unwrap_err(),
        Error::InvalidArgument(_)
    ));

    assert!(matches!(
        entitle::create_entity("lab", project("", "alice", None)).unwrap_err(),
        Error::InvalidArgument(_)
    ));

    entitle::create_entity("lab", project("p1", "alice", None)).unwrap();
    assert!(matches!(
        entitle::create_entity("lab", project("p1", "alice", None)).unwrap_err(),
        Error::DuplicateEntry { .. }
    ));
}

#[test]
fn parent_links_track_ancestors_and_descendants() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("root", "alice", None)).unwrap();
    entitle::create_entity("lab", project("mid", "alice", Some("root"))).unwrap();
    entitle::create_entity("lab", project("leaf", "alice", Some("mid"))).unwrap();

    assert_eq!(entitle::ancestors_of("lab", "leaf").unwrap(), ["mid", "root"]);
    assert_eq!(entitle::ancestors_of("lab", "root").unwrap(), Vec::<String>::new());

    let below = entitle::descendants_of("lab", "root").unwrap();
    assert!(below.contains("mid") && below.contains("leaf"));
    assert_eq!(below.len(), 2);
}

#[test]
fn reparent_moves_subtree() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("a", "alice", None)).unwrap();
    entitle::create_entity("lab", project("b", "alice", None)).unwrap();
    entitle::create_entity("lab", project("c", "alice", Some("a"))).unwrap();

    let moved = entitle::reparent_entity("lab", "c", Some("b")).unwrap();
    assert_eq!(moved.parent_entity_id.as_deref(), Some("b"));
    assert_eq!(entitle::ancestors_of("lab", "c").unwrap(), ["b"]);
    assert!(entitle::descendants_of("lab", "a").unwrap().is_empty());
    assert!(entitle::descendants_of("lab", "b").unwrap().contains("c"));

    let detached = entitle::reparent_entity("lab", "c", None).unwrap();
    assert_eq!(detached.parent_entity_id, None);
    assert!(entitle::descendants_of("lab", "b").unwrap().is_empty());
}

#[test]
fn reparent_rejects_hierarchy_cycles() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("a", "alice", None)).unwrap();
    entitle::create_entity("lab", project("b", "alice", Some("a"))).unwrap();
    entitle::create_entity("lab", project("c", "alice", Some("b"))).unwrap();

    // a under its own grandchild
    assert!(matches!(
        entitle::reparent_entity("lab", "a", Some("c")).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        entitle::reparent_entity("lab", "a", Some("a")).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    // Nothing moved.
    assert_eq!(entitle::get_entity("lab", "a").unwrap().parent_entity_id, None);
}

#[test]
fn delete_entity_detaches_children() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("root", "alice", None)).unwrap();
    entitle::create_entity("lab", project("mid", "alice", Some("root"))).unwrap();
    entitle::create_entity("lab", project("leaf", "alice", Some("mid"))).unwrap();

    entitle::delete_entity("lab", "mid").unwrap();
    assert!(!entitle::entity_exists("lab", "mid").unwrap());

    let leaf = entitle::get_entity("lab", "leaf").unwrap();
    assert_eq!(leaf.parent_entity_id, None);
    assert!(entitle::descendants_of("lab", "root").unwrap().is_empty());
}

#[test]
fn update_entity_replaces_display_fields() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("p1", "alice", None)).unwrap();
    let mut meta = BTreeMap::new();
    meta.insert("lang".to_string(), "en".to_string());
    let updated = entitle::update_entity(
        "lab",
        "p1",
        "Renamed",
        Some("described"),
        Some("searchable text"),
        meta.clone(),
    )
    .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.description.as_deref(), Some("described"));
    assert_eq!(updated.full_text.as_deref(), Some("searchable text"));
    assert_eq!(updated.metadata, meta);
    assert_eq!(entitle::get_entity("lab", "p1").unwrap(), updated);
}

#[test]
fn search_filters_by_name_and_full_text() {
    let _lock = setup();
    seed();

    let mut report = project("alpha-report", "alice", None);
    report.full_text = Some("Quarterly spectroscopy results".to_string());
    entitle::create_entity("lab", report).unwrap();
    entitle::create_entity("lab", project("beta-report", "alice", None)).unwrap();
    entitle::create_entity("lab", project("alpha-data", "alice", None)).unwrap();

    let reports = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::Name(Match::Like("REPORT".to_string()))],
        0,
        None,
    )
    .unwrap();
    assert_eq!(reports.len(), 2);

    let exact = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::Name(Match::Eq("alpha-data".to_string()))],
        0,
        None,
    )
    .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, "alpha-data");

    let text = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::FullText(Match::Like("spectroscopy".to_string()))],
        0,
        None,
    )
    .unwrap();
    assert_eq!(text.len(), 1);
    assert_eq!(text[0].id, "alpha-report");

    let not_alpha = entitle::search_entities(
        "lab",
        "alice",
        &[
            SearchFilter::Name(Match::Like("alpha".to_string())),
            SearchFilter::Name(Match::Not("alpha-data".to_string())),
        ],
        0,
        None,
    )
    .unwrap();
    assert_eq!(not_alpha.len(), 1);
    assert_eq!(not_alpha[0].id, "alpha-report");
}

#[test]
fn search_only_returns_visible_entities() {
    let _lock = setup();
    seed();

    entitle::create_entity("lab", project("mine", "bob", None)).unwrap();
    entitle::create_entity("lab", project("theirs", "alice", None)).unwrap();

    let visible = entitle::search_entities("lab", "bob", &[], 0, None).unwrap();
    let ids: Vec<&str> = visible.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["mine"]);

    entitle::share_entity_with_users("lab", "theirs", &["bob"], "read", false, "alice").unwrap();
    let visible = entitle::search_entities("lab", "bob", &[], 0, None).unwrap();
    assert_eq!(visible.len(), 2);

    // Restricting to a permission the user does not hold hides the entity.
    entitle::create_permission_type("lab", "write", "Write", None).unwrap();
    let writable = entitle::search_entities(
        "lab",
        "bob",
        &[SearchFilter::Permission("write".to_string())],
        0,
        None,
    )
    .unwrap();
    let ids: Vec<&str> = writable.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["mine"]);
}

#[test]
fn search_filters_by_type_owner_and_parent() {
    let _lock = setup();
    seed();
    entitle::create_entity_type("lab", "dataset", "Dataset", None).unwrap();

    entitle::create_entity("lab", project("p1", "alice", None)).unwrap();
    let mut ds = project("d1", "alice", Some("p1"));
    ds.entity_type_id = "dataset".to_string();
    entitle::create_entity("lab", ds).unwrap();

    let datasets = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::EntityType("dataset".to_string())],
        0,
        None,
    )
    .unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].id, "d1");

    let owned = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::Owner("alice".to_string())],
        0,
        None,
    )
    .unwrap();
    assert_eq!(owned.len(), 2);

    let under_p1 = entitle::search_entities(
        "lab",
        "alice",
        &[SearchFilter::ParentEntity("p1".to_string())],
        0,
        None,
    )
    .unwrap();
    assert_eq!(under_p1.len(), 1);
    assert_eq!(under_p1[0].id, "d1");
}

#[test]
fn search_pagination_applies_after_filtering() {
    let _lock = setup();
    seed();

    for id in ["e1", "e2", "e3", "e4"] {
        entitle::create_entity("lab", project(id, "alice", None)).unwrap();
    }

    let page = entitle::search_entities("lab", "alice", &[], 1, Some(2)).unwrap();
    let ids: Vec<&str> = page.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["e2", "e3"]);
}

#[test]
fn search_requires_known_user_and_permission() {
    let _lock = setup();
    seed();

    assert!(matches!(
        entitle::search_entities("lab", "ghost", &[], 0, None).unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(matches!(
        entitle::search_entities(
            "lab",
            "alice",
            &[SearchFilter::Permission("ghost".to_string())],
            0,
            None
        )
        .unwrap_err(),
        Error::NotFound { .. }
    ));
}
