//! Entitle REST API Server
//!
//! Run with: cargo run --features server --bin entitle-server
//!
//! Endpoints (all JSON, scoped under a domain unless noted):
//!   GET    /health                                    - Liveness
//!   POST   /domains                                   - Create domain
//!   GET    /domains                                   - List domains
//!   GET    /domains/:domain                           - Get domain
//!   PUT    /domains/:domain                           - Update domain
//!   DELETE /domains/:domain                           - Delete domain and all its records
//!   POST   /domains/:domain/users                     - Create user
//!   GET    /domains/:domain/users                     - List users
//!   GET/PUT/DELETE /domains/:domain/users/:id         - User record ops
//!   GET    /domains/:domain/users/:id/groups          - Groups containing the user
//!   POST   /domains/:domain/groups                    - Create group
//!   GET    /domains/:domain/groups                    - List groups
//!   GET/PUT/DELETE /domains/:domain/groups/:id        - Group record ops
//!   POST/DELETE /domains/:domain/groups/:id/users     - Add/remove user members
//!   POST   /domains/:domain/groups/:id/children       - Nest child groups
//!   DELETE /domains/:domain/groups/:id/children/:cid  - Remove one child group
//!   POST   /domains/:domain/groups/:id/owner          - Transfer ownership
//!   POST/DELETE /domains/:domain/groups/:id/admins    - Appoint/withdraw admins
//!   GET    /domains/:domain/groups/:id/members/users  - Direct user members
//!   GET    /domains/:domain/groups/:id/members/groups - Direct group members
//!   POST/GET /domains/:domain/entity-types[/:id]      - Entity type catalog
//!   POST/GET /domains/:domain/permission-types[/:id]  - Permission type catalog
//!   POST   /domains/:domain/entities                  - Create entity
//!   GET/PUT/DELETE /domains/:domain/entities/:id      - Entity record ops
//!   PUT    /domains/:domain/entities/:id/parent       - Reparent entity
//!   POST   /domains/:domain/entities/search           - Filtered, access-checked search
//!   POST   /domains/:domain/entities/:id/share        - Grant permission to subjects
//!   POST   /domains/:domain/entities/:id/revoke       - Revoke direct grants
//!   GET    /domains/:domain/entities/:id/grants       - All grant rows
//!   GET    /domains/:domain/entities/:id/shared-users - Effective or direct users
//!   GET    /domains/:domain/entities/:id/shared-groups- Effective or direct groups
//!   GET    /domains/:domain/entities/:id/ancestors    - Parent chain
//!   GET    /domains/:domain/entities/:id/descendants  - Subtree ids
//!   GET    /domains/:domain/access                    - Check user access

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use entitle::{
    init, Domain, Entity, EntityInit, EntityType, Error, Grant, GroupKind, PermissionType,
    SearchFilter, SubjectKind, User, UserGroup,
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

#[derive(Deserialize)]
struct CreateDomainReq {
    id: String,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct UpdateNamedReq {
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct CreateUserReq {
    id: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct UpdateUserReq {
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct CreateGroupReq {
    id: String,
    name: String,
    description: Option<String>,
    owner_id: String,
    kind: GroupKind,
}

#[derive(Deserialize)]
struct MemberIdsReq {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct TransferOwnershipReq {
    new_owner_id: String,
}

#[derive(Deserialize)]
struct CreateTypeReq {
    id: String,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct UpdateEntityReq {
    name: String,
    description: Option<String>,
    full_text: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ReparentReq {
    parent_entity_id: Option<String>,
}

#[derive(Deserialize)]
struct ShareReq {
    subject_kind: SubjectKind,
    subject_ids: Vec<String>,
    permission_type_id: String,
    #[serde(default)]
    cascade: bool,
    granted_by: String,
}

#[derive(Deserialize)]
struct RevokeReq {
    subject_kind: SubjectKind,
    subject_ids: Vec<String>,
    permission_type_id: String,
}

#[derive(Deserialize)]
struct SearchReq {
    user_id: String,
    #[serde(default)]
    filters: Vec<SearchFilter>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct AccessQuery {
    user: String,
    entity: String,
    permission: String,
}

#[derive(Deserialize)]
struct SharedQuery {
    permission: String,
    #[serde(default)]
    direct: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::DuplicateEntry { .. } | Error::CyclicMembership { .. } => StatusCode::CONFLICT,
        Error::ScopeViolation { .. } => StatusCode::FORBIDDEN,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn respond<T: Serialize>(r: entitle::Result<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    match r {
        Ok(v) => (StatusCode::OK, Json(ApiResponse::ok(v))),
        Err(e) => (status_of(&e), Json(ApiResponse::err(e.to_string()))),
    }
}

fn as_strs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

// ============================================================================
// Handlers: domains
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "service": "entitle", "status": "ok" }))
}

async fn create_domain(
    Json(req): Json<CreateDomainReq>,
) -> (StatusCode, Json<ApiResponse<Domain>>) {
    respond(entitle::create_domain(&req.id, &req.name, req.description.as_deref()))
}

async fn list_domains(Query(q): Query<PageQuery>) -> (StatusCode, Json<ApiResponse<Vec<Domain>>>) {
    respond(entitle::get_domains(q.offset, q.limit))
}

async fn get_domain(Path(domain): Path<String>) -> (StatusCode, Json<ApiResponse<Domain>>) {
    respond(entitle::get_domain(&domain))
}

async fn update_domain(
    Path(domain): Path<String>,
    Json(req): Json<UpdateNamedReq>,
) -> (StatusCode, Json<ApiResponse<Domain>>) {
    respond(entitle::update_domain(&domain, &req.name, req.description.as_deref()))
}

async fn delete_domain(Path(domain): Path<String>) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_domain(&domain))
}

// ============================================================================
// Handlers: users
// ============================================================================

async fn create_user(
    Path(domain): Path<String>,
    Json(req): Json<CreateUserReq>,
) -> (StatusCode, Json<ApiResponse<User>>) {
    respond(entitle::create_user(&domain, &req.id, req.attributes))
}

async fn list_users(
    Path(domain): Path<String>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<User>>>) {
    respond(entitle::get_users(&domain, q.offset, q.limit))
}

async fn get_user(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<User>>) {
    respond(entitle::get_user(&domain, &id))
}

async fn update_user(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<UpdateUserReq>,
) -> (StatusCode, Json<ApiResponse<User>>) {
    respond(entitle::update_user(&domain, &id, req.attributes))
}

async fn delete_user(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_user(&domain, &id))
}

async fn user_groups(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<Vec<UserGroup>>>) {
    respond(entitle::get_all_member_groups_for_user(&domain, &id))
}

// ============================================================================
// Handlers: groups
// ============================================================================

async fn create_group(
    Path(domain): Path<String>,
    Json(req): Json<CreateGroupReq>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::create_group(
        &domain,
        &req.id,
        &req.name,
        req.description.as_deref(),
        &req.owner_id,
        req.kind,
    ))
}

async fn list_groups(
    Path(domain): Path<String>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<UserGroup>>>) {
    respond(entitle::get_groups(&domain, q.offset, q.limit))
}

async fn get_group(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::get_group(&domain, &id))
}

async fn update_group(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<UpdateNamedReq>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::update_group(&domain, &id, &req.name, req.description.as_deref()))
}

async fn delete_group(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_group(&domain, &id))
}

async fn add_group_users(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<MemberIdsReq>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::add_users_to_group(&domain, &as_strs(&req.ids), &id))
}

async fn remove_group_users(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<MemberIdsReq>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::remove_users_from_group(&domain, &as_strs(&req.ids), &id))
}

async fn add_group_children(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<MemberIdsReq>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::add_child_groups_to_parent_group(&domain, &as_strs(&req.ids), &id))
}

async fn remove_group_child(
    Path((domain, id, child)): Path<(String, String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::remove_child_group_from_parent_group(&domain, &child, &id))
}

async fn transfer_group_ownership(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<TransferOwnershipReq>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::transfer_group_ownership(&domain, &id, &req.new_owner_id))
}

async fn add_group_admins(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<MemberIdsReq>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::add_group_admins(&domain, &id, &as_strs(&req.ids)))
}

async fn remove_group_admins(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<MemberIdsReq>,
) -> (StatusCode, Json<ApiResponse<UserGroup>>) {
    respond(entitle::remove_group_admins(&domain, &id, &as_strs(&req.ids)))
}

async fn group_member_users(
    Path((domain, id)): Path<(String, String)>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<User>>>) {
    respond(entitle::get_group_members_of_type_user(&domain, &id, q.offset, q.limit))
}

async fn group_member_groups(
    Path((domain, id)): Path<(String, String)>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<UserGroup>>>) {
    respond(entitle::get_group_members_of_type_group(&domain, &id, q.offset, q.limit))
}

// ============================================================================
// Handlers: catalog types
// ============================================================================

async fn create_entity_type(
    Path(domain): Path<String>,
    Json(req): Json<CreateTypeReq>,
) -> (StatusCode, Json<ApiResponse<EntityType>>) {
    respond(entitle::create_entity_type(&domain, &req.id, &req.name, req.description.as_deref()))
}

async fn list_entity_types(
    Path(domain): Path<String>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<EntityType>>>) {
    respond(entitle::get_entity_types(&domain, q.offset, q.limit))
}

async fn get_entity_type(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<EntityType>>) {
    respond(entitle::get_entity_type(&domain, &id))
}

async fn update_entity_type(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<UpdateNamedReq>,
) -> (StatusCode, Json<ApiResponse<EntityType>>) {
    respond(entitle::update_entity_type(&domain, &id, &req.name, req.description.as_deref()))
}

async fn delete_entity_type(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_entity_type(&domain, &id))
}

async fn create_permission_type(
    Path(domain): Path<String>,
    Json(req): Json<CreateTypeReq>,
) -> (StatusCode, Json<ApiResponse<PermissionType>>) {
    respond(entitle::create_permission_type(&domain, &req.id, &req.name, req.description.as_deref()))
}

async fn list_permission_types(
    Path(domain): Path<String>,
    Query(q): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<PermissionType>>>) {
    respond(entitle::get_permission_types(&domain, q.offset, q.limit))
}

async fn get_permission_type(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<PermissionType>>) {
    respond(entitle::get_permission_type(&domain, &id))
}

async fn update_permission_type(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<UpdateNamedReq>,
) -> (StatusCode, Json<ApiResponse<PermissionType>>) {
    respond(entitle::update_permission_type(&domain, &id, &req.name, req.description.as_deref()))
}

async fn delete_permission_type(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_permission_type(&domain, &id))
}

// ============================================================================
// Handlers: entities, sharing, access
// ============================================================================

async fn create_entity(
    Path(domain): Path<String>,
    Json(init): Json<EntityInit>,
) -> (StatusCode, Json<ApiResponse<Entity>>) {
    respond(entitle::create_entity(&domain, init))
}

async fn get_entity(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<Entity>>) {
    respond(entitle::get_entity(&domain, &id))
}

async fn update_entity(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<UpdateEntityReq>,
) -> (StatusCode, Json<ApiResponse<Entity>>) {
    respond(entitle::update_entity(
        &domain,
        &id,
        &req.name,
        req.description.as_deref(),
        req.full_text.as_deref(),
        req.metadata,
    ))
}

async fn delete_entity(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    respond(entitle::delete_entity(&domain, &id))
}

async fn reparent_entity(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<ReparentReq>,
) -> (StatusCode, Json<ApiResponse<Entity>>) {
    respond(entitle::reparent_entity(&domain, &id, req.parent_entity_id.as_deref()))
}

async fn search_entities(
    Path(domain): Path<String>,
    Json(req): Json<SearchReq>,
) -> (StatusCode, Json<ApiResponse<Vec<Entity>>>) {
    respond(entitle::search_entities(&domain, &req.user_id, &req.filters, req.offset, req.limit))
}

async fn share_entity(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<ShareReq>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    let ids = as_strs(&req.subject_ids);
    let r = match req.subject_kind {
        SubjectKind::User => entitle::share_entity_with_users(
            &domain, &id, &ids, &req.permission_type_id, req.cascade, &req.granted_by,
        ),
        SubjectKind::Group => entitle::share_entity_with_groups(
            &domain, &id, &ids, &req.permission_type_id, req.cascade, &req.granted_by,
        ),
    };
    respond(r)
}

async fn revoke_entity(
    Path((domain, id)): Path<(String, String)>,
    Json(req): Json<RevokeReq>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    let ids = as_strs(&req.subject_ids);
    let r = match req.subject_kind {
        SubjectKind::User => {
            entitle::revoke_entity_sharing_from_users(&domain, &id, &ids, &req.permission_type_id)
        }
        SubjectKind::Group => {
            entitle::revoke_entity_sharing_from_groups(&domain, &id, &ids, &req.permission_type_id)
        }
    };
    respond(r)
}

async fn entity_grants(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<Vec<Grant>>>) {
    respond(entitle::get_entity_grants(&domain, &id))
}

async fn shared_users(
    Path((domain, id)): Path<(String, String)>,
    Query(q): Query<SharedQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<User>>>) {
    let r = if q.direct {
        entitle::get_list_of_directly_shared_users(&domain, &id, &q.permission)
    } else {
        entitle::get_list_of_shared_users(&domain, &id, &q.permission)
    };
    respond(r)
}

async fn shared_groups(
    Path((domain, id)): Path<(String, String)>,
    Query(q): Query<SharedQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<UserGroup>>>) {
    let r = if q.direct {
        entitle::get_list_of_directly_shared_groups(&domain, &id, &q.permission)
    } else {
        entitle::get_list_of_shared_groups(&domain, &id, &q.permission)
    };
    respond(r)
}

async fn entity_ancestors(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<Vec<String>>>) {
    respond(entitle::ancestors_of(&domain, &id))
}

async fn entity_descendants(
    Path((domain, id)): Path<(String, String)>,
) -> (StatusCode, Json<ApiResponse<std::collections::BTreeSet<String>>>) {
    respond(entitle::descendants_of(&domain, &id))
}

async fn check_access(
    Path(domain): Path<String>,
    Query(q): Query<AccessQuery>,
) -> (StatusCode, Json<ApiResponse<bool>>) {
    respond(entitle::user_has_access(&domain, &q.user, &q.entity, &q.permission))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Initialize registry
    let db_path = std::env::var("ENTITLE_DB").unwrap_or_else(|_| "./data/entitle.mdb".into());
    println!("Initializing registry at: {}", db_path);
    init(&db_path).expect("Failed to initialize registry");

    // CORS for browser consoles
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Router
    let app = Router::new()
        .route("/health", get(health))
        .route("/domains", post(create_domain).get(list_domains))
        .route(
            "/domains/:domain",
            get(get_domain).put(update_domain).delete(delete_domain),
        )
        .route("/domains/:domain/users", post(create_user).get(list_users))
        .route(
            "/domains/:domain/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/domains/:domain/users/:id/groups", get(user_groups))
        .route("/domains/:domain/groups", post(create_group).get(list_groups))
        .route(
            "/domains/:domain/groups/:id",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route(
            "/domains/:domain/groups/:id/users",
            post(add_group_users).delete(remove_group_users),
        )
        .route("/domains/:domain/groups/:id/children", post(add_group_children))
        .route(
            "/domains/:domain/groups/:id/children/:child",
            axum::routing::delete(remove_group_child),
        )
        .route("/domains/:domain/groups/:id/owner", post(transfer_group_ownership))
        .route(
            "/domains/:domain/groups/:id/admins",
            post(add_group_admins).delete(remove_group_admins),
        )
        .route("/domains/:domain/groups/:id/members/users", get(group_member_users))
        .route("/domains/:domain/groups/:id/members/groups", get(group_member_groups))
        .route(
            "/domains/:domain/entity-types",
            post(create_entity_type).get(list_entity_types),
        )
        .route(
            "/domains/:domain/entity-types/:id",
            get(get_entity_type).put(update_entity_type).delete(delete_entity_type),
        )
        .route(
            "/domains/:domain/permission-types",
            post(create_permission_type).get(list_permission_types),
        )
        .route(
            "/domains/:domain/permission-types/:id",
            get(get_permission_type).put(update_permission_type).delete(delete_permission_type),
        )
        .route("/domains/:domain/entities", post(create_entity))
        .route("/domains/:domain/entities/search", post(search_entities))
        .route(
            "/domains/:domain/entities/:id",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route("/domains/:domain/entities/:id/parent", axum::routing::put(reparent_entity))
        .route("/domains/:domain/entities/:id/share", post(share_entity))
        .route("/domains/:domain/entities/:id/revoke", post(revoke_entity))
        .route("/domains/:domain/entities/:id/grants", get(entity_grants))
        .route("/domains/:domain/entities/:id/shared-users", get(shared_users))
        .route("/domains/:domain/entities/:id/shared-groups", get(shared_groups))
        .route("/domains/:domain/entities/:id/ancestors", get(entity_ancestors))
        .route("/domains/:domain/entities/:id/descendants", get(entity_descendants))
        .route("/domains/:domain/access", get(check_access))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Bind
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let addr = format!("0.0.0.0:{}", port);
    println!("Entitle server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
