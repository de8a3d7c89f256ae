//! Reserved identifiers and traversal bounds.

/// Permission type registered automatically with every domain.
///
/// It exists so the catalog is complete, but it is never granted: ownership
/// is carried on the entity record itself.
pub const OWNER_PERMISSION_ID: &str = "owner";

/// Key tag for user subjects in membership and grant rows.
pub const USER_TAG: &str = "u";

/// Key tag for group subjects in membership and grant rows.
pub const GROUP_TAG: &str = "g";

/// Upper bound on parent-chain walks. A chain this deep means the
/// hierarchy index is corrupted.
pub const MAX_HIERARCHY_DEPTH: usize = 256;
