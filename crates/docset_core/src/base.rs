//! Built-in models.
//!
//! Access control reads its rules from `base.user`, `base.group`,
//! `base.acl` and `base.dls`; imports keep external identifiers in
//! `base.model.data` and applied data files in `base.module.file`. Every
//! registry used with an access-controlled environment must contain these
//! models (see [`crate::bootstrap`]).

use crate::field::{Field, OnDelete};
use crate::model::Model;

/// Users.
pub const USER: &str = "base.user";
/// Groups of users.
pub const GROUP: &str = "base.group";
/// Model-level access rules.
pub const ACL: &str = "base.acl";
/// Document-level security rules.
pub const DLS: &str = "base.dls";
/// External identifiers.
pub const MODEL_DATA: &str = "base.model.data";
/// Installed modules.
pub const MODULE: &str = "base.module";
/// Data files applied by a module.
pub const MODULE_FILE: &str = "base.module.file";

/// Junction between users and groups.
pub const USER_GROUP_REL: &str = "base.user.group.rel";
/// Junction between groups and DLS rules.
pub const GROUP_DLS_REL: &str = "base.group.dls.rel";

/// Name of the root user document.
pub const ROOT_NAME: &str = "root";

/// Status recorded for a module once a data file has been applied.
pub const MODULE_INSTALLED: &str = "installed";

/// Returns the built-in model declarations.
#[must_use]
pub fn models() -> Vec<Model> {
    vec![
        Model::builder(USER)
            .field("name", Field::char().required())
            .field("email", Field::char().unique())
            .field("password", Field::char().excluded_from_read())
            .field(
                "group_ids",
                Field::many2many(GROUP).junction(USER_GROUP_REL, "user_id", "group_id"),
            )
            .build(),
        Model::builder(GROUP)
            .field("name", Field::char().required())
            .field(
                "user_ids",
                Field::many2many(USER).junction(USER_GROUP_REL, "group_id", "user_id"),
            )
            .field("acl_ids", Field::one2many(ACL, "group_id"))
            .field(
                "dls_ids",
                Field::many2many(DLS).junction(GROUP_DLS_REL, "group_id", "dls_id"),
            )
            .build(),
        Model::builder(ACL)
            .field("name", Field::char().unique())
            .field("model", Field::char().required())
            .field("group_id", Field::many2one(GROUP).on_delete(OnDelete::Cascade))
            .field("allow_read", Field::boolean().required().default(false))
            .field("allow_write", Field::boolean().required().default(false))
            .field("allow_create", Field::boolean().required().default(false))
            .field("allow_unlink", Field::boolean().required().default(false))
            .build(),
        Model::builder(DLS)
            .field("name", Field::char().required())
            .field("model", Field::char().required())
            .field("query", Field::char().max_length(4096).required())
            .field(
                "group_ids",
                Field::many2many(GROUP).junction(GROUP_DLS_REL, "dls_id", "group_id"),
            )
            .field("on_read", Field::boolean().required().default(true))
            .field("on_write", Field::boolean().required().default(true))
            .field("on_create", Field::boolean().required().default(true))
            .field("on_unlink", Field::boolean().required().default(true))
            .build(),
        Model::builder(MODEL_DATA)
            .field("name", Field::char().required())
            .field("model", Field::char().required())
            .field("res_id", Field::identifier().required())
            .unique_together(["model", "name"])
            .build(),
        Model::builder(MODULE)
            .field("name", Field::char().unique())
            .field("status", Field::char())
            .build(),
        Model::builder(MODULE_FILE)
            .field("module", Field::char().required())
            .field("file", Field::char().required())
            .unique_together(["module", "file"])
            .build(),
    ]
}
