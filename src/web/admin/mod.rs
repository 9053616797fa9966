mod auth;
mod permissions;

pub use auth::{ensure_can_edit, require_subject_editor, require_super_admin};
pub use permissions::{delete_permission, list_permissions, save_permission};
