//! Who may change which user field.

use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The account owner, or any admin/staff/superuser.
    SelfOrAdmin,
    /// Staff or superuser.
    Staff,
    Superuser,
}

/// Field → capability required to write it. Fields absent from the table are
/// never writable through a patch.
pub const FIELD_POLICY: &[(&str, Capability)] = &[
    ("first_name", Capability::SelfOrAdmin),
    ("last_name", Capability::SelfOrAdmin),
    ("email", Capability::SelfOrAdmin),
    ("img_url", Capability::SelfOrAdmin),
    ("credential", Capability::SelfOrAdmin),
    ("role", Capability::Staff),
    ("is_active", Capability::Staff),
    ("is_staff", Capability::Superuser),
];

pub fn is_privileged(user: &User) -> bool {
    user.role == Role::Admin || user.is_staff || user.is_superuser
}

/// Whether `actor` may touch the account `target_id` at all.
pub fn can_manage(actor: &User, target_id: &str) -> bool {
    actor.id == target_id || is_privileged(actor)
}

fn holds(actor: &User, target_id: &str, capability: Capability) -> bool {
    match capability {
        Capability::SelfOrAdmin => can_manage(actor, target_id),
        Capability::Staff => actor.is_staff || actor.is_superuser,
        Capability::Superuser => actor.is_superuser,
    }
}

/// Check every field of a patch against [`FIELD_POLICY`] in one pass.
pub fn check_patch(actor: &User, target_id: &str, fields: &[&str]) -> AppResult<()> {
    if !can_manage(actor, target_id) {
        return Err(AppError::Forbidden(
            "You do not have permission to modify this user.".to_string(),
        ));
    }

    let denied: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|field| {
            FIELD_POLICY
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, capability)| !holds(actor, target_id, *capability))
                .unwrap_or(true)
        })
        .collect();

    if denied.is_empty() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "You do not have permission to change: {}.",
            denied.join(", ")
        )))
    }
}
