//! Admin role guard.
//!
//! Every admin endpoint calls [`admin_guard`] before touching any data.

use actix_web::HttpResponse;

use crate::{auth_middleware::AuthMiddleware, models::Role};

/// Whether the caller holds the admin role.
pub fn is_admin(user: &AuthMiddleware) -> bool {
    user.role == Role::Admin
}

/// Returns `Err` with a ready 403 response for non-admins.
///
/// ```ignore
/// if let Err(resp) = admin_guard(&user) {
///     return Ok(resp);
/// }
/// ```
pub fn admin_guard(user: &AuthMiddleware) -> Result<(), HttpResponse> {
    if is_admin(user) {
        Ok(())
    } else {
        tracing::warn!(user_id = %user.id, "Admin route denied");
        Err(HttpResponse::Forbidden().json(serde_json::json!({"error": "Admin access required"})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_middleware::UserContext;
    use uuid::Uuid;

    fn caller(role: Role) -> AuthMiddleware {
        AuthMiddleware(UserContext {
            id: Uuid::new_v4(),
            email: "someone@example.com".into(),
            name: "Someone".into(),
            role,
        })
    }

    #[test]
    fn only_admins_pass() {
        assert!(admin_guard(&caller(Role::Admin)).is_ok());

        let denied = admin_guard(&caller(Role::User)).unwrap_err();
        assert_eq!(denied.status(), 403);
        assert!(!is_admin(&caller(Role::User)));
    }
}
