//! Caller identity forwarded by the upstream gateway.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Authentication happens upstream; the gateway forwards who the caller is.
/// Requests without a user id are guests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub admin: bool,
}

impl Identity {
    fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .map(|raw| {
                raw.parse::<UserId>()
                    .map_err(|_| ApiError::BadRequest(format!("Malformed {USER_ID_HEADER} header")))
            })
            .transpose()?;

        Ok(Self {
            user_id,
            email: header(USER_EMAIL_HEADER).map(str::to_string),
            admin: header(USER_ROLE_HEADER).is_some_and(|role| role.eq_ignore_ascii_case("admin")),
        })
    }

    pub fn require_user(&self) -> Result<UserId, ApiError> {
        self.user_id
            .ok_or_else(|| ApiError::Unauthorized("Sign in required".to_string()))
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.admin {
            Ok(())
        } else if self.user_id.is_none() {
            Err(ApiError::Unauthorized("Sign in required".to_string()))
        } else {
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_missing_headers_mean_guest() {
        let identity = Identity::from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(identity, Identity::default());
        assert!(matches!(identity.require_user(), Err(ApiError::Unauthorized(_))));
        assert!(matches!(identity.require_admin(), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_reads_user_and_role() {
        let user = UserId::new();
        let identity = Identity::from_headers(&headers(&[
            (USER_ID_HEADER, &user.to_string()),
            (USER_EMAIL_HEADER, "staff@example.com"),
            (USER_ROLE_HEADER, "Admin"),
        ]))
        .unwrap();

        assert_eq!(identity.require_user().unwrap(), user);
        assert_eq!(identity.email.as_deref(), Some("staff@example.com"));
        assert!(identity.require_admin().is_ok());
    }

    #[test]
    fn test_customer_is_not_admin() {
        let identity = Identity::from_headers(&headers(&[
            (USER_ID_HEADER, &UserId::new().to_string()),
            (USER_ROLE_HEADER, "customer"),
        ]))
        .unwrap();
        assert!(matches!(identity.require_admin(), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn test_malformed_user_id_is_rejected() {
        let result = Identity::from_headers(&headers(&[(USER_ID_HEADER, "not-a-uuid")]));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
