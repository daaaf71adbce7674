//! Caller identity.
//!
//! Sign-in is handled upstream by the storefront's identity provider, which
//! forwards the verified principal in `x-identity-*` headers. Handlers take
//! [`Identity`] (any signed-in shopper) or [`AdminIdentity`] (staff with the
//! `admin` role) as extractors.

use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const IDENTITY_ID_HEADER: &str = "x-identity-id";
pub const IDENTITY_EMAIL_HEADER: &str = "x-identity-email";
pub const IDENTITY_NAME_HEADER: &str = "x-identity-name";
pub const IDENTITY_ROLES_HEADER: &str = "x-identity-roles";

const ADMIN_ROLE: &str = "admin";
const MAX_IDENTITY_LEN: usize = 128;

/// Authenticated shopper or staff member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            roles: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Check if the identity carries a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    fn from_parts(parts: &Parts) -> Result<Self, ServiceError> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let id = header(IDENTITY_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("Sign in to continue".to_string()))?;
        if id.len() > MAX_IDENTITY_LEN {
            return Err(ServiceError::Unauthorized(
                "Identity header is malformed".to_string(),
            ));
        }

        let roles = header(IDENTITY_ROLES_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            email: header(IDENTITY_EMAIL_HEADER),
            name: header(IDENTITY_NAME_HEADER),
            roles,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_parts(parts)
    }
}

/// Identity that has been checked for the admin role
#[derive(Debug, Clone)]
pub struct AdminIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_parts(parts)?;
        if !identity.is_admin() {
            return Err(ServiceError::Forbidden(
                "Administrator role required".to_string(),
            ));
        }
        Ok(AdminIdentity(identity))
    }
}
