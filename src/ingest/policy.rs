//! Authorization capability consulted before ingestion and retrieval.
//!
//! The pipeline never embeds an access policy; it asks an
//! [`AuthorizationPolicy`] and acts on the decision.

use async_trait::async_trait;
use serde::Serialize;

use crate::lineage::{PatientId, UserId};

/// Capacity in which a user acts on a patient's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clinician,
    Patient,
}

/// Roles accepted when uploading an object.
pub const INGEST_ROLES: &[Role] = &[Role::Clinician];

/// Roles accepted when reading images or their metadata.
pub const FETCH_ROLES: &[Role] = &[Role::Clinician, Role::Patient];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// External decision function for access to a patient's images.
#[async_trait]
pub trait AuthorizationPolicy: Send + Sync {
    /// Decide whether `user`, acting in any of `roles`, may access `patient`.
    async fn check(&self, user: &UserId, roles: &[Role], patient: &PatientId) -> AccessDecision;
}

/// Policy that allows every request.
///
/// For development deployments that sit behind an authorizing gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl AuthorizationPolicy for AllowAllPolicy {
    async fn check(&self, _user: &UserId, _roles: &[Role], _patient: &PatientId) -> AccessDecision {
        AccessDecision::Allow
    }
}
