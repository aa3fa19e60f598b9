//! Permission resolution engine
//!
//! Two independent decisions over the same claims, both driven by
//! organization-set intersection against permission records: license
//! eligibility and the best redirect target. A third, verification-time
//! gate re-checks access for a specific subject.

use std::sync::Arc;

use tracing::info;

use crate::claims::IdentityClaims;
use crate::directory::{Directory, PermissionRecord};
use crate::Result;

/// Outcome of a verification-time access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Claims may access the requested content
    Allowed,
    /// Claims must be sent to the unauthorized page
    Denied,
}

/// Resolves license eligibility and redirect targets for verified claims.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    directory: Arc<dyn Directory>,
    success_url: String,
}

impl PermissionEngine {
    /// Create an engine over a record directory. `success_url` is the safe
    /// generic landing page used whenever resolution is ambiguous.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>, success_url: String) -> Self {
        Self {
            directory,
            success_url,
        }
    }

    /// Decide whether the identity is licensed for any content.
    ///
    /// Order matters: a single unrestricted matching record licenses a
    /// student before the group union is ever consulted.
    pub async fn has_license(&self, claims: &IdentityClaims) -> Result<bool> {
        let records = self.directory.records_matching(&claims.organizations).await?;

        let licensed = if records.is_empty() {
            false
        } else if !claims.is_student || records.iter().any(|r| r.group_label.is_none()) {
            true
        } else {
            let allowed = group_union(&records);
            allowed.is_empty()
                || claims
                    .group_label
                    .as_deref()
                    .is_some_and(|g| allowed.iter().any(|a| a == g))
        };

        // Session audit trail
        info!(
            name = %claims.display_name,
            organizations = ?claims.organizations,
            student = claims.is_student,
            group = ?claims.group_label,
            licensed,
            "License decision"
        );

        Ok(licensed)
    }

    /// Pick the redirect target for freshly verified claims.
    ///
    /// Exactly one surviving record selects its subject's routes; anything
    /// else (zero or ambiguous) lands on the default success URL.
    pub async fn resolve_redirect(&self, claims: &IdentityClaims) -> Result<String> {
        let records = self.directory.records_matching(&claims.organizations).await?;

        let surviving: Vec<&PermissionRecord> = if claims.is_student {
            records
                .iter()
                .filter(|r| {
                    r.group_label.is_none()
                        || claims
                            .group_label
                            .as_deref()
                            .is_some_and(|g| r.allowed_groups().iter().any(|a| a == g))
                })
                .collect()
        } else {
            records.iter().collect()
        };

        let [record] = surviving.as_slice() else {
            return Ok(self.success_url.clone());
        };
        let Some(subject) = record.subject.as_deref() else {
            return Ok(self.success_url.clone());
        };

        let mut routes = self.directory.routes_for_subject(subject).await?;
        if routes.is_empty() {
            return Ok(self.success_url.clone());
        }

        if claims.is_student {
            routes.retain(|r| !r.teachers_only);
        } else {
            // Display priority only: teacher-only routes first, stored
            // order preserved among equals.
            routes.sort_by_key(|r| !r.teachers_only);
        }

        match routes.first() {
            Some(route) if !route.url.is_empty() => {
                Ok(format!("/{}", route.url.trim_start_matches('/')))
            }
            _ => Ok(self.success_url.clone()),
        }
    }

    /// The subject owning a content page, when the URL is a registered
    /// route. Used to narrow a verification-time access check to the page
    /// it runs on.
    pub async fn subject_for_url(&self, url: &str) -> Result<Option<String>> {
        let route = self
            .directory
            .route_by_url(url.trim_start_matches('/'))
            .await?;
        Ok(route.map(|r| r.subject))
    }

    /// Verification-time gate for a specific subject (inferred from the
    /// page the check runs on, when available).
    pub async fn verify_access(
        &self,
        claims: &IdentityClaims,
        requested_subject: Option<&str>,
    ) -> Result<AccessDecision> {
        let mut records = self.directory.records_matching(&claims.organizations).await?;
        if let Some(subject) = requested_subject {
            records.retain(|r| r.subject.as_deref() == Some(subject));
        }

        let Some(first) = records.first() else {
            return Ok(AccessDecision::Denied);
        };
        if first.teachers_only && claims.is_student {
            return Ok(AccessDecision::Denied);
        }

        if claims.is_student {
            let allowed = group_union(&records);
            let in_group = claims
                .group_label
                .as_deref()
                .is_some_and(|g| allowed.iter().any(|a| a == g));
            if !allowed.is_empty() && !in_group {
                return Ok(AccessDecision::Denied);
            }
        }

        Ok(AccessDecision::Allowed)
    }
}

/// Union of group allow-lists across records. Any record without a
/// restriction collapses the union to empty, meaning "no restriction
/// encoded".
fn group_union(records: &[PermissionRecord]) -> Vec<String> {
    if records.iter().any(|r| r.group_label.is_none()) {
        return Vec::new();
    }

    let mut union: Vec<String> = Vec::new();
    for record in records {
        for group in record.allowed_groups() {
            if !union.contains(&group) {
                union.push(group);
            }
        }
    }
    union
}
