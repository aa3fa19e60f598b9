//! Identity claims
//!
//! The external assertion verifier yields a raw claims map. This module
//! normalizes it into [`IdentityClaims`], the shape every downstream
//! component consumes. Organization membership in particular arrives spread
//! over up to three raw fields and must always reach consumers as a flat,
//! trimmed, deduplicated list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Verified identity claims, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Display name from the assertion
    #[serde(default)]
    pub display_name: String,

    /// Stable government identifier
    pub subject_id: String,

    /// Institutional affiliations, trimmed and deduplicated
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Whether the subject is a student
    #[serde(default)]
    pub is_student: bool,

    /// Class/cohort label, meaningful only for students
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,

    /// Additional raw identifier fields kept for actor resolution
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
}

/// Raw claims as delivered by the assertion verifier, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClaims {
    /// Display name claim
    #[serde(default)]
    pub display_name: Option<String>,

    /// Government identifier claim
    #[serde(default)]
    pub subject_id: Option<String>,

    /// Student-school organization claim (highest merge precedence)
    #[serde(default)]
    pub student_org: Option<String>,

    /// Primary organization-roles claim, comma separated
    #[serde(default)]
    pub primary_orgs: Option<String>,

    /// Supplementary placement claim carrying a bracketed org code
    #[serde(default)]
    pub placement_org: Option<String>,

    /// Student flag claim, literal `Yes` when set
    #[serde(default)]
    pub is_student: Option<String>,

    /// Class/cohort claim
    #[serde(default)]
    pub group_label: Option<String>,

    /// Any further identifier claims (student id, teacher id, email, ...)
    #[serde(flatten)]
    pub identifiers: BTreeMap<String, String>,
}

impl IdentityClaims {
    /// Normalize raw verifier output into consumable claims.
    ///
    /// The group label is only carried for students; for staff it is dropped
    /// even when the assertion includes one.
    #[must_use]
    pub fn from_raw(raw: RawClaims) -> Self {
        let is_student = raw.is_student.as_deref() == Some("Yes");
        let group_label = if is_student {
            raw.group_label
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
        } else {
            None
        };

        Self {
            display_name: raw.display_name.unwrap_or_default(),
            subject_id: raw.subject_id.unwrap_or_default(),
            organizations: normalize_organizations(
                raw.student_org.as_deref(),
                raw.primary_orgs.as_deref(),
                raw.placement_org.as_deref(),
            ),
            is_student,
            group_label,
            identifiers: raw.identifiers,
        }
    }
}

/// Merge the three raw organization fields into one flat list.
///
/// Precedence is a fixed total order: the student-school claim first, then
/// the comma-separated primary organization-roles claim, then the code
/// extracted from the supplementary placement claim. Entries are trimmed,
/// empties dropped, and duplicates removed keeping the first occurrence.
#[must_use]
pub fn normalize_organizations(
    student_org: Option<&str>,
    primary_orgs: Option<&str>,
    placement_org: Option<&str>,
) -> Vec<String> {
    let mut organizations: Vec<String> = Vec::new();
    let mut push = |value: &str| {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !organizations.iter().any(|o| o == trimmed) {
            organizations.push(trimmed.to_string());
        }
    };

    for field in [student_org, primary_orgs] {
        if let Some(raw) = field {
            for part in raw.split(',') {
                push(part);
            }
        }
    }

    if let Some(code) = placement_org.and_then(placement_code) {
        push(code);
    }

    organizations
}

/// Extract the organization code from a placement claim of the form
/// `"[<code>]...:<rest>"`. Returns `None` when the bracketed code is absent.
fn placement_code(raw: &str) -> Option<&str> {
    let head = raw.split(':').next().unwrap_or("");
    head.split('[')
        .nth(1)
        .map(|s| s.trim_end_matches(']').trim())
        .filter(|s| !s.is_empty())
}
