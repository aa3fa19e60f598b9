//! Actor resolution
//!
//! Maps identity claims onto the LRS-facing actor descriptor. Resolution
//! walks a fixed, ordered list of typed extractors; ID-number fields are
//! tried before external identifiers, first non-empty trimmed value wins.

use serde::{Deserialize, Serialize};

use crate::claims::IdentityClaims;

const IDENTITY_BASE: &str = "https://lxp.education.gov.il/xapi/moe/identity";

/// Kind of identifier backing the actor account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Government ID number
    IdNumber,
    /// External (institutional) identifier
    ExternalId,
}

impl IdentityKind {
    /// The account home page registered for this identifier kind.
    #[must_use]
    pub fn home_page(self) -> String {
        match self {
            Self::IdNumber => format!("{IDENTITY_BASE}/idnumber"),
            Self::ExternalId => format!("{IDENTITY_BASE}/exidentifier"),
        }
    }
}

/// Resolved actor identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorDescriptor {
    /// The identifier value, trimmed
    pub value: String,
    /// Which kind of identifier it is
    pub kind: IdentityKind,
}

/// Where an extractor reads its value from.
#[derive(Debug, Clone, Copy)]
enum FieldRef {
    /// The typed `subject_id` claim
    SubjectId,
    /// A named entry in the raw identifier map
    Identifier(&'static str),
}

/// One step of the resolution scan.
#[derive(Debug, Clone, Copy)]
struct Extractor {
    kind: IdentityKind,
    field: FieldRef,
}

/// Fixed priority list: ID-number sources first, then external identifiers.
const EXTRACTORS: &[Extractor] = &[
    Extractor {
        kind: IdentityKind::IdNumber,
        field: FieldRef::SubjectId,
    },
    Extractor {
        kind: IdentityKind::IdNumber,
        field: FieldRef::Identifier("idNumber"),
    },
    Extractor {
        kind: IdentityKind::IdNumber,
        field: FieldRef::Identifier("nationalId"),
    },
    Extractor {
        kind: IdentityKind::ExternalId,
        field: FieldRef::Identifier("studentId"),
    },
    Extractor {
        kind: IdentityKind::ExternalId,
        field: FieldRef::Identifier("teacherId"),
    },
    Extractor {
        kind: IdentityKind::ExternalId,
        field: FieldRef::Identifier("userId"),
    },
    Extractor {
        kind: IdentityKind::ExternalId,
        field: FieldRef::Identifier("email"),
    },
];

impl Extractor {
    fn extract<'a>(&self, claims: &'a IdentityClaims) -> Option<&'a str> {
        let raw = match self.field {
            FieldRef::SubjectId => claims.subject_id.as_str(),
            FieldRef::Identifier(name) => claims.identifiers.get(name)?.as_str(),
        };
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Resolve the actor identifier for claims, or `None` when no extractor
/// yields a value.
#[must_use]
pub fn resolve_actor(claims: &IdentityClaims) -> Option<ActorDescriptor> {
    EXTRACTORS.iter().find_map(|extractor| {
        extractor.extract(claims).map(|value| ActorDescriptor {
            value: value.to_string(),
            kind: extractor.kind,
        })
    })
}
