//! Permission and subject-route directory
//!
//! The permission records themselves live in an external document store
//! queried by simple field-match predicates; this module is the boundary.
//! The trait exposes the two predicates the engine needs; the file backend
//! serves deployments that ship the records alongside the broker.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// A licensing record matched against claims by organization intersection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    /// Organization set the license covers
    pub organizations: Vec<String>,

    /// Subject the license is scoped to, if any
    #[serde(default)]
    pub subject: Option<String>,

    /// Comma-separated group allow-list; absent means unrestricted
    #[serde(default)]
    pub group_label: Option<String>,

    /// Whether the record grants access to teaching staff only
    #[serde(default)]
    pub teachers_only: bool,
}

impl PermissionRecord {
    /// `hasSome` semantics: true when the claims' organizations intersect
    /// this record's organization set.
    #[must_use]
    pub fn matches(&self, organizations: &[String]) -> bool {
        self.organizations.iter().any(|o| organizations.contains(o))
    }

    /// Groups this record admits, split on `,` and trimmed. Empty when the
    /// record carries no restriction.
    #[must_use]
    pub fn allowed_groups(&self) -> Vec<String> {
        self.group_label
            .as_deref()
            .map(|labels| {
                labels
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A content route for a licensed subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRoute {
    /// Subject this route belongs to
    pub subject: String,

    /// Site-relative URL of the content page
    pub url: String,

    /// Whether the route is reserved for teaching staff
    #[serde(default)]
    pub teachers_only: bool,
}

/// Read-only source of permission records and subject routes.
#[async_trait]
pub trait Directory: Debug + Send + Sync {
    /// Records whose organization set intersects `organizations`.
    async fn records_matching(&self, organizations: &[String]) -> Result<Vec<PermissionRecord>>;

    /// Routes registered for `subject`, in stored order.
    async fn routes_for_subject(&self, subject: &str) -> Result<Vec<SubjectRoute>>;

    /// The route registered under `url`, if any. Used to infer the subject
    /// of the page an access check is running on.
    async fn route_by_url(&self, url: &str) -> Result<Option<SubjectRoute>>;
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    permissions: Vec<PermissionRecord>,
    #[serde(default)]
    subjects: Vec<SubjectRoute>,
}

/// Directory backed by a JSON file loaded at startup.
#[derive(Debug, Default)]
pub struct FileDirectory {
    records: Vec<PermissionRecord>,
    routes: Vec<SubjectRoute>,
}

impl FileDirectory {
    /// Load records and routes from a JSON document with `permissions` and
    /// `subjects` arrays.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read directory file {}: {e}", path.display()))
        })?;
        let file: DirectoryFile = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid directory file: {e}")))?;
        info!(
            permissions = file.permissions.len(),
            subjects = file.subjects.len(),
            "Loaded permission directory"
        );
        Ok(Self {
            records: file.permissions,
            routes: file.subjects,
        })
    }

    /// Build a directory from in-memory records (tests, embedded setups).
    #[must_use]
    pub fn from_records(records: Vec<PermissionRecord>, routes: Vec<SubjectRoute>) -> Self {
        Self { records, routes }
    }
}

#[async_trait]
impl Directory for FileDirectory {
    async fn records_matching(&self, organizations: &[String]) -> Result<Vec<PermissionRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.matches(organizations))
            .cloned()
            .collect())
    }

    async fn routes_for_subject(&self, subject: &str) -> Result<Vec<SubjectRoute>> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect())
    }

    async fn route_by_url(&self, url: &str) -> Result<Option<SubjectRoute>> {
        Ok(self.routes.iter().find(|r| r.url == url).cloned())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(orgs: &[&str], group_label: Option<&str>) -> PermissionRecord {
        PermissionRecord {
            organizations: orgs.iter().map(ToString::to_string).collect(),
            subject: None,
            group_label: group_label.map(ToString::to_string),
            teachers_only: false,
        }
    }

    #[test]
    fn matches_on_any_intersection() {
        let rec = record(&["100", "200"], None);
        assert!(rec.matches(&["200".to_string(), "999".to_string()]));
        assert!(!rec.matches(&["999".to_string()]));
        assert!(!rec.matches(&[]));
    }

    #[test]
    fn allowed_groups_splits_and_trims() {
        let rec = record(&["100"], Some("3, 4 ,"));
        assert_eq!(rec.allowed_groups(), vec!["3", "4"]);
        assert!(record(&["100"], None).allowed_groups().is_empty());
    }

    #[tokio::test]
    async fn file_directory_filters_by_org_and_subject() {
        let dir = FileDirectory::from_records(
            vec![record(&["100"], None), record(&["200"], Some("3"))],
            vec![
                SubjectRoute {
                    subject: "math".to_string(),
                    url: "math-hub".to_string(),
                    teachers_only: false,
                },
                SubjectRoute {
                    subject: "science".to_string(),
                    url: "science-hub".to_string(),
                    teachers_only: true,
                },
            ],
        );

        let matched = dir.records_matching(&["100".to_string()]).await.unwrap();
        assert_eq!(matched.len(), 1);

        let routes = dir.routes_for_subject("math").await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].url, "math-hub");

        let by_url = dir.route_by_url("science-hub").await.unwrap().unwrap();
        assert_eq!(by_url.subject, "science");
        assert!(dir.route_by_url("nope").await.unwrap().is_none());
    }

    #[test]
    fn load_parses_directory_file() {
        let json = r#"{
            "permissions": [
                {"organizations": ["100"], "subject": "math", "groupLabel": "3,4", "teachersOnly": false}
            ],
            "subjects": [
                {"subject": "math", "url": "math-hub"}
            ]
        }"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();

        let dir = FileDirectory::load(file.path()).unwrap();
        assert_eq!(dir.records.len(), 1);
        assert_eq!(dir.records[0].subject.as_deref(), Some("math"));
        assert_eq!(dir.routes.len(), 1);
    }
}
