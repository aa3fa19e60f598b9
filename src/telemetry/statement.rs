//! xAPI activity statements
//!
//! Builders for the "enter"/"exit" statements the relay sends to the
//! learning-record store. The field shape is fixed by the LRS profile and
//! must match exactly: verb IRIs, the activity definition, the registration
//! UUID, and the two required grouping entries.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::actor::ActorDescriptor;
use crate::{Error, Result};

const PROFILE_BASE: &str = "https://lxp.education.gov.il/xapi/moe";

/// Protocol version sent with every statement POST.
pub const XAPI_VERSION: &str = "1.0.3";

fn activity_type_lms() -> String {
    format!("{PROFILE_BASE}/activities/lms")
}

fn activity_type_course() -> String {
    format!("{PROFILE_BASE}/activities/course")
}

/// Statement verb: enter (connect) or exit (disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbKind {
    /// User entered the platform
    Enter,
    /// User left the platform
    Exit,
}

impl VerbKind {
    fn verb(self) -> Verb {
        let (id, en, he) = match self {
            Self::Enter => (format!("{PROFILE_BASE}/verbs/enter"), "entered", "נכנס"),
            Self::Exit => (format!("{PROFILE_BASE}/verbs/exit"), "exited", "יצא"),
        };
        Verb {
            id,
            display: BTreeMap::from([
                ("en".to_string(), en.to_string()),
                ("he".to_string(), he.to_string()),
            ]),
        }
    }
}

/// Identity of the emitting platform, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ActivitySource<'a> {
    /// IRI identifying the platform activity
    pub activity_id: &'a str,
    /// Display name of the platform
    pub activity_name: &'a str,
    /// Catalog item IRI; required for every enter/exit statement
    pub catalog_item_uri: Option<&'a str>,
}

/// xAPI agent with an account-backed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(rename = "objectType")]
    object_type: String,
    account: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Account {
    #[serde(rename = "homePage")]
    home_page: String,
    name: String,
}

impl Agent {
    /// Build the agent for a resolved actor, keyed by identifier kind.
    #[must_use]
    pub fn from_descriptor(descriptor: &ActorDescriptor) -> Self {
        Self {
            object_type: "Agent".to_string(),
            account: Account {
                home_page: descriptor.kind.home_page(),
                name: descriptor.value.clone(),
            },
        }
    }

    /// The account name (the resolved identifier value).
    #[must_use]
    pub fn account_name(&self) -> &str {
        &self.account.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Verb {
    id: String,
    display: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Activity {
    #[serde(rename = "objectType")]
    object_type: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    definition: Option<ActivityDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ActivityDefinition {
    #[serde(rename = "type")]
    activity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Context {
    registration: Uuid,
    #[serde(rename = "contextActivities")]
    context_activities: ContextActivities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ContextActivities {
    grouping: Vec<Activity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StatementResult {
    duration: String,
}

/// A complete activity statement, ready to POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    id: Uuid,
    actor: Agent,
    verb: Verb,
    object: Activity,
    context: Context,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<StatementResult>,
}

impl Statement {
    /// Statement id, for failure logging.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Verb IRI, for failure logging.
    #[must_use]
    pub fn verb_id(&self) -> &str {
        &self.verb.id
    }
}

/// Build an "enter" statement for a connect event.
pub fn build_enter(source: ActivitySource<'_>, actor: Agent, session_id: Uuid) -> Result<Statement> {
    build(source, actor, session_id, VerbKind::Enter, None)
}

/// Build an "exit" statement for a disconnect event. `duration` is included
/// only when positive.
pub fn build_exit(
    source: ActivitySource<'_>,
    actor: Agent,
    session_id: Uuid,
    duration: Option<Duration>,
) -> Result<Statement> {
    build(source, actor, session_id, VerbKind::Exit, duration)
}

fn build(
    source: ActivitySource<'_>,
    actor: Agent,
    session_id: Uuid,
    verb: VerbKind,
    duration: Option<Duration>,
) -> Result<Statement> {
    let result = duration
        .filter(|d| d.as_secs() > 0)
        .map(|d| StatementResult {
            duration: format_duration(d),
        });

    Ok(Statement {
        id: Uuid::new_v4(),
        actor,
        verb: verb.verb(),
        object: platform_activity(source),
        context: Context {
            registration: session_id,
            context_activities: ContextActivities {
                grouping: grouping(source)?,
            },
        },
        timestamp: Utc::now(),
        result,
    })
}

fn platform_activity(source: ActivitySource<'_>) -> Activity {
    Activity {
        object_type: "Activity".to_string(),
        id: source.activity_id.to_string(),
        definition: Some(ActivityDefinition {
            activity_type: activity_type_lms(),
            name: Some(BTreeMap::from([(
                "he".to_string(),
                source.activity_name.to_string(),
            )])),
        }),
    }
}

/// The two required grouping entries: the platform identity and the catalog
/// item. A missing catalog item IRI fails the emission; a statement cannot
/// be built without it.
fn grouping(source: ActivitySource<'_>) -> Result<Vec<Activity>> {
    let catalog_item = source.catalog_item_uri.ok_or_else(|| {
        Error::Statement("Catalog item IRI is required to build a statement".to_string())
    })?;

    let name: BTreeMap<String, String> = ["he", "en", "ar"]
        .iter()
        .map(|lang| ((*lang).to_string(), source.activity_name.to_string()))
        .collect();

    Ok(vec![
        Activity {
            object_type: "Activity".to_string(),
            id: source.activity_id.to_string(),
            definition: Some(ActivityDefinition {
                activity_type: activity_type_lms(),
                name: Some(name),
            }),
        },
        Activity {
            object_type: "Activity".to_string(),
            id: catalog_item.to_string(),
            definition: Some(ActivityDefinition {
                activity_type: activity_type_course(),
                name: None,
            }),
        },
    ])
}

/// ISO-8601 duration with whole seconds: `PT<seconds>S`.
fn format_duration(duration: Duration) -> String {
    format!("PT{}S", duration.as_secs())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;
    use crate::telemetry::actor::IdentityKind;

    const SOURCE: ActivitySource<'static> = ActivitySource {
        activity_id: "https://platform.example",
        activity_name: "Platform",
        catalog_item_uri: Some("https://catalog.example/item/1"),
    };

    fn agent() -> Agent {
        Agent::from_descriptor(&ActorDescriptor {
            value: "123456789".to_string(),
            kind: IdentityKind::IdNumber,
        })
    }

    #[test]
    fn enter_statement_has_required_shape() {
        let session = Uuid::new_v4();
        let statement = build_enter(SOURCE, agent(), session).unwrap();
        let json: Value = serde_json::to_value(&statement).unwrap();

        assert_eq!(json["actor"]["objectType"], "Agent");
        assert_eq!(json["actor"]["account"]["name"], "123456789");
        assert!(json["actor"]["account"]["homePage"]
            .as_str()
            .unwrap()
            .ends_with("/idnumber"));
        assert!(json["verb"]["id"].as_str().unwrap().ends_with("/verbs/enter"));
        assert_eq!(json["verb"]["display"]["en"], "entered");
        assert_eq!(json["object"]["id"], "https://platform.example");
        assert_eq!(json["context"]["registration"], session.to_string());
        assert_eq!(
            json["context"]["contextActivities"]["grouping"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert!(json.get("result").is_none());
        assert!(Uuid::parse_str(json["id"].as_str().unwrap()).is_ok());
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn exit_statement_carries_positive_duration() {
        let statement = build_exit(
            SOURCE,
            agent(),
            Uuid::new_v4(),
            Some(Duration::from_millis(83_700)),
        )
        .unwrap();
        let json: Value = serde_json::to_value(&statement).unwrap();
        assert!(json["verb"]["id"].as_str().unwrap().ends_with("/verbs/exit"));
        assert_eq!(json["result"]["duration"], "PT83S");
    }

    #[test]
    fn zero_duration_is_omitted() {
        let statement =
            build_exit(SOURCE, agent(), Uuid::new_v4(), Some(Duration::from_millis(400)))
                .unwrap();
        let json: Value = serde_json::to_value(&statement).unwrap();
        assert!(json.get("result").is_none());
    }

    #[test]
    fn missing_catalog_item_fails_the_build() {
        let source = ActivitySource {
            catalog_item_uri: None,
            ..SOURCE
        };
        let err = build_enter(source, agent(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::Statement(_)));
    }

    #[test]
    fn grouping_entries_are_platform_then_catalog_item() {
        let entries = grouping(SOURCE).unwrap();
        assert_eq!(entries[0].id, "https://platform.example");
        assert_eq!(
            entries[0].definition.as_ref().unwrap().activity_type,
            activity_type_lms()
        );
        assert_eq!(entries[1].id, "https://catalog.example/item/1");
        assert_eq!(
            entries[1].definition.as_ref().unwrap().activity_type,
            activity_type_course()
        );
    }

    #[test]
    fn duration_formatting_floors_to_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1999)), "PT1S");
        assert_eq!(format_duration(Duration::from_secs(300)), "PT300S");
    }
}
