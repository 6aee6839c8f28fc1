use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

/// Request type tag that is handled exactly like a multi-department request.
pub const PROJECT_TYPE: &str = "project";

/// Acceptances required when a request does not carry its own threshold.
pub const DEFAULT_USERS_NEEDED: u32 = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    #[default]
    Pending,
    #[serde(rename = "In Process")]
    InProcess,
    Completed,
    Rejected,
}

impl RequestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProcess => "In Process",
            Self::Completed => "Completed",
            Self::Rejected => "Rejected",
        }
    }

    /// Status a multi-department request holds for a given acceptance count.
    pub fn for_acceptance(accepted: usize, users_needed: u32) -> Self {
        if accepted < users_needed as usize {
            Self::Pending
        } else {
            Self::InProcess
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of `acceptedBy`.
///
/// Stored lists occasionally hold values that are not user names. Those still
/// count as acceptances and are written back as they were read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Acceptor {
    User(String),
    Other(Value),
}

impl Acceptor {
    pub fn as_user(&self) -> Option<&str> {
        match self {
            Self::User(name) => Some(name.as_str()),
            Self::Other(_) => None,
        }
    }
}

impl From<&str> for Acceptor {
    fn from(name: &str) -> Self {
        Self::User(name.to_owned())
    }
}

impl From<String> for Acceptor {
    fn from(name: String) -> Self {
        Self::User(name)
    }
}

impl PartialEq<&str> for Acceptor {
    fn eq(&self, other: &&str) -> bool {
        self.as_user() == Some(*other)
    }
}

impl fmt::Display for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => f.write_str(name),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

/// A stored work request or project.
///
/// Field names follow the persisted camelCase record. Keys the engine does not
/// interpret are kept in `extra` so a copy round-trips everything it was given.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub department: String,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Option::is_none")]
    pub departments: Option<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multi_department: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_needed: Option<u32>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<Vec<Acceptor>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users_accepted: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_update_time: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Request {
    pub fn new(
        id: impl Into<String>,
        creator: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId(id.into()),
            creator: creator.into(),
            department: department.into(),
            ..Self::default()
        }
    }

    pub fn is_project(&self) -> bool {
        self.request_type.as_deref() == Some(PROJECT_TYPE)
    }

    /// Multi-department requests and projects share the threshold rules.
    pub fn is_multi_department(&self) -> bool {
        self.multi_department || self.is_project()
    }

    pub fn accepted(&self) -> &[Acceptor] {
        self.accepted_by.as_deref().unwrap_or_default()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().len()
    }

    pub fn has_accepted(&self, username: &str) -> bool {
        self.accepted().iter().any(|acceptor| acceptor.as_user() == Some(username))
    }

    /// Threshold for this request; an unset or zero value falls back to `default`.
    pub fn users_needed(&self, default: u32) -> u32 {
        match self.users_needed {
            Some(needed) if needed > 0 => needed,
            _ => default,
        }
    }

    /// Departments whose members may accept a multi-department request.
    pub fn target_departments(&self) -> Vec<&str> {
        match self.departments.as_deref() {
            Some(departments) if !departments.is_empty() => {
                departments.iter().map(String::as_str).collect()
            }
            _ => vec![self.department.as_str()],
        }
    }

    pub fn counts_consistent(&self) -> bool {
        self.users_accepted as usize == self.accepted_count()
    }

    /// Rejects a record whose `usersAccepted` drifted from `acceptedBy`.
    pub fn ensure_counts_consistent(&self) -> Result<(), DomainError> {
        if self.counts_consistent() {
            return Ok(());
        }

        Err(DomainError::InvariantViolation(format!(
            "request `{}` reports {} acceptances but lists {}",
            self.id,
            self.users_accepted,
            self.accepted_count()
        )))
    }
}

// Stored records occasionally carry a non-array here; those read as absent.
// Array items that do not fit `T` are skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => Some(
            items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect(),
        ),
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
