use serde::{Deserialize, Serialize};

use crate::domain::request::{Request, RequestStatus};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcceptanceDenial {
    CreatorCannotAccept { username: String },
    RequestCompleted,
    RequestRejected,
    DepartmentMismatch { user_department: String, target_departments: Vec<String> },
    AlreadyAccepted { accepted_by: String },
    DuplicateAcceptance { username: String },
}

impl AcceptanceDenial {
    pub fn reason(&self) -> String {
        match self {
            Self::CreatorCannotAccept { username } => {
                format!("`{username}` created this request and cannot accept it")
            }
            Self::RequestCompleted => "request is already completed".to_owned(),
            Self::RequestRejected => "request was rejected".to_owned(),
            Self::DepartmentMismatch { user_department, target_departments } => {
                format!(
                    "department `{user_department}` is not among the target departments {target_departments:?}"
                )
            }
            Self::AlreadyAccepted { accepted_by } => {
                format!("request was already accepted by `{accepted_by}`")
            }
            Self::DuplicateAcceptance { username } => {
                format!("`{username}` has already accepted this request")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceDecision {
    pub allowed: bool,
    pub reason: String,
    pub denial: Option<AcceptanceDenial>,
}

impl AcceptanceDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), denial: None }
    }

    fn deny(denial: AcceptanceDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), denial: Some(denial) }
    }
}

/// Decides whether `username` from `user_department` may accept `request`.
///
/// Rules apply in order and the first match decides: creators never accept
/// their own request, completed requests are closed, rejected requests are
/// closed only when single-department, a single-department request takes one
/// acceptance from its own department, and a multi-department request takes
/// one acceptance per user from any target department.
pub fn evaluate_acceptance(
    request: &Request,
    username: &str,
    user_department: &str,
) -> AcceptanceDecision {
    if request.creator == username {
        return AcceptanceDecision::deny(AcceptanceDenial::CreatorCannotAccept {
            username: username.to_owned(),
        });
    }

    if request.status == RequestStatus::Completed {
        return AcceptanceDecision::deny(AcceptanceDenial::RequestCompleted);
    }

    if !request.is_multi_department() {
        if request.status == RequestStatus::Rejected {
            return AcceptanceDecision::deny(AcceptanceDenial::RequestRejected);
        }

        if user_department != request.department {
            return AcceptanceDecision::deny(department_mismatch(request, user_department));
        }

        if let Some(first) = request.accepted().first() {
            return AcceptanceDecision::deny(AcceptanceDenial::AlreadyAccepted {
                accepted_by: first.to_string(),
            });
        }

        return AcceptanceDecision::allow(format!(
            "`{username}` may take request `{}` for `{user_department}`",
            request.id
        ));
    }

    if !request.target_departments().contains(&user_department) {
        return AcceptanceDecision::deny(department_mismatch(request, user_department));
    }

    if request.has_accepted(username) {
        return AcceptanceDecision::deny(AcceptanceDenial::DuplicateAcceptance {
            username: username.to_owned(),
        });
    }

    AcceptanceDecision::allow(format!(
        "`{username}` may join request `{}` for `{user_department}`",
        request.id
    ))
}

pub fn can_accept(request: &Request, username: &str, user_department: &str) -> bool {
    evaluate_acceptance(request, username, user_department).allowed
}

fn department_mismatch(request: &Request, user_department: &str) -> AcceptanceDenial {
    let target_departments = if request.is_multi_department() {
        request.target_departments().into_iter().map(str::to_owned).collect()
    } else {
        vec![request.department.clone()]
    };

    AcceptanceDenial::DepartmentMismatch {
        user_department: user_department.to_owned(),
        target_departments,
    }
}
