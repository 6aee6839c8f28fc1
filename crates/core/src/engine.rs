//! Request status engine
//!
//! Derives the status of a request from its acceptance state, decides who may
//! accept it, and applies acceptances to a collection of requests. Every
//! operation returns fresh values; inputs are never mutated.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, PolicyConfig, DEFAULT_TIME_FORMAT};
use crate::domain::request::{Acceptor, Request, RequestId, RequestStatus, DEFAULT_USERS_NEEDED};
use crate::eligibility::{self, AcceptanceDecision};
use crate::errors::DomainError;

/// Thresholds and formatting the engine applies to every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPolicy {
    /// Used when a request has no `usersNeeded` of its own
    pub default_users_needed: u32,
    /// strftime pattern for `lastStatusUpdateTime`
    pub time_format: String,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            default_users_needed: DEFAULT_USERS_NEEDED,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl From<&PolicyConfig> for StatusPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            default_users_needed: config.default_users_needed,
            time_format: config.time_format.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatusEngine<C = SystemClock> {
    policy: StatusPolicy,
    clock: C,
}

impl StatusEngine<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(StatusPolicy::default(), SystemClock)
    }
}

impl Default for StatusEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StatusEngine<C>
where
    C: Clock,
{
    pub fn with_clock(policy: StatusPolicy, clock: C) -> Self {
        Self { policy, clock }
    }

    pub fn from_config(config: &EngineConfig, clock: C) -> Self {
        Self::with_clock(StatusPolicy::from(&config.policy), clock)
    }

    pub fn policy(&self) -> &StatusPolicy {
        &self.policy
    }

    /// Recomputes the status of a multi-department request or project from
    /// its acceptances. Single-department requests and `None` pass through.
    pub fn derive_status(&self, request: Option<&Request>) -> Option<Request> {
        request.map(|request| self.derive(request))
    }

    pub fn derive(&self, request: &Request) -> Request {
        if !request.is_multi_department() {
            return request.clone();
        }

        let accepted = request.accepted_count();
        let users_needed = request.users_needed(self.policy.default_users_needed);
        let status = RequestStatus::for_acceptance(accepted, users_needed);

        debug!(
            event_name = "request.status.derived",
            request_id = %request.id,
            accepted,
            users_needed,
            from = %request.status,
            to = %status,
            "derived multi-department request status"
        );

        Request { status, users_accepted: accepted as u32, ..request.clone() }
    }

    pub fn evaluate_acceptance(
        &self,
        request: &Request,
        username: &str,
        user_department: &str,
    ) -> AcceptanceDecision {
        eligibility::evaluate_acceptance(request, username, user_department)
    }

    pub fn can_accept(&self, request: &Request, username: &str, user_department: &str) -> bool {
        self.evaluate_acceptance(request, username, user_department).allowed
    }

    /// Records `username` as accepting every request whose id is `request_id`.
    ///
    /// Eligibility is not checked and a repeated call appends the user again;
    /// callers guard with [`Self::can_accept`] or use
    /// [`Self::try_accept_request`]. An unknown id yields an unchanged copy.
    pub fn accept_request(
        &self,
        requests: &[Request],
        request_id: &RequestId,
        username: &str,
    ) -> Vec<Request> {
        let now = self.clock.now();
        let updated: Vec<Request> = requests
            .iter()
            .map(|request| {
                if &request.id == request_id {
                    self.apply_acceptance(request, username, now)
                } else {
                    request.clone()
                }
            })
            .collect();

        if !requests.iter().any(|request| &request.id == request_id) {
            debug!(
                event_name = "request.acceptance.unmatched",
                request_id = %request_id,
                username,
                "no request matched acceptance"
            );
        }

        updated
    }

    pub fn accept_request_with_audit<S>(
        &self,
        requests: &[Request],
        request_id: &RequestId,
        username: &str,
        sink: &S,
        audit: &AuditContext,
    ) -> Vec<Request>
    where
        S: AuditSink,
    {
        let updated = self.accept_request(requests, request_id, username);
        let mut matched = false;

        for (before, after) in requests.iter().zip(&updated) {
            if &before.id != request_id {
                continue;
            }
            matched = true;
            sink.emit(
                AuditEvent::new(
                    Some(after.id.clone()),
                    audit,
                    "request.acceptance_applied",
                    AuditCategory::Acceptance,
                    AuditOutcome::Success,
                    after.last_status_update.unwrap_or_else(|| self.clock.now_utc()),
                )
                .with_metadata("username", username)
                .with_metadata("users_accepted", after.users_accepted.to_string())
                .with_metadata(
                    "users_needed",
                    after.users_needed(self.policy.default_users_needed).to_string(),
                )
                .with_metadata("from", before.status.label())
                .with_metadata("to", after.status.label()),
            );
        }

        if !matched {
            sink.emit(
                AuditEvent::new(
                    Some(request_id.clone()),
                    audit,
                    "request.acceptance_unmatched",
                    AuditCategory::Acceptance,
                    AuditOutcome::Skipped,
                    self.clock.now_utc(),
                )
                .with_metadata("username", username),
            );
        }

        updated
    }

    /// Checked acceptance: the request must exist and the user must be
    /// eligible against the first request carrying `request_id`.
    pub fn try_accept_request(
        &self,
        requests: &[Request],
        request_id: &RequestId,
        username: &str,
        user_department: &str,
    ) -> Result<Vec<Request>, DomainError> {
        self.check_acceptance(requests, request_id, username, user_department)?;
        Ok(self.accept_request(requests, request_id, username))
    }

    pub fn try_accept_request_with_audit<S>(
        &self,
        requests: &[Request],
        request_id: &RequestId,
        username: &str,
        user_department: &str,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Vec<Request>, DomainError>
    where
        S: AuditSink,
    {
        if let Err(error) = self.check_acceptance(requests, request_id, username, user_department)
        {
            sink.emit(
                AuditEvent::new(
                    Some(request_id.clone()),
                    audit,
                    "request.acceptance_rejected",
                    AuditCategory::Eligibility,
                    AuditOutcome::Rejected,
                    self.clock.now_utc(),
                )
                .with_metadata("username", username)
                .with_metadata("user_department", user_department)
                .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }

        Ok(self.accept_request_with_audit(requests, request_id, username, sink, audit))
    }

    fn check_acceptance(
        &self,
        requests: &[Request],
        request_id: &RequestId,
        username: &str,
        user_department: &str,
    ) -> Result<(), DomainError> {
        let request = requests
            .iter()
            .find(|request| &request.id == request_id)
            .ok_or_else(|| DomainError::RequestNotFound(request_id.clone()))?;

        let decision = self.evaluate_acceptance(request, username, user_department);
        match decision.denial {
            None => Ok(()),
            Some(denial) => {
                info!(
                    event_name = "request.acceptance.denied",
                    request_id = %request_id,
                    username,
                    user_department,
                    reason = %decision.reason,
                    "acceptance denied"
                );
                Err(DomainError::AcceptanceDenied { request_id: request_id.clone(), denial })
            }
        }
    }

    fn apply_acceptance(
        &self,
        request: &Request,
        username: &str,
        now: DateTime<FixedOffset>,
    ) -> Request {
        let mut accepted_by = request.accepted_by.clone().unwrap_or_default();
        accepted_by.push(Acceptor::from(username));

        let users_accepted = accepted_by.len();
        let users_needed = request.users_needed(self.policy.default_users_needed);
        let status = if request.is_multi_department() {
            RequestStatus::for_acceptance(users_accepted, users_needed)
        } else {
            RequestStatus::InProcess
        };

        info!(
            event_name = "request.acceptance.applied",
            request_id = %request.id,
            username,
            users_accepted,
            users_needed,
            from = %request.status,
            to = %status,
            "acceptance applied"
        );

        Request {
            accepted_by: Some(accepted_by),
            users_accepted: users_accepted as u32,
            status,
            last_status_update: Some(now.with_timezone(&Utc)),
            last_status_update_time: Some(self.format_time(now)),
            ..request.clone()
        }
    }

    fn format_time(&self, now: DateTime<FixedOffset>) -> String {
        let mut formatted = String::new();
        if write!(formatted, "{}", now.format(&self.policy.time_format)).is_err() {
            formatted = now.format(DEFAULT_TIME_FORMAT).to_string();
        }
        formatted
    }
}

/// [`StatusEngine::derive_status`] with the default policy.
pub fn derive_status(request: Option<&Request>) -> Option<Request> {
    StatusEngine::new().derive_status(request)
}

pub fn can_accept(request: &Request, username: &str, user_department: &str) -> bool {
    eligibility::can_accept(request, username, user_department)
}

/// [`StatusEngine::accept_request`] with the default policy and system clock.
pub fn accept_request(
    requests: &[Request],
    request_id: &RequestId,
    username: &str,
) -> Vec<Request> {
    StatusEngine::new().accept_request(requests, request_id, username)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::clock::FixedClock;
    use crate::config::EngineConfig;
    use crate::domain::request::{Acceptor, Request, RequestId, RequestStatus};
    use crate::eligibility::AcceptanceDenial;
    use crate::errors::DomainError;

    use super::{accept_request, derive_status, StatusEngine, StatusPolicy};

    fn clock() -> FixedClock {
        FixedClock::parse("2026-05-04T15:04:05-07:00").expect("valid timestamp")
    }

    fn engine() -> StatusEngine<FixedClock> {
        StatusEngine::with_clock(StatusPolicy::default(), clock())
    }

    fn multi(id: &str, users_needed: Option<u32>, accepted_by: &[&str]) -> Request {
        Request {
            multi_department: true,
            departments: Some(vec!["Eng".to_owned(), "Ops".to_owned()]),
            users_needed,
            accepted_by: Some(accepted_by.iter().copied().map(Acceptor::from).collect()),
            users_accepted: accepted_by.len() as u32,
            ..Request::new(id, "dana", "Eng")
        }
    }

    fn id(value: &str) -> RequestId {
        RequestId(value.to_owned())
    }

    #[test]
    fn derive_sets_pending_until_threshold_met() {
        let engine = engine();

        let below = engine.derive(&multi("r1", Some(3), &["bob", "erin"]));
        assert_eq!(below.status, RequestStatus::Pending);
        assert_eq!(below.users_accepted, 2);

        let met = engine.derive(&multi("r1", Some(2), &["bob", "erin"]));
        assert_eq!(met.status, RequestStatus::InProcess);
    }

    #[test]
    fn derive_uses_default_threshold_and_repairs_count() {
        let mut request = multi("r1", None, &["bob"]);
        request.users_accepted = 7;
        request.status = RequestStatus::InProcess;

        let derived = engine().derive(&request);
        assert_eq!(derived.status, RequestStatus::Pending);
        assert_eq!(derived.users_accepted, 1);
        assert_eq!(request.users_accepted, 7, "input must be left untouched");
    }

    #[test]
    fn derive_treats_missing_acceptances_as_zero() {
        let mut project = Request::new("p1", "dana", "Eng");
        project.request_type = Some("project".to_owned());
        project.status = RequestStatus::Completed;

        let derived = engine().derive(&project);
        assert_eq!(derived.status, RequestStatus::Pending);
        assert_eq!(derived.users_accepted, 0);
    }

    #[test]
    fn derive_leaves_single_department_requests_alone() {
        let mut request = Request::new("r2", "dana", "Eng");
        request.status = RequestStatus::Rejected;
        request.accepted_by = Some(vec![Acceptor::from("bob"), Acceptor::from("erin")]);

        assert_eq!(engine().derive(&request), request);
    }

    #[test]
    fn derive_status_passes_none_through() {
        assert_eq!(derive_status(None), None);
        assert_eq!(engine().derive_status(None), None);
    }

    #[test]
    fn accept_appends_and_reaches_threshold() {
        let requests = vec![multi("r1", Some(2), &["bob"])];
        let updated = engine().accept_request(&requests, &id("r1"), "alice");

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].accepted(), ["bob", "alice"]);
        assert_eq!(updated[0].users_accepted, 2);
        assert_eq!(updated[0].status, RequestStatus::InProcess);
        assert_eq!(requests[0].accepted_count(), 1, "source collection is not mutated");
    }

    #[test]
    fn accept_below_threshold_stays_pending() {
        let requests = vec![multi("r1", Some(3), &["bob"])];
        let updated = engine().accept_request(&requests, &id("r1"), "alice");

        assert_eq!(updated[0].status, RequestStatus::Pending);
        assert_eq!(updated[0].users_accepted, 2);
    }

    #[test]
    fn single_department_acceptance_forces_in_process() {
        let mut request = Request::new("r2", "dana", "Eng");
        request.accepted_by = Some(Vec::new());
        request.users_needed = Some(5);

        let updated = engine().accept_request(&[request], &id("r2"), "carol");
        assert_eq!(updated[0].status, RequestStatus::InProcess);
        assert_eq!(updated[0].accepted(), ["carol"]);
        assert_eq!(updated[0].users_accepted, 1);
    }

    #[test]
    fn accept_creates_list_when_absent() {
        let request = Request::new("r2", "dana", "Eng");
        let updated = engine().accept_request(&[request], &id("r2"), "carol");

        assert_eq!(updated[0].accepted_by, Some(vec![Acceptor::from("carol")]));
    }

    #[test]
    fn accept_stamps_time_from_clock() {
        let updated =
            engine().accept_request(&[Request::new("r2", "dana", "Eng")], &id("r2"), "carol");

        assert_eq!(
            updated[0].last_status_update,
            Some(Utc.with_ymd_and_hms(2026, 5, 4, 22, 4, 5).unwrap())
        );
        assert_eq!(updated[0].last_status_update_time.as_deref(), Some("3:04:05 PM"));
    }

    #[test]
    fn custom_time_format_is_applied() {
        let engine = StatusEngine::with_clock(
            StatusPolicy { time_format: "%H:%M".to_owned(), ..StatusPolicy::default() },
            clock(),
        );
        let updated =
            engine.accept_request(&[Request::new("r2", "dana", "Eng")], &id("r2"), "carol");

        assert_eq!(updated[0].last_status_update_time.as_deref(), Some("15:04"));
    }

    #[test]
    fn accept_is_not_idempotent() {
        let engine = engine();
        let once = engine.accept_request(&[multi("r1", Some(3), &[])], &id("r1"), "alice");
        let twice = engine.accept_request(&once, &id("r1"), "alice");

        assert_eq!(twice[0].accepted(), ["alice", "alice"]);
        assert_eq!(twice[0].users_accepted, 2);
    }

    #[test]
    fn unmatched_id_returns_identical_collection() {
        let requests = vec![multi("r1", Some(2), &["bob"]), Request::new("r2", "dana", "Eng")];
        let updated = engine().accept_request(&requests, &id("missing"), "alice");

        assert_eq!(updated, requests);
    }

    #[test]
    fn only_matching_request_changes() {
        let requests = vec![multi("r1", Some(2), &["bob"]), Request::new("r2", "dana", "Eng")];
        let updated = accept_request(&requests, &id("r2"), "carol");

        assert_eq!(updated[0], requests[0]);
        assert_eq!(updated[1].status, RequestStatus::InProcess);
    }

    #[test]
    fn every_request_sharing_the_id_is_updated() {
        let requests = vec![
            multi("r1", Some(2), &["bob"]),
            Request::new("r1", "dana", "Ops"),
            Request::new("r2", "dana", "Eng"),
        ];
        let updated = engine().accept_request(&requests, &id("r1"), "alice");

        assert_eq!(updated[0].accepted(), ["bob", "alice"]);
        assert_eq!(updated[0].status, RequestStatus::InProcess);
        assert_eq!(updated[1].accepted(), ["alice"]);
        assert_eq!(updated[1].status, RequestStatus::InProcess);
        assert_eq!(updated[0].last_status_update, updated[1].last_status_update);
        assert_eq!(updated[2], requests[2]);
    }

    #[test]
    fn checked_acceptance_judges_the_first_request_with_the_id() {
        let mut taken = Request::new("r1", "dana", "Eng");
        taken.accepted_by = Some(vec![Acceptor::from("bob")]);
        taken.users_accepted = 1;
        taken.status = RequestStatus::InProcess;
        let open = multi("r1", Some(3), &[]);

        let error = engine()
            .try_accept_request(&[taken.clone(), open.clone()], &id("r1"), "carol", "Eng")
            .expect_err("first match is already taken");
        assert_eq!(
            error,
            DomainError::AcceptanceDenied {
                request_id: id("r1"),
                denial: AcceptanceDenial::AlreadyAccepted { accepted_by: "bob".to_owned() },
            }
        );

        let updated = engine()
            .try_accept_request(&[open, taken], &id("r1"), "carol", "Eng")
            .expect("first match is open to carol");
        assert_eq!(updated[0].accepted(), ["carol"]);
        assert_eq!(updated[0].status, RequestStatus::Pending);
        assert_eq!(updated[1].accepted(), ["bob", "carol"]);
        assert_eq!(updated[1].status, RequestStatus::InProcess);
    }

    #[test]
    fn non_string_acceptors_count_toward_threshold() {
        let request: Request = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "multiDepartment": true,
            "usersNeeded": 2,
            "acceptedBy": ["bob", null]
        }))
        .expect("stored record should deserialize");

        let derived = engine().derive(&request);
        assert_eq!(derived.users_accepted, 2);
        assert_eq!(derived.status, RequestStatus::InProcess);

        let updated = engine().accept_request(&[request], &id("r1"), "alice");
        assert_eq!(updated[0].users_accepted, 3);
        assert_eq!(
            serde_json::to_value(&updated[0].accepted_by).expect("serialize"),
            serde_json::json!(["bob", null, "alice"])
        );
    }

    #[test]
    fn config_default_threshold_flows_into_engine() {
        let mut config = EngineConfig::default();
        config.policy.default_users_needed = 3;
        let engine = StatusEngine::from_config(&config, clock());

        let derived = engine.derive(&multi("r1", None, &["bob", "erin"]));
        assert_eq!(derived.status, RequestStatus::Pending);
        assert_eq!(engine.policy().default_users_needed, 3);
    }

    #[test]
    fn try_accept_rejects_ineligible_user() {
        let requests = vec![multi("r1", Some(2), &["bob"])];
        let error = engine()
            .try_accept_request(&requests, &id("r1"), "bob", "Eng")
            .expect_err("bob already accepted");

        assert_eq!(
            error,
            DomainError::AcceptanceDenied {
                request_id: id("r1"),
                denial: AcceptanceDenial::DuplicateAcceptance { username: "bob".to_owned() },
            }
        );
    }

    #[test]
    fn try_accept_reports_unknown_request() {
        let error = engine()
            .try_accept_request(&[], &id("r9"), "alice", "Eng")
            .expect_err("nothing to accept");

        assert_eq!(error, DomainError::RequestNotFound(id("r9")));
    }

    #[test]
    fn try_accept_applies_eligible_acceptance() {
        let requests = vec![multi("r1", Some(2), &["bob"])];
        let updated = engine()
            .try_accept_request(&requests, &id("r1"), "alice", "Ops")
            .expect("alice is eligible");

        assert_eq!(updated[0].status, RequestStatus::InProcess);
    }

    #[test]
    fn audited_acceptance_emits_transition_event() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new("corr-7", "alice");
        let requests = vec![multi("r1", Some(2), &["bob"])];

        let _ = engine().accept_request_with_audit(&requests, &id("r1"), "alice", &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "request.acceptance_applied");
        assert_eq!(events[0].correlation_id, "corr-7");
        assert_eq!(events[0].metadata.get("from").map(String::as_str), Some("Pending"));
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("In Process"));
        assert_eq!(events[0].occurred_at, Utc.with_ymd_and_hms(2026, 5, 4, 22, 4, 5).unwrap());
    }

    #[test]
    fn audited_acceptance_records_unmatched_id() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new("corr-8", "alice");

        let updated = engine().accept_request_with_audit(&[], &id("r1"), "alice", &sink, &audit);

        assert!(updated.is_empty());
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "request.acceptance_unmatched");
        assert_eq!(events[0].outcome, AuditOutcome::Skipped);
    }

    #[test]
    fn audited_try_accept_records_rejection() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new("corr-9", "dana");
        let requests = vec![multi("r1", Some(2), &[])];

        let result = engine().try_accept_request_with_audit(
            &requests,
            &id("r1"),
            "dana",
            "Eng",
            &sink,
            &audit,
        );

        assert!(matches!(
            result,
            Err(DomainError::AcceptanceDenied {
                denial: AcceptanceDenial::CreatorCannotAccept { .. },
                ..
            })
        ));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "request.acceptance_rejected");
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
    }
}
