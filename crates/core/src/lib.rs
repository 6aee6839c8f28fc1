pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod telemetry;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, LoadOptions};
pub use domain::request::{Request, RequestId, RequestStatus};
pub use eligibility::{evaluate_acceptance, AcceptanceDecision, AcceptanceDenial};
pub use engine::{accept_request, can_accept, derive_status, StatusEngine, StatusPolicy};
pub use errors::{ApplicationError, DomainError, InterfaceError};
