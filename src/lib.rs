//! hostharden library
//!
//! Inspects Linux host configuration and remediates it through a
//! backup → edit → validate → apply → verify → rollback protocol.

pub mod audit;
pub mod authorize;
pub mod breach;
pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod config;
pub mod directive;
pub mod editor;
pub mod engine;
pub mod error;
pub mod menu;
pub mod policy;
pub mod preflight;
pub mod process_guard;
pub mod resolver;
pub mod routines;
pub mod service;
pub mod snapshot;
pub mod validate;

pub use audit::{AuditSink, FileAuditSink, MemoryAuditSink};
pub use authorize::{AuthorizationProvider, AuthorizationRequest, AutoApprove, AutoDeny, StdinAuthorizer};
pub use breach::{BreachStatus, RangeClient};
pub use command_runner::{CommandOutput, CommandRunner, SystemRunner};
pub use config::HardenConfig;
pub use directive::{ConfigTarget, Directive, Existence, InsertionPolicy, Separator};
pub use engine::permissions::PermissionTarget;
pub use engine::{MutationContext, MutationEngine, MutationOutcome, MutationReport, MutationStage};
pub use error::{HardenError, Result};
pub use policy::{Policy, is_compliant};
pub use process_guard::{ChildRegistry, CommandProcessGroup, CriticalSection};
pub use resolver::{CurrentValue, EffectiveValueResolver, LayeredResolver, Resolution, ValueSource};
pub use routines::{Routine, RoutineReport};
pub use service::{ServiceController, SystemdController};
pub use snapshot::ConfigSnapshot;
pub use validate::{ConfigValidator, ValidationReport};
