//! `warden-core`: identifiers, errors and the condition builder shared by
//! every projection.
//!
//! Nothing in here touches storage; conditions are plain data that a store
//! evaluates against its rows.

pub mod condition;
pub mod error;
pub mod id;

pub use condition::{
    Column, Condition, ConditionError, Direction, NumberOperation, Query, Record, TextOperation,
    Value,
};
pub use error::{DomainError, DomainResult};
pub use id::{
    AuthorizationId, IdpId, InstanceId, OrgId, ProjectGrantId, ProjectId, SessionId, UserId,
};
