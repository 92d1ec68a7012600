//! Domain models

pub mod endpoint;
pub mod group;
pub mod request_log;
pub mod scim;
pub mod user;

pub use endpoint::{CreateEndpointInput, Endpoint, EndpointConfig, EndpointStats, UpdateEndpointInput};
pub use group::{GroupMemberRecord, GroupRecord, MemberInput, MemberSpec, NewGroup};
pub use request_log::{NewRequestLog, RequestLog, RequestLogQuery};
pub use user::{NewUser, UserRecord};
