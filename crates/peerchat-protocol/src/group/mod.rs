/// Named groups with leader-arbitrated membership.
///
/// Group state travels as retained broadcasts on the `GROUPS` directory;
/// join requests and answers travel on control channels; messages on the
/// group's own topic. Pure state machine: no I/O.
pub mod registry;
pub mod types;

pub use registry::GroupRegistry;
pub use types::{Group, GroupAction, GroupEvent, GroupJoinRequest, GroupLogEntry};
