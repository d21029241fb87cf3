/// Presence for peerchat.
///
/// Each peer keeps one retained announcement on `USERS/<id>`. The tracker
/// upserts records from announcements and purges a peer only after a grace
/// period following `offline`, debounced by any later `online`.
pub mod tracker;
pub mod types;

pub use tracker::PresenceTracker;
pub use types::{
    Announcement, PresenceAction, PresenceEvent, PresenceRecord, PresenceView, RemovalTimer,
    DEFAULT_GRACE_PERIOD_MS,
};
