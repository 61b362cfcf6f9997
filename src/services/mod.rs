//! Consumer services built on the compute primitive
//!
//! Sharing, publication and notifications never do get-then-put on shared
//! documents; every mutation is one atomic compute.

pub mod notification;
pub mod publication;
pub mod sharing;

pub use notification::{Notification, NotificationKind, NotificationService};
pub use publication::{Publication, PublicationService, PublicationStatus, PublishedResource};
pub use sharing::ShareService;
