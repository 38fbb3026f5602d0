//! Session lifecycle on top of the request pipeline.

pub mod messages;
pub mod profile;
pub mod session;

pub use messages::{flatten_field_errors, AuthFailure};
pub use profile::{classify_avatar, AvatarSource, ProfileUpdate, PROFILE_PATH};
pub use session::{AuthSession, SessionPhase, SessionSnapshot};
