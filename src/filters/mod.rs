//! Built-in feature filters.
//!
//! These ship with the crate but are not registered automatically; register
//! the ones a configuration actually references.

mod percentage;
mod targeting;
mod time_window;

pub use percentage::{PercentageFilter, PercentageFilterSettings};
pub use targeting::{
    Audience, AudienceExclusion, GroupRollout, TargetingFilter, TargetingFilterSettings,
};
pub use time_window::{TimeWindowFilter, TimeWindowFilterSettings};
