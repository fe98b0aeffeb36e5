mod allocation;
mod allocator;
mod binder;
mod definition;
mod engine;
mod error;
mod filter;
pub mod filters;
mod provider;
mod registry;
mod session;
mod targeting;
mod telemetry;
mod test_common;
mod variant;

pub use allocation::*;
pub use allocator::*;
pub use definition::*;
pub use engine::*;
pub use error::*;
pub use filter::*;
pub use provider::*;
pub use session::*;
pub use targeting::*;
pub use telemetry::*;
pub use variant::*;
