//! Domain model (ids, lifecycle state, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;

pub use self::errors::{LifecycleError, QueueError};
pub use self::events::LifecycleEvent;
pub use self::ids::TaskId;
pub use self::state::LifecycleState;
