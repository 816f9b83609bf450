pub mod context;
pub mod error;
pub mod lifecycle;
pub mod resolution;

pub use context::GatewayContext;
pub use error::GatewayError;
pub use lifecycle::{LifecycleState, StateTransition};
pub use resolution::Resolution;
