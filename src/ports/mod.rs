pub mod gateway;
pub mod notifications;
pub mod telemetry;

pub use gateway::{
    Authenticator, ConnectionHandlers, ConnectionObserver, Emitter, EventDelegate,
    NoopHandlers, RequestHandler,
};
pub use notifications::{FocusSink, LifecycleStateSink, UserSettingsSink};
pub use telemetry::TelemetrySink;
