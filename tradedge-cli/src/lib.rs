pub mod app;
pub mod live;
pub mod notify;
pub mod telemetry;

pub use app::run as run_app;
