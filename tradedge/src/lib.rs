//! Tradedge aggregate crate that re-exports the main components for downstream users.

pub use tradedge_alerts as alerts;
pub use tradedge_config as config;
pub use tradedge_core as core;
pub use tradedge_gateway as gateway;
pub use tradedge_twm as twm;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use tradedge_alerts::*;
    pub use tradedge_core::*;
    pub use tradedge_gateway::*;
}
