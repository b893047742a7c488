//! Utilities for standing up a mock research gateway that exercises the alert
//! pipeline end to end.

pub mod fixtures;
pub mod gateway;
pub mod rest;
pub mod scenario;
pub mod state;
pub mod websocket;

pub use fixtures::TradeRowBuilder;
pub use gateway::MockGateway;
pub use scenario::{Scenario, ScenarioAction, ScenarioManager, ScenarioTrigger};
pub use state::{MockGatewayConfig, MockGatewayState, PackageGrant};
