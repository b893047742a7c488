use anyhow::Result;

use crate::rest::MockRestApi;
use crate::state::{MockGatewayConfig, MockGatewayState};
use crate::websocket::MockChannelServer;

/// High-level handle over the mock REST and broadcast servers.
pub struct MockGateway {
    state: MockGatewayState,
    rest: MockRestApi,
    channel: MockChannelServer,
}

impl MockGateway {
    pub async fn start(config: MockGatewayConfig) -> Result<Self> {
        let state = MockGatewayState::new(config);
        let rest = MockRestApi::spawn(state.clone()).await?;
        let channel = MockChannelServer::spawn(state.clone()).await?;
        Ok(Self {
            state,
            rest,
            channel,
        })
    }

    /// Base URL serving `/trades`, `/api/userTransactionsById`, `/v1/sendnotification`
    /// and `/webhook`.
    #[must_use]
    pub fn rest_url(&self) -> String {
        self.rest.base_url()
    }

    #[must_use]
    pub fn messaging_url(&self) -> String {
        format!("{}/v1/sendnotification", self.rest.base_url())
    }

    #[must_use]
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.rest.base_url())
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        self.channel.base_url()
    }

    #[must_use]
    pub fn state(&self) -> MockGatewayState {
        self.state.clone()
    }

    /// Stop accepting channel connections; existing ones stay open.
    pub async fn stop_channel(&mut self) {
        self.channel.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        self.rest.shutdown().await;
        self.channel.shutdown().await;
    }
}
