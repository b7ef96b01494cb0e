//! High-level client API.

use crate::connection::{Connection, RndcConfig};
use crate::error::ClientError;

/// High-level async client for the control channel.
///
/// Each command opens a fresh connection: the protocol allows exactly one
/// exchange per connection.
pub struct RndcClient {
    config: RndcConfig,
}

impl RndcClient {
    /// Creates a client with the given configuration.
    pub fn new(config: RndcConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RndcConfig {
        &self.config
    }

    /// Runs one command and returns the server's response text.
    pub async fn command(&self, command: &str) -> Result<String, ClientError> {
        Connection::new(self.config.clone()).execute(command).await
    }

    /// Asks the server for its status summary.
    pub async fn status(&self) -> Result<String, ClientError> {
        self.command("status").await
    }

    /// Reloads configuration and zones.
    pub async fn reload(&self) -> Result<String, ClientError> {
        self.command("reload").await
    }

    /// Reloads the configuration file and any new zones.
    pub async fn reconfig(&self) -> Result<String, ClientError> {
        self.command("reconfig").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_keeps_config() {
        let client = RndcClient::new(RndcConfig::new("127.0.0.1", "abcd").with_port(5));
        assert_eq!(client.config().addr(), "127.0.0.1:5");
    }
}
