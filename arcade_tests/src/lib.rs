//! Shared harness for the integration tests.

use std::time::Duration;

use arcade_client::GameClient;
use arcade_server::server::bind_ephemeral;
use arcade_shared::{components::WeaponKind, config::EngineConfig};
use tokio::task::JoinHandle;

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Server running on an ephemeral port; aborted on drop.
pub struct TestServer {
    pub cfg: EngineConfig,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(cfg: EngineConfig) -> anyhow::Result<Self> {
        init_tracing();
        let (mut server, cfg) = bind_ephemeral(cfg).await?;
        let task = tokio::spawn(async move { server.run().await });
        Ok(Self { cfg, task })
    }

    pub async fn start_default() -> anyhow::Result<Self> {
        Self::start(EngineConfig::default()).await
    }

    /// Connects and registers `name`, which also logs the session in.
    pub async fn player(&self, name: &str) -> anyhow::Result<GameClient> {
        let mut client = GameClient::connect(&self.cfg).await?;
        anyhow::ensure!(client.register(name, "pw").await?, "register {name}");
        Ok(client)
    }

    /// Registers `name` on a throwaway connection, then logs in on a new one.
    pub async fn returning_player(&self, name: &str) -> anyhow::Result<GameClient> {
        let mut first = GameClient::connect(&self.cfg).await?;
        anyhow::ensure!(first.register(name, "pw").await?, "register {name}");
        first.disconnect("done").await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client = GameClient::connect(&self.cfg).await?;
        anyhow::ensure!(
            client.login(name, "pw", WeaponKind::Classic).await?,
            "login {name}"
        );
        Ok(client)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Generous upper bound for one server round trip in tests.
pub const REPLY: Duration = Duration::from_secs(3);
