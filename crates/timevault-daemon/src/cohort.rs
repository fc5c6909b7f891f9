//! In-process cohort and the demo run.

use rand::rngs::OsRng;
use timevault::{TimeVault, VaultConfig};
use timevault_crypto::group::{point_to_bytes, KeyPair};
use timevault_transport::LocalNetwork;
use tracing::info;

use crate::config::{DaemonConfig, DemoConfig};

/// A running cohort of engines sharing one [`LocalNetwork`].
pub struct Cohort {
    nodes: Vec<TimeVault>,
}

impl Cohort {
    /// Generate `size` key pairs, connect them and start one engine each.
    pub fn start(size: usize, capacity: usize, vault: &VaultConfig) -> anyhow::Result<Self> {
        let keys: Vec<KeyPair> = (0..size).map(|_| KeyPair::generate(&mut OsRng)).collect();
        let public_keys: Vec<[u8; 32]> = keys.iter().map(|k| point_to_bytes(k.public())).collect();
        let network = LocalNetwork::new(&public_keys, capacity);

        let mut nodes = Vec::with_capacity(size);
        for (keys, (endpoint, inbound)) in keys.into_iter().zip(network.into_parts()) {
            nodes.push(TimeVault::start(vault.clone(), keys, endpoint, inbound)?);
        }
        info!(size, "cohort started");
        Ok(Self { nodes })
    }

    /// Handle to node `index`.
    pub fn node(&self, index: u32) -> anyhow::Result<&TimeVault> {
        self.nodes
            .get(index as usize)
            .ok_or_else(|| anyhow::anyhow!("no node {index} in cohort of {}", self.nodes.len()))
    }

    /// Stop every engine.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        info!("cohort stopped");
    }
}

/// Seal the demo message at the sealer, wait out the duration, open it at the
/// opener and check the result.
pub async fn run_demo(cohort: &Cohort, config: &DaemonConfig) -> anyhow::Result<()> {
    let DemoConfig {
        message,
        sealer,
        ..
    } = &config.demo;
    let duration = config.demo.duration();

    let sealed = cohort.node(*sealer)?.seal(message.as_bytes(), duration).await?;
    info!(
        sid = %sealed.sid,
        sealer,
        ciphertext = %hex::encode(sealed.ciphertext.to_bytes()),
        ?duration,
        "message sealed"
    );

    // Every node arms its own timer when its DKG completes, which can be
    // slightly after the sealer's.
    tokio::time::sleep(duration + duration / 10).await;

    let opener = config.opener();
    let plaintext = cohort
        .node(opener)?
        .open(&sealed.sid, &sealed.ciphertext)
        .await?;
    let text = String::from_utf8_lossy(&plaintext);
    info!(sid = %sealed.sid, opener, plaintext = %text, "message opened");

    if plaintext != message.as_bytes() {
        anyhow::bail!("opened message differs from sealed message");
    }
    Ok(())
}
