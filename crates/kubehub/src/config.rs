use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::info;

/// Load a client config from an explicit kubeconfig, or infer it (env, default file, in-cluster).
pub async fn load_config(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Config> {
    match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let opts = KubeConfigOptions { context: context.map(str::to_string), ..Default::default() };
            let cfg = Config::from_custom_kubeconfig(kc, &opts)
                .await
                .with_context(|| format!("loading kubeconfig {}", path.display()))?;
            info!(path = %path.display(), server = %cfg.cluster_url, "kubeconfig loaded");
            Ok(cfg)
        }
        None => Config::infer().await.context("inferring kube config"),
    }
}

/// Config addressing one logical cluster (`<base>/clusters/<name>`) of a multi-tenant server.
pub fn cluster_config(base: &Config, cluster: &str) -> Result<Config> {
    let mut cfg = base.clone();
    let url = format!("{}/clusters/{}", base.cluster_url.to_string().trim_end_matches('/'), cluster);
    cfg.cluster_url = url.parse().with_context(|| format!("cluster url {url}"))?;
    Ok(cfg)
}
