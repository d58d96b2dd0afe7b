use k8s_openapi::api::core::v1::{EnvVar, PodSpec};
use serde_json::Value as Json;
use tandem_core::{Object, ResourceType, SyncError, SyncResult};
use url::Url;

use super::Mutator;

/// Points pods at the upstream API server instead of the downstream one and
/// stops the downstream service account token from being mounted.
///
/// The pod template is edited as JSON; fields the typed model does not know
/// are forwarded unchanged.
pub struct DeploymentMutator {
    host: String,
    port: String,
}

impl DeploymentMutator {
    pub fn new(upstream_url: &Url) -> Self {
        Self {
            host: upstream_url.host_str().unwrap_or_default().to_string(),
            port: upstream_url.port_or_known_default().map(|p| p.to_string()).unwrap_or_default(),
        }
    }

    fn overrides(&self) -> SyncResult<Vec<(String, Json)>> {
        [
            ("KUBERNETES_SERVICE_PORT", &self.port),
            ("KUBERNETES_SERVICE_PORT_HTTPS", &self.port),
            ("KUBERNETES_SERVICE_HOST", &self.host),
        ]
        .into_iter()
        .map(|(name, value)| -> SyncResult<(String, Json)> {
            let var = EnvVar { name: name.to_string(), value: Some(value.clone()), value_from: None };
            Ok((var.name.clone(), serde_json::to_value(&var).map_err(mutation_error)?))
        })
        .collect()
    }

    fn mutate_pod(&self, pod: &mut Json) -> SyncResult<()> {
        let pod = pod.as_object_mut().ok_or_else(|| mutation_error("spec.template.spec is not an object"))?;
        pod.insert("automountServiceAccountToken".to_string(), Json::Bool(false));
        let overrides = self.overrides()?;
        let Some(containers) = pod.get_mut("containers").and_then(Json::as_array_mut) else {
            return Ok(());
        };
        for container in containers.iter_mut().filter_map(Json::as_object_mut) {
            let env = container.entry("env").or_insert(Json::Null);
            if env.is_null() {
                *env = Json::Array(Vec::new());
            }
            let Some(env) = env.as_array_mut() else { continue };
            for (name, var) in &overrides {
                match env.iter_mut().find(|e| e.get("name").and_then(Json::as_str) == Some(name.as_str())) {
                    Some(existing) => *existing = var.clone(),
                    None => env.push(var.clone()),
                }
            }
        }
        Ok(())
    }
}

fn mutation_error(message: impl ToString) -> SyncError {
    SyncError::Mutation { resource: "deployments.v1.apps".into(), message: message.to_string() }
}

impl Mutator for DeploymentMutator {
    fn gvr(&self) -> ResourceType {
        ResourceType::new("apps", "v1", "deployments")
    }

    fn mutate(&self, obj: &mut Object) -> SyncResult<()> {
        let Some(mut spec) = obj.get("spec").cloned() else {
            return Ok(());
        };
        let Some(pod) = spec.pointer_mut("/template/spec") else {
            return Ok(());
        };
        // decoded only to reject malformed templates
        serde_json::from_value::<PodSpec>(pod.clone()).map_err(mutation_error)?;
        self.mutate_pod(pod)?;
        obj.insert("spec", spec);
        Ok(())
    }
}
