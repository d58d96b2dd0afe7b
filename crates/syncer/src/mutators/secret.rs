use serde_json::Value as Json;
use tandem_core::{Object, ResourceType, SyncResult};

use super::Mutator;

const SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";
const SERVICE_ACCOUNT_UID_ANNOTATION: &str = "kubernetes.io/service-account.uid";

/// Service account tokens are upstream credentials: downstream they must be
/// plain data, or the token controller there would rewrite or delete them.
pub struct SecretMutator;

impl Mutator for SecretMutator {
    fn gvr(&self) -> ResourceType {
        ResourceType::new("", "v1", "secrets")
    }

    fn mutate(&self, obj: &mut Object) -> SyncResult<()> {
        if obj.get("type").and_then(Json::as_str) != Some(SERVICE_ACCOUNT_TOKEN) {
            return Ok(());
        }
        obj.insert("type", Json::String("Opaque".to_string()));
        obj.remove_annotation(SERVICE_ACCOUNT_UID_ANNOTATION);
        Ok(())
    }
}
