use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::{Error, Result};

use super::definition::{ManagedObject, ObjectKind};
use super::ClusterApi;

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(String::from_utf8_lossy(&value.0).into_owned());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

/// Read `keys` out of the Secret `name`.
///
/// With `required`, a missing key is an error. Otherwise missing keys come back as empty
/// strings so callers can test for presence with `is_empty`.
pub async fn retrieve_secret_data(
    cluster: &dyn ClusterApi,
    name: &str,
    namespace: &str,
    required: bool,
    keys: &[&str],
) -> Result<BTreeMap<String, String>> {
    let secret = match cluster.get(ObjectKind::Secret, namespace, name).await? {
        Some(ManagedObject::Secret(secret)) => secret,
        _ => return Err(Error::SecretNotFound(name.into())),
    };

    let mut data = BTreeMap::new();
    for key in keys {
        match secret_value(&secret, key) {
            Some(value) => {
                data.insert((*key).to_owned(), value);
            }
            None if required => {
                return Err(Error::SecretKeyNotFound((*key).into(), name.into()));
            }
            None => {
                debug!("Optional key {key} not found in Secret {name}");
                data.insert((*key).to_owned(), String::new());
            }
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{secret_with, FakeCluster};
    use super::*;

    #[tokio::test]
    async fn required_keys_must_be_present() {
        let cluster = FakeCluster::default();
        cluster.insert(secret_with("default", "pg", &[("username", "pulp")]));

        let data = retrieve_secret_data(&cluster, "pg", "default", true, &["username"])
            .await
            .unwrap();
        assert_eq!(data["username"], "pulp");

        let err = retrieve_secret_data(&cluster, "pg", "default", true, &["username", "password"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecretKeyNotFound(key, secret) if key == "password" && secret == "pg"));
    }

    #[tokio::test]
    async fn optional_keys_default_to_empty() {
        let cluster = FakeCluster::default();
        cluster.insert(secret_with("default", "s3", &[("s3-region", "eu-west-1")]));

        let data = retrieve_secret_data(&cluster, "s3", "default", false, &["s3-endpoint", "s3-region"])
            .await
            .unwrap();
        assert_eq!(data["s3-endpoint"], "");
        assert_eq!(data["s3-region"], "eu-west-1");
    }

    #[tokio::test]
    async fn missing_secret_is_reported() {
        let cluster = FakeCluster::default();
        let err = retrieve_secret_data(&cluster, "absent", "default", false, &["a"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(ref name) if name == "absent"));
        assert!(err.is_missing_credentials());
    }
}
