use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_DEPLOYMENT_TYPE: &str = "pulp";

/// Represents the desired state of a Pulp installation
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Pulp",
    group = "repo-manager.pulpproject.org",
    version = "v1beta2",
    namespaced,
    printcolumn = r#"{"name":"Api", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Pulp-API-Ready\")].status"}"#,
    printcolumn = r#"{"name":"Content", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Pulp-Content-Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "PulpStatus")]
#[serde(rename_all = "camelCase")]
pub struct PulpSpec {
    /// Name of the deployment type, used as a prefix for labels and condition types. Defaults to "pulp".
    pub deployment_type: Option<String>,
    /// Container image name. Defaults to quay.io/pulp/pulp-minimal.
    pub image: Option<String>,
    /// Container image tag. Defaults to "stable".
    pub image_version: Option<String>,
    /// Image pull policy. One of Always, Never, IfNotPresent.
    pub image_pull_policy: Option<String>,

    #[serde(default)]
    pub api: PulpComponent,
    #[serde(default)]
    pub content: PulpComponent,

    /// StorageClass used to provision the file storage PersistentVolumeClaim.
    /// Mutually exclusive with objectStorageS3Secret and objectStorageAzureSecret.
    pub file_storage_class: Option<String>,
    /// Size of the file storage claim, e.g. "50Gi". Required with fileStorageClass.
    pub file_storage_size: Option<String>,
    /// Access mode of the file storage claim. Defaults to ReadWriteMany.
    pub file_storage_access_mode: Option<String>,
    /// Secret holding the S3 bucket configuration.
    pub object_storage_s3_secret: Option<String>,
    /// Secret holding the Azure blob storage configuration.
    pub object_storage_azure_secret: Option<String>,

    #[serde(default)]
    pub database: PulpDatabase,
    /// Secret holding the connection data of the operator-managed database.
    /// Defaults to <name>-postgres-configuration.
    pub postgres_configuration_secret: Option<String>,

    #[serde(default)]
    pub cache: PulpCache,

    /// How Pulp is exposed: "ingress", "route" or "nodeport".
    pub ingress_type: Option<String>,
    /// Hostname used by the ingress.
    pub ingress_host: Option<String>,
    /// Secret holding the TLS certificate for the ingress; switches URLs to https.
    pub ingress_tls_secret: Option<String>,
    /// Hostname used by the route.
    pub route_host: Option<String>,
    /// Deprecated: overrides ingressHost in the token server URL.
    pub hostname: Option<String>,

    /// Secret holding the Keycloak single sign-on configuration.
    pub sso_secret: Option<String>,

    /// Secret holding the admin password. Defaults to <name>-admin-password.
    pub admin_password_secret: Option<String>,
    /// Secret holding the token authentication key pair. Defaults to <name>-container-auth.
    pub container_token_secret: Option<String>,
    /// Secret holding the database fields encryption key. Defaults to <name>-db-fields-encryption.
    pub db_fields_encryption_secret: Option<String>,

    /// Extra settings rendered into settings.py; these override the generated defaults
    #[schemars(default, schema_with = "custom_settings_schema")]
    pub custom_pulp_settings: Option<BTreeMap<String, serde_json::Value>>,
}

fn custom_settings_schema(_g: &mut schemars::gen::SchemaGenerator) -> Schema {
    serde_json::from_value(json!({
        "description": "Extra settings rendered into settings.py; these override the generated defaults",
        "nullable": true,
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    }))
    .unwrap()
}

/// Per-component workload configuration
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PulpComponent {
    /// Desired number of pods. Defaults to 1.
    pub replicas: Option<i32>,
    /// Compute Resources for the container.
    pub resource_requirements: Option<ResourceRequirements>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PulpDatabase {
    /// Secret with POSTGRES_HOST, POSTGRES_PORT, POSTGRES_USERNAME, POSTGRES_PASSWORD,
    /// POSTGRES_DB_NAME and POSTGRES_SSLMODE of an externally managed database
    pub external_db_secret: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PulpCache {
    #[serde(default)]
    pub enabled: bool,
    /// Secret with REDIS_HOST, REDIS_PORT, REDIS_PASSWORD and REDIS_DB of an external cache
    pub external_cache_secret: Option<String>,
    /// Port of the operator-managed redis. Defaults to 6379.
    pub redis_port: Option<i32>,
}

/// Status of the Pulp installation.
/// This is set and managed automatically.
/// Read-only.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct PulpStatus {
    pub conditions: Option<Vec<PulpCondition>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PulpCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,

    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,

    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,

    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,

    /// Type of the condition, e.g. `Pulp-API-Ready`.
    pub r#type: String,
}

impl PulpSpec {
    pub fn deployment_type(&self) -> &str {
        match self.deployment_type.as_deref() {
            Some("") | None => DEFAULT_DEPLOYMENT_TYPE,
            Some(deployment_type) => deployment_type,
        }
    }
}

/// Treats an empty string the same as an unset field
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
