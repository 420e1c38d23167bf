//! The `settings.py` payload mounted into every Pulp container.
//!
//! Settings are collected as structured values and only turned into Python source when the
//! server secret is built. Credentials are resolved up front by [`resolve_settings_inputs`]
//! so that the builders stay synchronous and free of cluster access.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, error};

use crate::resources::pulps::{non_empty, Pulp};
use crate::Result;

use super::credentials::retrieve_secret_data;
use super::storage::StorageBackend;
use super::workloads::Workload;
use super::ClusterApi;

pub const SETTINGS_HEADER: &str = "\
# This file is generated by pulp-operator from the Pulp resource.
# Do not edit it: changes are overwritten on the next reconciliation.
";

const DEFAULT_REDIS_PORT: i32 = 6379;

/// Pod template annotation carrying [`settings_hash`]; changing it rolls the pods
pub const SETTINGS_HASH_ANNOTATION: &str = "repo-manager.pulpproject.org/settings-hash";

const DEFAULT_KEYCLOAK_ADMIN_ROLE: &str = "hubadmin";
const DEFAULT_KEYCLOAK_GROUP_TOKEN_CLAIM: &str = "group";
const DEFAULT_KEYCLOAK_ROLE_TOKEN_CLAIM: &str = "client_roles";

#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
    Str(String),
    /// Emitted verbatim, e.g. `None`
    Literal(String),
    Bool(bool),
    Int(i64),
    List(Vec<SettingValue>),
    Dict(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    fn str(value: impl Into<String>) -> Self {
        SettingValue::Str(value.into())
    }

    fn render(&self, out: &mut String) {
        match self {
            SettingValue::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            SettingValue::Literal(s) => out.push_str(s),
            SettingValue::Bool(true) => out.push_str("True"),
            SettingValue::Bool(false) => out.push_str("False"),
            SettingValue::Int(i) => out.push_str(&i.to_string()),
            SettingValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out);
                }
                out.push(']');
            }
            SettingValue::Dict(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    SettingValue::str(key.as_str()).render(out);
                    out.push_str(": ");
                    value.render(out);
                }
                out.push('}');
            }
        }
    }
}

impl From<&Value> for SettingValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SettingValue::Literal("None".into()),
            Value::Bool(b) => SettingValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SettingValue::Int(i),
                None => SettingValue::Literal(n.to_string()),
            },
            Value::String(s) => SettingValue::Str(s.clone()),
            Value::Array(items) => SettingValue::List(items.iter().map(Into::into).collect()),
            Value::Object(entries) => SettingValue::Dict(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Ordered `NAME = value` assignments
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    entries: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn set(&mut self, name: impl Into<String>, value: SettingValue) -> &mut Self {
        self.entries.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.entries.get(name)
    }

    pub fn render(&self) -> String {
        let mut out = String::from(SETTINGS_HEADER);
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(" = ");
            value.render(&mut out);
            out.push('\n');
        }
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheSettings {
    pub host: String,
    pub port: String,
    pub password: String,
    pub db: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectStorageSettings {
    S3 {
        access_key_id: String,
        secret_access_key: String,
        bucket_name: String,
        endpoint: String,
        region: String,
    },
    Azure {
        account_name: String,
        account_key: String,
        container: String,
        container_path: String,
        connection_string: String,
    },
}

/// Keycloak single sign-on
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SsoSettings {
    pub key: String,
    pub secret: String,
    pub public_key: String,
    pub host: String,
    pub port: String,
    pub protocol: String,
    pub realm: String,
    pub admin_role: String,
    pub group_token_claim: String,
    pub role_token_claim: String,
    /// Host the pods use to reach Keycloak when it differs from the public one
    pub host_loopback: String,
}

impl SsoSettings {
    fn realm_url(&self, host: &str) -> String {
        format!(
            "{}://{host}:{}/auth/realms/{}/protocol/openid-connect",
            self.protocol, self.port, self.realm
        )
    }
}

/// Everything the settings payload needs from outside the Pulp resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingsInputs {
    pub database: DatabaseSettings,
    /// Set when the cache is enabled
    pub cache: Option<CacheSettings>,
    /// Set when object storage is the backend and its credentials could be read
    pub object_storage: Option<ObjectStorageSettings>,
    /// Set when an SSO secret is configured and readable
    pub sso: Option<SsoSettings>,
}

/// Missing credentials degrade the payload; any other lookup failure ends the pass
fn degrade<T: Default>(result: Result<T>, secret: &str, namespace: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_missing_credentials() => {
            error!("Secret {secret} in namespace {namespace} is unusable: {err}");
            Ok(T::default())
        }
        Err(err) => Err(err),
    }
}

pub fn postgres_configuration_secret(pulp: &Pulp) -> String {
    non_empty(&pulp.spec.postgres_configuration_secret)
        .map(Into::into)
        .unwrap_or_else(|| format!("{}-postgres-configuration", pulp.name_any()))
}

async fn database_settings(cluster: &dyn ClusterApi, pulp: &Pulp) -> Result<DatabaseSettings> {
    let namespace = pulp.namespace().unwrap_or_default();

    if let Some(secret) = non_empty(&pulp.spec.database.external_db_secret) {
        debug!("Retrieving Postgres credentials from {secret}");
        let data = retrieve_secret_data(
            cluster,
            secret,
            &namespace,
            true,
            &[
                "POSTGRES_HOST",
                "POSTGRES_PORT",
                "POSTGRES_USERNAME",
                "POSTGRES_PASSWORD",
                "POSTGRES_DB_NAME",
                "POSTGRES_SSLMODE",
            ],
        )
        .await;
        let mut data = degrade(data, secret, &namespace)?;
        let mut take = |key: &str| data.remove(key).unwrap_or_default();
        return Ok(DatabaseSettings {
            host: take("POSTGRES_HOST"),
            port: take("POSTGRES_PORT"),
            user: take("POSTGRES_USERNAME"),
            password: take("POSTGRES_PASSWORD"),
            name: take("POSTGRES_DB_NAME"),
            ssl_mode: take("POSTGRES_SSLMODE"),
        });
    }

    let secret = postgres_configuration_secret(pulp);
    debug!("Retrieving Postgres credentials from {secret}");
    let data = retrieve_secret_data(
        cluster,
        &secret,
        &namespace,
        true,
        &["username", "password", "database", "port", "sslmode"],
    )
    .await;
    let mut data = degrade(data, &secret, &namespace)?;
    let mut take = |key: &str| data.remove(key).unwrap_or_default();
    Ok(DatabaseSettings {
        host: format!("{}-database-svc", pulp.name_any()),
        port: take("port"),
        user: take("username"),
        password: take("password"),
        name: take("database"),
        ssl_mode: take("sslmode"),
    })
}

async fn cache_settings(cluster: &dyn ClusterApi, pulp: &Pulp) -> Result<Option<CacheSettings>> {
    let cache = &pulp.spec.cache;
    if !cache.enabled {
        return Ok(None);
    }
    let namespace = pulp.namespace().unwrap_or_default();

    let Some(secret) = non_empty(&cache.external_cache_secret) else {
        return Ok(Some(CacheSettings {
            host: format!("{}-redis-svc.{namespace}", pulp.name_any()),
            port: cache
                .redis_port
                .filter(|port| *port > 0)
                .unwrap_or(DEFAULT_REDIS_PORT)
                .to_string(),
            ..Default::default()
        }));
    };

    let data = retrieve_secret_data(
        cluster,
        secret,
        &namespace,
        true,
        &["REDIS_HOST", "REDIS_PORT", "REDIS_PASSWORD", "REDIS_DB"],
    )
    .await;
    let mut data = degrade(data, secret, &namespace)?;
    let mut take = |key: &str| data.remove(key).unwrap_or_default();
    Ok(Some(CacheSettings {
        host: take("REDIS_HOST"),
        port: take("REDIS_PORT"),
        password: take("REDIS_PASSWORD"),
        db: take("REDIS_DB"),
    }))
}

async fn object_storage_settings(
    cluster: &dyn ClusterApi,
    namespace: &str,
    backend: &StorageBackend,
) -> Result<Option<ObjectStorageSettings>> {
    match backend {
        StorageBackend::Azure { secret } => {
            debug!("Retrieving Azure data from {secret}");
            let data = retrieve_secret_data(
                cluster,
                secret,
                namespace,
                true,
                &[
                    "azure-account-name",
                    "azure-account-key",
                    "azure-container",
                    "azure-container-path",
                    "azure-connection-string",
                ],
            )
            .await;
            let data = degrade(data.map(Some), secret, namespace)?;
            Ok(data.map(|mut data| {
                let mut take = |key: &str| data.remove(key).unwrap_or_default();
                ObjectStorageSettings::Azure {
                    account_name: take("azure-account-name"),
                    account_key: take("azure-account-key"),
                    container: take("azure-container"),
                    container_path: take("azure-container-path"),
                    connection_string: take("azure-connection-string"),
                }
            }))
        }
        StorageBackend::S3 { secret } => {
            debug!("Retrieving S3 data from {secret}");
            let required = retrieve_secret_data(
                cluster,
                secret,
                namespace,
                true,
                &["s3-access-key-id", "s3-secret-access-key", "s3-bucket-name"],
            )
            .await;
            let Some(mut required) = degrade(required.map(Some), secret, namespace)? else {
                return Ok(None);
            };
            let mut optional = retrieve_secret_data(
                cluster,
                secret,
                namespace,
                false,
                &["s3-endpoint", "s3-region"],
            )
            .await?;
            let endpoint = optional.remove("s3-endpoint").unwrap_or_default();
            let region = optional.remove("s3-region").unwrap_or_default();
            if endpoint.is_empty() && region.is_empty() {
                error!("Either s3-endpoint or s3-region needs to be specified in Secret {secret}");
            }

            let mut take = |key: &str| required.remove(key).unwrap_or_default();
            Ok(Some(ObjectStorageSettings::S3 {
                access_key_id: take("s3-access-key-id"),
                secret_access_key: take("s3-secret-access-key"),
                bucket_name: take("s3-bucket-name"),
                endpoint,
                region,
            }))
        }
        StorageBackend::StorageClass { .. } | StorageBackend::EmptyDir => Ok(None),
    }
}

async fn sso_settings(cluster: &dyn ClusterApi, pulp: &Pulp) -> Result<Option<SsoSettings>> {
    let Some(secret) = non_empty(&pulp.spec.sso_secret) else {
        return Ok(None);
    };
    let namespace = pulp.namespace().unwrap_or_default();

    debug!("Retrieving Keycloak configuration from {secret}");
    let required = retrieve_secret_data(
        cluster,
        secret,
        &namespace,
        true,
        &[
            "social_auth_keycloak_key",
            "social_auth_keycloak_secret",
            "social_auth_keycloak_public_key",
            "keycloak_host",
            "keycloak_port",
            "keycloak_protocol",
            "keycloak_realm",
        ],
    )
    .await;
    let Some(mut required) = degrade(required.map(Some), secret, &namespace)? else {
        return Ok(None);
    };
    let mut optional = retrieve_secret_data(
        cluster,
        secret,
        &namespace,
        false,
        &[
            "keycloak_admin_role",
            "keycloak_group_token_claim",
            "keycloak_role_token_claim",
            "keycloak_host_loopback",
        ],
    )
    .await?;

    let mut take = |key: &str| required.remove(key).unwrap_or_default();
    let mut optional_or = |key: &str, default: &str| {
        optional
            .remove(key)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_owned())
    };
    Ok(Some(SsoSettings {
        key: take("social_auth_keycloak_key"),
        secret: take("social_auth_keycloak_secret"),
        public_key: take("social_auth_keycloak_public_key"),
        host: take("keycloak_host"),
        port: take("keycloak_port"),
        protocol: take("keycloak_protocol"),
        realm: take("keycloak_realm"),
        admin_role: optional_or("keycloak_admin_role", DEFAULT_KEYCLOAK_ADMIN_ROLE),
        group_token_claim: optional_or(
            "keycloak_group_token_claim",
            DEFAULT_KEYCLOAK_GROUP_TOKEN_CLAIM,
        ),
        role_token_claim: optional_or("keycloak_role_token_claim", DEFAULT_KEYCLOAK_ROLE_TOKEN_CLAIM),
        host_loopback: optional_or("keycloak_host_loopback", ""),
    }))
}

/// Read every credential the settings payload depends on
pub async fn resolve_settings_inputs(
    cluster: &dyn ClusterApi,
    pulp: &Pulp,
    backend: &StorageBackend,
) -> Result<SettingsInputs> {
    let namespace = pulp.namespace().unwrap_or_default();
    Ok(SettingsInputs {
        database: database_settings(cluster, pulp).await?,
        cache: cache_settings(cluster, pulp).await?,
        object_storage: object_storage_settings(cluster, &namespace, backend).await?,
        sso: sso_settings(cluster, pulp).await?,
    })
}

fn api_service_url(pulp: &Pulp) -> String {
    format!(
        "http://{}-api-svc.{}.svc.cluster.local:{}",
        pulp.name_any(),
        pulp.namespace().unwrap_or_default(),
        Workload::Api.port()
    )
}

/// The URL clients use to reach Pulp
pub fn root_url(pulp: &Pulp) -> String {
    let spec = &pulp.spec;
    match spec.ingress_type.as_deref() {
        Some("route") => match non_empty(&spec.route_host) {
            Some(host) => format!("https://{host}"),
            None => api_service_url(pulp),
        },
        Some("ingress") => match non_empty(&spec.ingress_host) {
            Some(host) => {
                let scheme = if non_empty(&spec.ingress_tls_secret).is_some() {
                    "https"
                } else {
                    "http"
                };
                format!("{scheme}://{host}")
            }
            None => api_service_url(pulp),
        },
        _ => api_service_url(pulp),
    }
}

pub fn token_server(pulp: &Pulp) -> String {
    let spec = &pulp.spec;
    // the deprecated hostname field still wins for ingress installs
    if spec.ingress_type.as_deref() == Some("ingress") {
        if let Some(hostname) = non_empty(&spec.hostname) {
            let scheme = if non_empty(&spec.ingress_tls_secret).is_some() {
                "https"
            } else {
                "http"
            };
            return format!("{scheme}://{hostname}/token/");
        }
    }
    format!("{}/token/", root_url(pulp))
}

/// Fingerprint of the rendered settings.py, stamped on the pods that mount it
pub fn settings_hash(pulp: &Pulp, inputs: &SettingsInputs) -> String {
    use std::hash::Hasher;

    let mut hasher = fnv::FnvHasher::default();
    hasher.write(pulp_settings(pulp, inputs).render().as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Build the full settings payload for the server secret
pub fn pulp_settings(pulp: &Pulp, inputs: &SettingsInputs) -> Settings {
    let root_url = root_url(pulp);
    let db = &inputs.database;
    let mut settings = Settings::default();

    settings
        .set(
            "DB_ENCRYPTION_KEY",
            SettingValue::str("/etc/pulp/keys/database_fields.symmetric.key"),
        )
        .set(
            "GALAXY_COLLECTION_SIGNING_SERVICE",
            SettingValue::str("ansible-default"),
        )
        .set(
            "GALAXY_CONTAINER_SIGNING_SERVICE",
            SettingValue::str("container-default"),
        )
        .set("ANSIBLE_API_HOSTNAME", SettingValue::str(&root_url))
        .set("ANSIBLE_CERTS_DIR", SettingValue::str("/etc/pulp/keys/"))
        .set("CONTENT_ORIGIN", SettingValue::str(&root_url))
        .set(
            "DATABASES",
            SettingValue::Dict(BTreeMap::from([(
                "default".to_owned(),
                SettingValue::Dict(BTreeMap::from([
                    ("HOST".to_owned(), SettingValue::str(&db.host)),
                    (
                        "ENGINE".to_owned(),
                        SettingValue::str("django.db.backends.postgresql_psycopg2"),
                    ),
                    ("NAME".to_owned(), SettingValue::str(&db.name)),
                    ("USER".to_owned(), SettingValue::str(&db.user)),
                    ("PASSWORD".to_owned(), SettingValue::str(&db.password)),
                    ("PORT".to_owned(), SettingValue::str(&db.port)),
                    ("CONN_MAX_AGE".to_owned(), SettingValue::Int(0)),
                    (
                        "OPTIONS".to_owned(),
                        SettingValue::Dict(BTreeMap::from([(
                            "sslmode".to_owned(),
                            SettingValue::str(&db.ssl_mode),
                        )])),
                    ),
                ])),
            )])),
        )
        .set(
            "GALAXY_FEATURE_FLAGS",
            SettingValue::Dict(BTreeMap::from([(
                "execution_environments".to_owned(),
                SettingValue::str("True"),
            )])),
        )
        .set(
            "PRIVATE_KEY_PATH",
            SettingValue::str("/etc/pulp/keys/container_auth_private_key.pem"),
        )
        .set(
            "PUBLIC_KEY_PATH",
            SettingValue::str("/etc/pulp/keys/container_auth_public_key.pem"),
        )
        .set("STATIC_ROOT", SettingValue::str("/var/lib/operator/static/"))
        .set("TOKEN_AUTH_DISABLED", SettingValue::Bool(false))
        .set("TOKEN_SIGNATURE_ALGORITHM", SettingValue::str("ES256"))
        .set("API_ROOT", SettingValue::str("/pulp/"));

    if let Some(cache) = &inputs.cache {
        settings
            .set("CACHE_ENABLED", SettingValue::Bool(true))
            .set("REDIS_HOST", SettingValue::str(&cache.host))
            .set("REDIS_PORT", SettingValue::str(&cache.port))
            .set("REDIS_PASSWORD", SettingValue::str(&cache.password))
            .set("REDIS_DB", SettingValue::str(&cache.db));
    }

    match &inputs.object_storage {
        Some(ObjectStorageSettings::Azure {
            account_name,
            account_key,
            container,
            container_path,
            connection_string,
        }) => {
            settings
                .set("AZURE_CONNECTION_STRING", SettingValue::str(connection_string))
                .set("AZURE_LOCATION", SettingValue::str(container_path))
                .set("AZURE_ACCOUNT_NAME", SettingValue::str(account_name))
                .set("AZURE_ACCOUNT_KEY", SettingValue::str(account_key))
                .set("AZURE_CONTAINER", SettingValue::str(container))
                .set("AZURE_URL_EXPIRATION_SECS", SettingValue::Int(60))
                .set("AZURE_OVERWRITE_FILES", SettingValue::Bool(true))
                .set(
                    "DEFAULT_FILE_STORAGE",
                    SettingValue::str("storages.backends.azure_storage.AzureStorage"),
                );
        }
        Some(ObjectStorageSettings::S3 {
            access_key_id,
            secret_access_key,
            bucket_name,
            endpoint,
            region,
        }) => {
            if !endpoint.is_empty() {
                settings.set("AWS_S3_ENDPOINT_URL", SettingValue::str(endpoint));
            }
            if !region.is_empty() {
                settings.set("AWS_S3_REGION_NAME", SettingValue::str(region));
            }
            settings
                .set("AWS_ACCESS_KEY_ID", SettingValue::str(access_key_id))
                .set("AWS_SECRET_ACCESS_KEY", SettingValue::str(secret_access_key))
                .set("AWS_STORAGE_BUCKET_NAME", SettingValue::str(bucket_name))
                .set("AWS_DEFAULT_ACL", SettingValue::str("@none None"))
                .set("S3_USE_SIGV4", SettingValue::Bool(true))
                .set("AWS_S3_SIGNATURE_VERSION", SettingValue::str("s3v4"))
                .set("AWS_S3_ADDRESSING_STYLE", SettingValue::str("path"))
                .set(
                    "DEFAULT_FILE_STORAGE",
                    SettingValue::str("storages.backends.s3boto3.S3Boto3Storage"),
                )
                .set("MEDIA_ROOT", SettingValue::str(""));
        }
        None => {}
    }

    if let Some(sso) = &inputs.sso {
        let loopback = if sso.host_loopback.is_empty() {
            &sso.host
        } else {
            &sso.host_loopback
        };
        settings
            .set("SOCIAL_AUTH_KEYCLOAK_KEY", SettingValue::str(&sso.key))
            .set("SOCIAL_AUTH_KEYCLOAK_SECRET", SettingValue::str(&sso.secret))
            .set(
                "SOCIAL_AUTH_KEYCLOAK_PUBLIC_KEY",
                SettingValue::str(&sso.public_key),
            )
            .set(
                "SOCIAL_AUTH_KEYCLOAK_AUTHORIZATION_URL",
                SettingValue::str(format!("{}/auth/", sso.realm_url(&sso.host))),
            )
            .set(
                "SOCIAL_AUTH_KEYCLOAK_ACCESS_TOKEN_URL",
                SettingValue::str(format!("{}/token/", sso.realm_url(loopback))),
            )
            .set("SOCIAL_AUTH_LOGIN_REDIRECT_URL", SettingValue::str("/"))
            .set("KEYCLOAK_HOST", SettingValue::str(&sso.host))
            .set("KEYCLOAK_PORT", SettingValue::str(&sso.port))
            .set("KEYCLOAK_PROTOCOL", SettingValue::str(&sso.protocol))
            .set("KEYCLOAK_REALM", SettingValue::str(&sso.realm))
            .set("KEYCLOAK_ADMIN_ROLE", SettingValue::str(&sso.admin_role))
            .set(
                "KEYCLOAK_GROUP_TOKEN_CLAIM",
                SettingValue::str(&sso.group_token_claim),
            )
            .set(
                "KEYCLOAK_ROLE_TOKEN_CLAIM",
                SettingValue::str(&sso.role_token_claim),
            )
            .set(
                "AUTHENTICATION_BACKENDS",
                SettingValue::List(vec![
                    SettingValue::str("social_core.backends.keycloak.KeycloakOAuth2"),
                    SettingValue::str("dynaconf_merge"),
                ]),
            );
    }

    settings.set("TOKEN_SERVER", SettingValue::str(token_server(pulp)));

    for (name, value) in pulp.spec.custom_pulp_settings.iter().flatten() {
        settings.set(name.to_uppercase(), value.into());
    }

    settings
}
