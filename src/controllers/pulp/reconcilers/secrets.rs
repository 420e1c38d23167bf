use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::Result;

use super::definition::BuildContext;
use super::settings::pulp_settings;
use super::{component_labels, object_meta};

pub const SETTINGS_KEY: &str = "settings.py";
pub const DB_FIELDS_ENCRYPTION_KEY: &str = "database_fields.symmetric.key";
pub const ADMIN_PASSWORD_KEY: &str = "password";
pub const CONTAINER_AUTH_PRIVATE_KEY: &str = "container_auth_private_key.pem";
pub const CONTAINER_AUTH_PUBLIC_KEY: &str = "container_auth_public_key.pem";

const ADMIN_PASSWORD_LENGTH: usize = 32;

fn secret<'a>(
    ctx: &BuildContext<'_>,
    name: &str,
    data: impl IntoIterator<Item = (&'a str, String)>,
) -> Secret {
    Secret {
        metadata: object_meta(ctx.pulp, name, component_labels(ctx.pulp, "api")),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k.to_owned(), ByteString(v.into_bytes())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

/// The rendered settings.py shared by the api and content pods
pub fn server_secret(ctx: &BuildContext<'_>) -> Secret {
    let settings = pulp_settings(ctx.pulp, ctx.settings).render();
    secret(ctx, &ctx.names.server, [(SETTINGS_KEY, settings)])
}

// url-safe base64 of 32 random bytes, the format Fernet expects
fn fernet_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    URL_SAFE.encode(key)
}

fn password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn db_fields_encryption_secret(ctx: &BuildContext<'_>) -> Secret {
    secret(
        ctx,
        &ctx.names.db_fields_encryption,
        [(DB_FIELDS_ENCRYPTION_KEY, fernet_key())],
    )
}

pub fn admin_password_secret(ctx: &BuildContext<'_>) -> Secret {
    secret(
        ctx,
        &ctx.names.admin_password,
        [(ADMIN_PASSWORD_KEY, password(ADMIN_PASSWORD_LENGTH))],
    )
}

/// ES256 key pair the api uses to sign registry tokens
pub fn container_auth_secret(ctx: &BuildContext<'_>) -> Result<Secret> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
    Ok(secret(
        ctx,
        &ctx.names.container_auth,
        [
            (CONTAINER_AUTH_PRIVATE_KEY, key_pair.serialize_pem()),
            (CONTAINER_AUTH_PUBLIC_KEY, key_pair.public_key_pem()),
        ],
    ))
}
