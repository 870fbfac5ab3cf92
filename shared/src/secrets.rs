//! Secrets Manager lookups, cached for the life of the Lambda container.

use aws_sdk_secretsmanager::Client as SecretsClient;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Error, Result};

type SecretCache = RwLock<HashMap<String, String>>;

static CACHE: OnceLock<SecretCache> = OnceLock::new();

fn cache() -> &'static SecretCache {
    CACHE.get_or_init(Default::default)
}

/// Secret string stored under `secret_arn`. Each ARN is fetched at most once per process.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    if let Some(hit) = cache().read().await.get(secret_arn).cloned() {
        return Ok(hit);
    }

    let output = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("GetSecretValue for {} failed: {}", secret_arn, e)))?;
    let value = output
        .secret_string
        .ok_or_else(|| Error::Aws(format!("Secret {} has no string value", secret_arn)))?;

    debug!(secret_arn, "Fetched secret");
    cache()
        .write()
        .await
        .insert(secret_arn.to_string(), value.clone());
    Ok(value)
}

/// Extract `key` from a JSON secret, or use the whole string for plain-text secrets.
pub fn secret_field(secret_string: &str, key: &str) -> String {
    serde_json::from_str::<HashMap<String, serde_json::Value>>(secret_string)
        .ok()
        .and_then(|fields| fields.get(key).and_then(|v| v.as_str()).map(String::from))
        .unwrap_or_else(|| secret_string.trim().to_string())
}

/// Resolve a credential given either directly or as a secret ARN.
///
/// A direct value wins. `key` names the field to read from JSON secrets.
pub async fn resolve_credential(
    client: &SecretsClient,
    direct: Option<&str>,
    secret_arn: Option<&str>,
    key: &str,
) -> Result<String> {
    if let Some(value) = direct {
        return Ok(value.to_string());
    }

    let arn = secret_arn.ok_or_else(|| {
        Error::Config(format!("{} not set and no secret ARN configured", key))
    })?;

    let secret_string = get_secret(client, arn).await?;
    Ok(secret_field(&secret_string, key))
}
