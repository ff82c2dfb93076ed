use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::apps::AppId;
use crate::error::{AppError, AppResult};
use crate::secrets::{Secret, SecretRef, SecretStore};

/// Secret store backed by a HashiCorp Vault KV v2 mount.
///
/// Each secret lives at `apps/secrets/<id>` and carries its own namespace,
/// app id and key next to the value.
pub struct VaultSecretStore {
    base: String,
    token: String,
    client: Client,
}

impl VaultSecretStore {
    pub fn from_env() -> AppResult<Option<Self>> {
        let (Ok(base), Ok(token)) = (std::env::var("VAULT_ADDR"), std::env::var("VAULT_TOKEN"))
        else {
            return Ok(None);
        };
        Self::new(base, token).map(Some)
    }

    pub fn new(base: impl Into<String>, token: impl Into<String>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::SecretStore(format!("failed to build vault client: {err}")))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    fn path(id: Uuid) -> String {
        format!("secret/data/apps/secrets/{id}")
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> AppResult<Value> {
        let url = format!("{}/v1/{}", self.base, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("X-Vault-Token", &self.token);
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.map_err(vault_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AppError::SecretStore(format!("vault path {path} not found")));
        }
        let resp = resp.error_for_status().map_err(vault_error)?;
        if resp.content_length().unwrap_or(0) == 0 {
            return Ok(Value::Null);
        }
        resp.json().await.map_err(vault_error)
    }
}

fn vault_error(err: reqwest::Error) -> AppError {
    tracing::error!(?err, "vault request failed");
    AppError::SecretStore(format!("vault request failed: {err}"))
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn create_secret(&self, app_id: &AppId, key: &str, value: &str) -> AppResult<SecretRef> {
        if key.trim().is_empty() {
            return Err(AppError::validation("secret key is required"));
        }
        let id = Uuid::new_v4();
        self.request(
            Method::POST,
            &Self::path(id),
            Some(json!({
                "data": {
                    "namespace": app_id.namespace,
                    "app_id": app_id.id,
                    "key": key,
                    "value": value,
                }
            })),
        )
        .await?;

        Ok(SecretRef {
            app_id: app_id.clone(),
            key: key.to_string(),
            id,
        })
    }

    async fn get_secret(&self, secret_ref: &SecretRef) -> AppResult<Secret> {
        let body = self
            .request(Method::GET, &Self::path(secret_ref.id), None)
            .await?;
        let data = &body["data"]["data"];
        let field = |name: &str| -> AppResult<String> {
            data[name].as_str().map(str::to_string).ok_or_else(|| {
                AppError::SecretStore(format!(
                    "vault secret {} is missing field {name}",
                    secret_ref.id
                ))
            })
        };
        let app_id = Uuid::parse_str(&field("app_id")?).map_err(|err| {
            AppError::SecretStore(format!("vault secret {} has bad app id: {err}", secret_ref.id))
        })?;

        Ok(Secret {
            secret_ref: SecretRef {
                app_id: AppId::new(field("namespace")?, app_id),
                key: field("key")?,
                id: secret_ref.id,
            },
            value: field("value")?,
        })
    }

    async fn delete_secret(&self, secret_ref: &SecretRef) -> AppResult<()> {
        self.request(
            Method::DELETE,
            &format!("secret/metadata/apps/secrets/{}", secret_ref.id),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    #[tokio::test]
    async fn reads_namespace_from_stored_secret() {
        let server = MockServer::start_async().await;
        let app_id = AppId::generate("acme");
        let secret_id = Uuid::new_v4();

        let read = server.mock(|when, then| {
            when.method(GET)
                .path(format!("/v1/secret/data/apps/secrets/{secret_id}"))
                .header("X-Vault-Token", "root");
            then.status(200).json_body(json!({
                "data": {
                    "data": {
                        "namespace": "acme",
                        "app_id": app_id.id.to_string(),
                        "key": "stripe_webhook_secret",
                        "value": "whsec_123",
                    }
                }
            }));
        });

        let store = VaultSecretStore::new(server.base_url(), "root").unwrap();
        let secret = store
            .get_secret(&SecretRef {
                app_id: AppId::new("other", app_id.id),
                key: "stripe_webhook_secret".into(),
                id: secret_id,
            })
            .await
            .unwrap();

        read.assert();
        assert_eq!(secret.secret_ref.app_id, app_id);
        assert_eq!(secret.value, "whsec_123");
    }

    #[tokio::test]
    async fn create_writes_scoped_payload() {
        let server = MockServer::start_async().await;
        let write = server.mock(|when, then| {
            when.method(POST)
                .path_contains("/v1/secret/data/apps/secrets/")
                .body_contains("\"namespace\":\"acme\"")
                .body_contains("\"key\":\"stripe_api_key\"");
            then.status(204);
        });

        let store = VaultSecretStore::new(server.base_url(), "root").unwrap();
        let app_id = AppId::generate("acme");
        let secret_ref = store
            .create_secret(&app_id, "stripe_api_key", "sk_test_1")
            .await
            .unwrap();

        write.assert();
        assert_eq!(secret_ref.app_id, app_id);
    }

    #[tokio::test]
    async fn missing_secret_is_store_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET);
            then.status(404);
        });

        let store = VaultSecretStore::new(server.base_url(), "root").unwrap();
        let err = store
            .get_secret(&SecretRef {
                app_id: AppId::generate("acme"),
                key: "k".into(),
                id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SecretStore(_)));
    }
}
