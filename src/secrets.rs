use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::apps::AppId;
use crate::error::{AppError, AppResult};

pub const STRIPE_API_KEY_SECRET: &str = "stripe_api_key";
pub const STRIPE_WEBHOOK_SECRET: &str = "stripe_webhook_secret";

/// key: secrets-ref -> opaque handle persisted in app data
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub app_id: AppId,
    pub key: String,
    pub id: Uuid,
}

/// Resolved secret. `secret_ref` reflects the stored record, not the lookup input.
#[derive(Clone)]
pub struct Secret {
    pub secret_ref: SecretRef,
    pub value: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("secret_ref", &self.secret_ref)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// key: secrets-store -> external secret store port
///
/// Values are resolved at the point of use and never cached by callers.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_secret(&self, app_id: &AppId, key: &str, value: &str) -> AppResult<SecretRef>;
    async fn get_secret(&self, secret_ref: &SecretRef) -> AppResult<Secret>;
    async fn delete_secret(&self, secret_ref: &SecretRef) -> AppResult<()>;
}

/// Secret store keeping values encrypted with pgcrypto in the application database.
#[derive(Clone)]
pub struct PgSecretStore {
    pool: PgPool,
    encryption_key: String,
}

impl PgSecretStore {
    pub fn new(pool: PgPool, encryption_key: impl Into<String>) -> Self {
        Self {
            pool,
            encryption_key: encryption_key.into(),
        }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn create_secret(&self, app_id: &AppId, key: &str, value: &str) -> AppResult<SecretRef> {
        if key.trim().is_empty() {
            return Err(AppError::validation("secret key is required"));
        }
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO app_secrets (id, namespace, app_id, key, value) VALUES ($1, $2, $3, $4, pgp_sym_encrypt($5, $6))",
        )
        .bind(id)
        .bind(&app_id.namespace)
        .bind(app_id.id)
        .bind(key)
        .bind(value)
        .bind(&self.encryption_key)
        .execute(&self.pool)
        .await?;

        Ok(SecretRef {
            app_id: app_id.clone(),
            key: key.to_string(),
            id,
        })
    }

    async fn get_secret(&self, secret_ref: &SecretRef) -> AppResult<Secret> {
        let row = sqlx::query(
            "SELECT namespace, app_id, key, pgp_sym_decrypt(value, $2) AS value FROM app_secrets WHERE id = $1",
        )
        .bind(secret_ref.id)
        .bind(&self.encryption_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(AppError::SecretStore(format!(
                "secret {} not found",
                secret_ref.id
            )));
        };

        Ok(Secret {
            secret_ref: SecretRef {
                app_id: AppId::new(row.get::<String, _>("namespace"), row.get("app_id")),
                key: row.get("key"),
                id: secret_ref.id,
            },
            value: row.get("value"),
        })
    }

    async fn delete_secret(&self, secret_ref: &SecretRef) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM app_secrets WHERE id = $1")
            .bind(secret_ref.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::SecretStore(format!(
                "secret {} not found",
                secret_ref.id
            )));
        }
        Ok(())
    }
}

pub mod testing {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemorySecretStore {
        secrets: Mutex<HashMap<Uuid, (SecretRef, String)>>,
    }

    impl InMemorySecretStore {
        pub async fn len(&self) -> usize {
            self.secrets.lock().await.len()
        }

        pub async fn values_for(&self, app_id: &AppId) -> Vec<(String, String)> {
            let guard = self.secrets.lock().await;
            let mut values: Vec<(String, String)> = guard
                .values()
                .filter(|(secret_ref, _)| &secret_ref.app_id == app_id)
                .map(|(secret_ref, value)| (secret_ref.key.clone(), value.clone()))
                .collect();
            values.sort();
            values
        }
    }

    #[async_trait]
    impl SecretStore for InMemorySecretStore {
        async fn create_secret(
            &self,
            app_id: &AppId,
            key: &str,
            value: &str,
        ) -> AppResult<SecretRef> {
            let secret_ref = SecretRef {
                app_id: app_id.clone(),
                key: key.to_string(),
                id: Uuid::new_v4(),
            };
            self.secrets
                .lock()
                .await
                .insert(secret_ref.id, (secret_ref.clone(), value.to_string()));
            Ok(secret_ref)
        }

        async fn get_secret(&self, secret_ref: &SecretRef) -> AppResult<Secret> {
            let guard = self.secrets.lock().await;
            let (stored_ref, value) = guard.get(&secret_ref.id).ok_or_else(|| {
                AppError::SecretStore(format!("secret {} not found", secret_ref.id))
            })?;
            Ok(Secret {
                secret_ref: stored_ref.clone(),
                value: value.clone(),
            })
        }

        async fn delete_secret(&self, secret_ref: &SecretRef) -> AppResult<()> {
            self.secrets.lock().await.remove(&secret_ref.id);
            Ok(())
        }
    }
}
