//! `ConfigProvider`: the seam `RealtimeSession` construction loads a tenant's
//! `SecretaryConfig` through. Tenant/secretary configuration storage is a
//! relational store outside this subsystem's scope; this trait and its
//! in-memory test double are the full extent of what lives here. The stub
//! below exists only so `ServerShell` has somewhere to plug in the real
//! store later, without a new dependency standing in for it today.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use voicebridge_core::{SecretaryConfig, TenantId, VoiceError};

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn load(&self, tenant_id: &TenantId, extension: &str) -> Result<SecretaryConfig, VoiceError>;
}

/// Deterministic test/dev double: configs registered ahead of time, keyed by
/// `(tenant_id, extension)`.
#[derive(Default)]
pub struct InMemoryConfigProvider {
    configs: RwLock<HashMap<(String, String), SecretaryConfig>>,
}

impl InMemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: SecretaryConfig) {
        let key = (config.tenant_id.clone(), config.extension.clone());
        self.configs.write().unwrap().insert(key, config);
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn load(&self, tenant_id: &TenantId, extension: &str) -> Result<SecretaryConfig, VoiceError> {
        let key = (tenant_id.to_string(), extension.to_string());
        self.configs.read().unwrap().get(&key).cloned().ok_or_else(|| VoiceError::ConfigMissing {
            tenant_id: tenant_id.to_string(),
            extension: extension.to_string(),
        })
    }
}

/// Relational-store-backed implementation. The store itself is out of
/// scope; this keeps the trait object `ServerShell` wires up honest about
/// what's actually implemented versus what's a future integration point.
pub struct UnimplementedSqlConfigProvider;

#[async_trait]
impl ConfigProvider for UnimplementedSqlConfigProvider {
    async fn load(&self, tenant_id: &TenantId, extension: &str) -> Result<SecretaryConfig, VoiceError> {
        Err(VoiceError::Internal {
            detail: format!(
                "SQL-backed config store not implemented (tenant `{tenant_id}`, extension `{extension}`)"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_core::{AudioFormat, ProviderKind};

    fn config(tenant_id: &str, extension: &str) -> SecretaryConfig {
        SecretaryConfig {
            tenant_id: tenant_id.into(),
            extension: extension.into(),
            greeting_text: "hi".into(),
            farewell_text: "bye".into(),
            system_prompt: "help".into(),
            voice: "alloy".into(),
            provider: ProviderKind::OpenAi,
            audio_format: AudioFormat::Pcm16,
            vad_threshold: 0.3,
            silence_duration_ms: 700,
            max_turns: 50,
            max_duration_s: 600,
            transfer_rules: vec![],
            webhook_url: "https://backend.example".into(),
        }
    }

    #[tokio::test]
    async fn in_memory_provider_round_trips() {
        let provider = InMemoryConfigProvider::new();
        provider.insert(config("t1", "1000"));

        let tenant = TenantId::new("t1").unwrap();
        let loaded = provider.load(&tenant, "1000").await.unwrap();
        assert_eq!(loaded.extension, "1000");
    }

    #[tokio::test]
    async fn in_memory_provider_missing_config_errors() {
        let provider = InMemoryConfigProvider::new();
        let tenant = TenantId::new("t1").unwrap();
        let err = provider.load(&tenant, "9999").await.unwrap_err();
        assert!(matches!(err, VoiceError::ConfigMissing { .. }));
    }

    #[tokio::test]
    async fn sql_stub_is_unimplemented_not_silently_wrong() {
        let provider = UnimplementedSqlConfigProvider;
        let tenant = TenantId::new("t1").unwrap();
        let err = provider.load(&tenant, "1000").await.unwrap_err();
        assert!(matches!(err, VoiceError::Internal { .. }));
    }
}
