//! Configuração do harness carregada a partir de `rasa-dispatch.toml`.
//!
//! A struct [`DispatchConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis. As variáveis de
//! ambiente `RASA_DISPATCH_MAX_CONCURRENT` e `RASA_DISPATCH_WEBHOOK_URL` têm
//! precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::harness::SenderMode;
use crate::queue::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONCURRENT, QueueConfig};
use crate::webhook::DEFAULT_WEBHOOK_URL;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "rasa-dispatch.toml";

const ENV_MAX_CONCURRENT: &str = "RASA_DISPATCH_MAX_CONCURRENT";
const ENV_WEBHOOK_URL: &str = "RASA_DISPATCH_WEBHOOK_URL";

/// Configuração de nível superior carregada de `rasa-dispatch.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DispatchConfig {
    /// Limite inicial de requisições simultâneas.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Endpoint do webhook REST do backend conversacional.
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,

    /// Timeout total por requisição, em milissegundos.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Quantos jobs finalizados a fila mantém para consulta.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Como os ids de sender são gerados.
    #[serde(default)]
    pub sender_mode: SenderMode,
}

// Valor padrão para o limite de concorrência: 3.
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_webhook_url() -> String {
    DEFAULT_WEBHOOK_URL.to_string()
}

// Valor padrão para o timeout: 30000ms.
fn default_timeout_ms() -> u64 {
    30_000
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            webhook_url: default_webhook_url(),
            timeout_ms: default_timeout_ms(),
            history_limit: default_history_limit(),
            sender_mode: SenderMode::default(),
        }
    }
}

impl DispatchConfig {
    /// Carrega a configuração de `rasa-dispatch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega de `path` e aplica as variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<DispatchConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica overrides vindos de `lookup` (normalmente `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT).filter(|v| !v.is_empty()) {
            self.max_concurrent = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_CONCURRENT} must be a positive integer, got {raw:?}"))?;
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|v| !v.is_empty()) {
            self.webhook_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            bail!("max_concurrent must be at least 1");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be at least 1");
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            history_limit: self.history_limit,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
