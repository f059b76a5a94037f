//! Tipos de erro para o cliente de webhook.
//!
//! Define [`WebhookError`] com variantes para status HTTP inesperado, falhas
//! de rede e corpos de resposta inválidos. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao chamar o webhook do backend conversacional.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// O servidor respondeu com status fora da faixa 2xx.
    /// Contém o código HTTP e o corpo da resposta, quando legível.
    #[error("HTTP error! status: {status}: {body}")]
    Status { status: u16, body: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// O corpo da resposta não é o JSON esperado.
    #[error("invalid webhook response: {0}")]
    Decode(String),
}
