//! Tipos de dados para requisições e respostas do webhook REST do Rasa.
//!
//! O corpo enviado segue o formato `{sender, message, metadata}`. A resposta
//! é tolerante: todos os campos são opcionais e campos desconhecidos são
//! ignorados, porque cada backend devolve um subconjunto diferente.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefixo do slot que carrega a intenção detectada em `flows[].set_slot`.
const CURRENT_FLOW_PREFIX: &str = "current_flow=";

/// Corpo da requisição POST enviada ao webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// Identificador da conversa. Mesmo sender = mesma sessão no backend.
    pub sender: String,
    /// Texto do usuário.
    pub message: String,
    /// Dados livres repassados ao backend.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WebhookRequest {
    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
            metadata: Map::new(),
        }
    }
}

/// Uma entrada de `flows` na resposta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub set_slot: Option<String>,
}

/// Uma mensagem de texto em `responses`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseText {
    #[serde(default)]
    pub text: Option<String>,
}

/// Resposta do webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub flows: Option<Vec<Flow>>,
    #[serde(default)]
    pub responses: Option<Vec<ResponseText>>,
}

impl WebhookReply {
    /// Intenção detectada: o valor do primeiro `set_slot` no formato
    /// `current_flow=<intent>`. `None` se nenhum flow a informar.
    pub fn intent(&self) -> Option<&str> {
        self.flows
            .iter()
            .flatten()
            .filter_map(|flow| flow.set_slot.as_deref())
            .find_map(|slot| slot.strip_prefix(CURRENT_FLOW_PREFIX))
    }

    /// Texto da resposta: `answer`, senão os `responses[].text` unidos por
    /// espaço, senão `text`. Vazio se nada disso existir.
    pub fn answer(&self) -> String {
        if let Some(answer) = self.answer.as_deref().filter(|a| !a.is_empty()) {
            return answer.to_string();
        }

        let joined = self
            .responses
            .iter()
            .flatten()
            .filter_map(|r| r.text.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }

        self.text.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_empty_metadata() {
        let req = WebhookRequest::new("user-abc123", "where is my order");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sender"], "user-abc123");
        assert_eq!(json["message"], "where is my order");
        assert_eq!(json["metadata"], serde_json::json!({}));
    }

    #[test]
    fn reply_deserialize_from_mock_server_format() {
        let body = r#"{
            "text": "Detected intent: order_tracking",
            "flows": [
                {"set_slot": "current_flow=order_tracking"},
                {"set_slot": "debug_delay=0.42s"}
            ],
            "echo": {"sender": "user-1", "message": "track my order"},
            "server_metrics": {"delay_s": 0.42, "elapsed_s": 0.421}
        }"#;
        let reply: WebhookReply = serde_json::from_str(body).unwrap();
        assert_eq!(reply.intent(), Some("order_tracking"));
        assert_eq!(reply.answer(), "Detected intent: order_tracking");
    }

    #[test]
    fn intent_skips_other_slots() {
        let reply = WebhookReply {
            flows: Some(vec![
                Flow { set_slot: None },
                Flow {
                    set_slot: Some("language=ko".into()),
                },
                Flow {
                    set_slot: Some("current_flow=refund_policy".into()),
                },
            ]),
            ..Default::default()
        };
        assert_eq!(reply.intent(), Some("refund_policy"));
    }

    #[test]
    fn intent_missing_without_flows() {
        let reply: WebhookReply = serde_json::from_str(r#"{"flows": null}"#).unwrap();
        assert_eq!(reply.intent(), None);
        assert_eq!(reply.answer(), "");
    }

    #[test]
    fn answer_prefers_answer_then_responses() {
        let reply: WebhookReply = serde_json::from_str(
            r#"{"answer": "", "responses": [{"text": "Hello"}, {"image": "x"}, {"text": "there"}], "text": "fallback"}"#,
        )
        .unwrap();
        assert_eq!(reply.answer(), "Hello there");

        let reply: WebhookReply =
            serde_json::from_str(r#"{"answer": "direct", "text": "fallback"}"#).unwrap();
        assert_eq!(reply.answer(), "direct");
    }
}
