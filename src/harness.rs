//! Cola do harness de testes entre arquivos de frases, a fila de despacho e
//! o backend conversacional.
//!
//! Cada linha de entrada vira um [`Probe`]: a mensagem, a intenção esperada
//! (escrita inline como `--nome_da_intencao`) e um id de sender. Os probes são
//! submetidos a uma [`DispatchQueue`] cujos handlers chamam o webhook real ou
//! um [`SimulatedBackend`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::queue::{DispatchQueue, JobId, ResetSummary};
use crate::webhook::{WebhookClient, WebhookReply, WebhookRequest};

/// Uma linha de entrada do harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub message: String,
    pub expected_intent: Option<String>,
}

impl Utterance {
    /// Interpreta uma linha como `where is my parcel --order_tracking`.
    ///
    /// O primeiro marcador `--nome` (letras, dígitos, sublinhado) é a
    /// intenção esperada e sai da mensagem. Retorna `None` para linhas sem
    /// texto de mensagem.
    pub fn parse(line: &str) -> Option<Self> {
        let (message, expected_intent) = match find_intent_marker(line) {
            Some((start, end)) => {
                let message = format!("{}{}", &line[..start], &line[end..]);
                (message, Some(line[start + 2..end].to_string()))
            }
            None => (line.to_string(), None),
        };
        let message = message.trim();
        if message.is_empty() {
            return None;
        }
        Some(Self {
            message: message.to_string(),
            expected_intent,
        })
    }
}

/// Interpreta cada linha não vazia de `input`.
pub fn parse_batch(input: &str) -> Vec<Utterance> {
    input.lines().filter_map(Utterance::parse).collect()
}

// Faixa de bytes do primeiro `--[A-Za-z0-9_]+` em `line`.
fn find_intent_marker(line: &str) -> Option<(usize, usize)> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i + 2 < bytes.len() {
        if bytes[i] == b'-' && bytes[i + 1] == b'-' {
            let name_len = bytes[i + 2..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                .count();
            if name_len > 0 {
                return Some((i, i + 2 + name_len));
            }
        }
        i += 1;
    }
    None
}

/// Resultado da comparação entre a intenção esperada e a detectada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Ok,
    Ng,
    /// Sem intenção esperada, nada a comparar.
    Unvalidated,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => write!(f, "OK"),
            Verdict::Ng => write!(f, "NG"),
            Verdict::Unvalidated => write!(f, "None"),
        }
    }
}

pub fn grade(expected: Option<&str>, actual: Option<&str>) -> Verdict {
    match expected {
        None => Verdict::Unvalidated,
        Some(expected) if Some(expected) == actual => Verdict::Ok,
        Some(_) => Verdict::Ng,
    }
}

/// Como os ids de sender são atribuídos aos probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderMode {
    /// Um sender novo por probe: cada mensagem abre a própria conversa.
    #[default]
    Random,
    /// Um sender para a sessão toda: as mensagens compartilham a conversa.
    Fixed,
}

impl fmt::Display for SenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderMode::Random => write!(f, "random"),
            SenderMode::Fixed => write!(f, "fixed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SenderIds {
    mode: SenderMode,
    fixed: Option<String>,
}

impl SenderIds {
    pub fn new(mode: SenderMode) -> Self {
        Self { mode, fixed: None }
    }

    pub fn mode(&self) -> SenderMode {
        self.mode
    }

    pub fn next_id(&mut self) -> String {
        match self.mode {
            SenderMode::Random => format!("user-{}", random_suffix()),
            SenderMode::Fixed => self
                .fixed
                .get_or_insert_with(|| format!("fixed-{}", random_suffix()))
                .clone(),
        }
    }

    /// Esquece o sender fixo para a próxima sessão abrir outra conversa.
    pub fn clear(&mut self) {
        self.fixed = None;
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Payload da fila para uma requisição do harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub sender: String,
    pub message: String,
    pub expected_intent: Option<String>,
}

/// O que o backend respondeu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReply {
    pub intent: Option<String>,
    pub answer: String,
}

impl ProbeReply {
    pub fn verdict(&self, probe: &Probe) -> Verdict {
        grade(probe.expected_intent.as_deref(), self.intent.as_deref())
    }
}

impl From<WebhookReply> for ProbeReply {
    fn from(reply: WebhookReply) -> Self {
        Self {
            intent: reply.intent().map(str::to_string),
            answer: reply.answer(),
        }
    }
}

pub type ProbeQueue = DispatchQueue<Probe, ProbeReply>;

/// Tabela palavra-chave → intenção usada pelo [`SimulatedBackend`].
const INTENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("product_master_data", &["product", "master", "catalog"]),
    ("order_tracking", &["order", "tracking", "track", "parcel"]),
    ("refund_policy", &["refund", "return"]),
    ("greeting", &["hello", "hi", "hey"]),
    ("goodbye", &["bye", "goodbye"]),
];

const DEFAULT_INTENT: &str = "faq_general";

/// Escolhe a intenção por palavra-chave, com `faq_general` como fallback.
pub fn pick_intent(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| keywords.contains(&word))
        })
        .map(|(intent, _)| *intent)
        .unwrap_or(DEFAULT_INTENT)
}

/// Substituto offline do webhook: latência aleatória, intenções por
/// palavra-chave e uma fração configurável de intenções erradas e falhas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedBackend {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Probabilidade de responder com outra intenção que não a da palavra-chave.
    pub perturb_rate: f64,
    /// Probabilidade de falhar a requisição.
    pub failure_rate: f64,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(2000),
            perturb_rate: 0.15,
            failure_rate: 0.0,
        }
    }
}

impl SimulatedBackend {
    pub async fn reply(&self, message: &str) -> anyhow::Result<ProbeReply> {
        // ThreadRng não é Send: sorteia tudo antes do primeiro await.
        let (delay, fail, intent) = {
            let mut rng = rand::thread_rng();
            let delay = if self.max_delay > self.min_delay {
                rng.gen_range(self.min_delay..=self.max_delay)
            } else {
                self.min_delay
            };
            let fail = rng.gen_bool(probability(self.failure_rate));
            let mut intent = pick_intent(message);
            if rng.gen_bool(probability(self.perturb_rate)) {
                let others: Vec<&'static str> = INTENT_KEYWORDS
                    .iter()
                    .map(|(name, _)| *name)
                    .chain(std::iter::once(DEFAULT_INTENT))
                    .filter(|name| *name != intent)
                    .collect();
                intent = others[rng.gen_range(0..others.len())];
            }
            (delay, fail, intent)
        };

        tokio::time::sleep(delay).await;
        if fail {
            anyhow::bail!("simulated backend failure after {}ms", delay.as_millis());
        }
        Ok(ProbeReply {
            intent: Some(intent.to_string()),
            answer: format!("Detected intent: {intent}"),
        })
    }
}

// `gen_bool` entra em pânico fora de 0..=1, e `clamp` preserva NaN.
fn probability(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Para onde os handlers dos probes enviam as requisições.
#[derive(Clone)]
pub enum Backend {
    Webhook(Arc<WebhookClient>),
    Simulated(SimulatedBackend),
}

impl Backend {
    pub async fn call(&self, probe: &Probe) -> anyhow::Result<ProbeReply> {
        match self {
            Backend::Webhook(client) => {
                let req = WebhookRequest::new(probe.sender.as_str(), probe.message.as_str());
                let reply = client
                    .send(&req)
                    .await
                    .with_context(|| format!("POST {}", client.url()))?;
                Ok(reply.into())
            }
            Backend::Simulated(sim) => sim.reply(&probe.message).await,
        }
    }
}

/// Submete frases a uma fila, um probe por frase.
pub struct Harness {
    queue: ProbeQueue,
    backend: Backend,
    senders: SenderIds,
}

impl Harness {
    pub fn new(queue: ProbeQueue, backend: Backend, mode: SenderMode) -> Self {
        Self {
            queue,
            backend,
            senders: SenderIds::new(mode),
        }
    }

    pub fn queue(&self) -> &ProbeQueue {
        &self.queue
    }

    pub fn submit(&mut self, utterance: Utterance) -> JobId {
        let probe = Probe {
            sender: self.senders.next_id(),
            message: utterance.message,
            expected_intent: utterance.expected_intent,
        };
        let backend = self.backend.clone();
        self.queue
            .add(probe, move |ctx| async move { backend.call(&ctx.payload).await })
    }

    pub fn submit_batch(&mut self, input: &str) -> Vec<JobId> {
        let ids: Vec<JobId> = parse_batch(input)
            .into_iter()
            .map(|u| self.submit(u))
            .collect();
        tracing::info!(count = ids.len(), sender_mode = %self.senders.mode(), "batch queued");
        ids
    }

    /// Inicia uma sessão nova: descarta probes na fila, esquece os que estão
    /// rodando e o sender fixo.
    pub fn restart(&mut self) -> ResetSummary {
        self.senders.clear();
        self.queue.reset()
    }
}
