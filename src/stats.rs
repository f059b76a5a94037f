//! Estatísticas agregadas de acerto/erro e latência de uma sessão do harness.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::harness::{Probe, ProbeReply, Verdict};
use crate::queue::{Completed, Failed, Subscriber};

/// Quantos tempos de resposta recentes são mantidos para gráficos.
const HISTORY_LEN: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct Statistics {
    total: u64,
    ok: u64,
    ng: u64,
    unvalidated: u64,
    total_ms: i64,
    min_ms: Option<i64>,
    max_ms: i64,
    history: VecDeque<i64>,
}

/// Visão somente leitura de [`Statistics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsMetrics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub unvalidated: u64,
    pub avg_response_ms: f64,
    pub min_response_ms: i64,
    pub max_response_ms: i64,
    /// Percentual de OK entre as requisições validadas.
    pub success_rate: f64,
    pub history: Vec<i64>,
}

impl Statistics {
    pub fn record(&mut self, verdict: Verdict, duration_ms: i64) {
        self.total += 1;
        match verdict {
            Verdict::Ok => self.ok += 1,
            Verdict::Ng => self.ng += 1,
            Verdict::Unvalidated => self.unvalidated += 1,
        }

        self.total_ms += duration_ms;
        self.min_ms = Some(self.min_ms.map_or(duration_ms, |m| m.min(duration_ms)));
        self.max_ms = self.max_ms.max(duration_ms);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(duration_ms);
    }

    pub fn metrics(&self) -> StatsMetrics {
        let avg_response_ms = if self.total == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.total as f64
        };
        let validated = self.ok + self.ng;
        let success_rate = if validated == 0 {
            0.0
        } else {
            self.ok as f64 / validated as f64 * 100.0
        };

        StatsMetrics {
            total: self.total,
            success: self.ok,
            failure: self.ng,
            unvalidated: self.unvalidated,
            avg_response_ms,
            min_response_ms: self.min_ms.unwrap_or_default(),
            max_response_ms: self.max_ms,
            success_rate,
            history: self.history.iter().copied().collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Assinante da fila que avalia cada probe finalizado.
///
/// Requisições que falharam contam como NG.
#[derive(Debug, Default)]
pub struct HarnessStats {
    inner: Mutex<Statistics>,
}

impl HarnessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> StatsMetrics {
        self.lock().metrics()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Statistics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Subscriber<Probe, ProbeReply> for HarnessStats {
    fn on_completed(&self, event: &Completed<Probe, ProbeReply>) {
        let verdict = event.result.verdict(&event.payload);
        self.lock().record(verdict, event.duration_ms);
    }

    fn on_failed(&self, event: &Failed<Probe>) {
        self.lock().record(Verdict::Ng, event.duration_ms);
    }
}
