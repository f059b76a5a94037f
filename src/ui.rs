//! Interface de terminal do harness: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner com os contadores da fila e `console` para
//! as cores. O [`TerminalReporter`] é um assinante da fila: cada evento de
//! ciclo de vida atualiza o spinner ou imprime uma linha de resultado.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::harness::{Probe, ProbeReply, Verdict};
use crate::queue::{Completed, Failed, QueueStatus, Started, Submitted, Subscriber};
use crate::stats::StatsMetrics;

/// Indicador visual do andamento da fila no terminal.
///
/// Mostra `active/queued` no spinner e imprime uma linha por requisição
/// concluída: verde para OK, vermelho para NG ou falha, amarelo quando não
/// havia intenção esperada.
pub struct TerminalReporter {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl TerminalReporter {
    /// Inicia o spinner e retorna o reporter.
    pub fn start(max_concurrent: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("waiting for requests (limit {max_concurrent})"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    fn show_status(&self, status: QueueStatus) {
        self.pb.set_message(format!(
            "active {} · queued {}",
            status.active, status.queued
        ));
    }

    /// Finaliza o spinner e imprime o resumo da sessão.
    pub fn finish(&self, metrics: &StatsMetrics) {
        self.pb.finish_and_clear();
        println!();
        println!("{}", self.dim.apply_to("─── Summary ───"));
        println!(
            "  total {}  {} {}  {} {}  {} {}",
            metrics.total,
            self.green.apply_to("OK"),
            metrics.success,
            self.red.apply_to("NG"),
            metrics.failure,
            self.yellow.apply_to("None"),
            metrics.unvalidated
        );
        println!(
            "  response time avg {:.0}ms  min {}ms  max {}ms",
            metrics.avg_response_ms, metrics.min_response_ms, metrics.max_response_ms
        );
        println!("  success rate {:.1}%", metrics.success_rate);
    }
}

impl Subscriber<Probe, ProbeReply> for TerminalReporter {
    fn on_submitted(&self, event: &Submitted<Probe>) {
        self.show_status(event.status);
    }

    fn on_started(&self, event: &Started<Probe>) {
        self.show_status(event.status);
    }

    fn on_completed(&self, event: &Completed<Probe, ProbeReply>) {
        let verdict = event.result.verdict(&event.payload);
        let mark = match verdict {
            Verdict::Ok => self.green.apply_to("✓ OK  "),
            Verdict::Ng => self.red.apply_to("✗ NG  "),
            Verdict::Unvalidated => self.yellow.apply_to("· None"),
        };
        let intent = event.result.intent.as_deref().unwrap_or("-");
        self.pb.println(format!(
            "  {mark} {} → {intent} {}",
            event.payload.message,
            self.dim.apply_to(format!("({}ms)", event.duration_ms))
        ));
        self.show_status(event.status);
    }

    fn on_failed(&self, event: &Failed<Probe>) {
        self.pb.println(format!(
            "  {} {}: {} {}",
            self.red.apply_to("✗ ERR "),
            event.payload.message,
            event.error,
            self.dim.apply_to(format!("({}ms)", event.duration_ms))
        ));
        self.show_status(event.status);
    }
}
