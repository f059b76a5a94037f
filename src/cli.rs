//! Interface de linha de comando do rasa-dispatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, demo) e flags
//! globais (--max-concurrent, --config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use rasa_dispatch::harness::SenderMode;

/// rasa-dispatch: dispara lotes de frases contra um backend conversacional
/// com concorrência limitada.
#[derive(Debug, Parser)]
#[command(name = "rasa-dispatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número máximo de requisições simultâneas.
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Caminho alternativo para o arquivo de configuração.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Modo de sender aceito pela CLI, mapeado para [`SenderMode`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SenderArg {
    /// Um sender novo por frase.
    Random,
    /// O mesmo sender para a sessão inteira.
    Fixed,
}

impl From<SenderArg> for SenderMode {
    fn from(arg: SenderArg) -> Self {
        match arg {
            SenderArg::Random => SenderMode::Random,
            SenderArg::Fixed => SenderMode::Fixed,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Envia cada linha do arquivo ao webhook.
    Run {
        /// Arquivo com uma frase por linha, opcionalmente com `--intencao`.
        file: PathBuf,

        /// URL do webhook (sobrescreve config e ambiente).
        #[arg(long)]
        url: Option<String>,

        /// Como gerar os ids de sender.
        #[arg(long, value_enum)]
        sender_mode: Option<SenderArg>,
    },

    /// Executa um lote de exemplo contra o backend simulado.
    Demo {
        /// Quantas frases enviar.
        #[arg(long, default_value_t = 20)]
        jobs: usize,

        /// Probabilidade de uma requisição simulada falhar (0.0 a 1.0).
        #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
        failure_rate: f64,
    },
}

/// Aceita apenas probabilidades finitas em `0.0..=1.0`.
fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("`{raw}` must be between 0.0 and 1.0"));
    }
    Ok(value)
}
