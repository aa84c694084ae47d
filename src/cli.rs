//! Interface de linha de comando do stepcam baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, policies)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// stepcam: captura imagens quando o passo do CLP muda.
#[derive(Debug, Parser)]
#[command(name = "stepcam", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo TOML de configuração (padrão: `stepcam.toml`, se existir).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Observa a tag de passo e dispara capturas até receber Ctrl-C.
    Run,

    /// Valida e mostra a tabela de políticas configurada.
    Policies,
}
