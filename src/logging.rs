//! Inicialização de logs com `tracing`.
//!
//! Eventos relevantes para o operador (conexão, desconexão, imagem salva,
//! falha de captura) usam a macro [`important!`], que registra em nível INFO
//! no target dedicado [`IMPORTANT`]. O filtro padrão mostra apenas avisos e
//! esse target; `--verbose` ou `RUST_LOG` liberam o restante.

use tracing_subscriber::EnvFilter;

/// Target dos eventos relevantes para o operador.
pub const IMPORTANT: &str = "important";

const DEFAULT_LOG_FILTER: &str = "warn,important=info";
const VERBOSE_LOG_FILTER: &str = "debug,important=info";

/// Registra um evento relevante para o operador.
#[macro_export]
macro_rules! important {
    ($($arg:tt)+) => {
        ::tracing::info!(target: $crate::logging::IMPORTANT, $($arg)+)
    };
}

/// Escolhe o filtro: `RUST_LOG` tem precedência, depois `--verbose`.
fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}

/// Instala o subscriber global escrevendo em stderr.
pub fn init_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}
