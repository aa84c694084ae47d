//! Erros de conectividade com o serviço de tags.
//!
//! Todas as falhas de rede, de protocolo ou de tempo limite viram
//! [`ConnectionError`]. O supervisor trata qualquer variante da mesma forma:
//! fecha a sessão, espera o backoff e reconecta.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com o serviço de tags.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Não foi possível abrir a conexão com o endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// O servidor respondeu com um status de erro (ex.: nó desconhecido).
    #[error("server returned an error for {node}: {message}")]
    Status { node: String, message: String },

    /// A resposta não seguiu o protocolo esperado.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Nenhuma resposta dentro do tempo limite.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// O servidor fechou a conexão.
    #[error("connection closed by peer")]
    Closed,

    /// A conexão de assinatura caiu enquanto a sessão de controle seguia ativa.
    #[error("subscription stream ended")]
    SubscriptionEnded,

    /// Falha de E/S na conexão já estabelecida.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Linha recebida não é JSON válido.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
