//! Tipos trocados com o serviço de tags e encaminhados ao despachante.
//!
//! [`TagRoles`] sabe qual nó é o passo, qual é o gate e qual é o produto;
//! [`ChangeSink`] usa esse mapa para transformar cada notificação crua
//! `(nó, valor)` em um [`TagEvent`] tipado no canal do despachante.
//! As structs `Request`/`Response`/`Notification` são as mensagens JSON
//! (uma por linha) do gateway de tags.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Nó de tag resolvido e pronto para assinatura ou leitura.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    /// Identificador do nó no servidor (ex.: `ns=2;s=FILTRACAO.PASSO`).
    pub id: String,
}

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Evento já roteado por identidade de tag, consumido pelo despachante.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagEvent {
    /// Novo valor da tag de passo.
    Step(f64),
    /// Novo valor da tag de gate.
    Gate(f64),
    /// Novo valor da tag de produto.
    Product(f64),
    /// A assinatura foi refeita; o próximo valor de cada tag é apenas linha de base.
    Reset,
}

/// Papel de cada tag observada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRoles {
    pub step: String,
    pub gate: Option<String>,
    pub product: Option<String>,
}

impl TagRoles {
    /// Identificadores de todas as tags a assinar, passo primeiro.
    pub fn watched(&self) -> Vec<&str> {
        let mut ids = vec![self.step.as_str()];
        ids.extend(self.gate.as_deref());
        ids.extend(self.product.as_deref());
        ids
    }

    /// Converte uma notificação crua no evento correspondente; `None` para nós desconhecidos.
    pub fn route(&self, node: &str, value: f64) -> Option<TagEvent> {
        if node == self.step {
            Some(TagEvent::Step(value))
        } else if self.gate.as_deref() == Some(node) {
            Some(TagEvent::Gate(value))
        } else if self.product.as_deref() == Some(node) {
            Some(TagEvent::Product(value))
        } else {
            None
        }
    }
}

/// Destino das notificações de mudança entregues pela assinatura.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    roles: TagRoles,
    tx: mpsc::Sender<TagEvent>,
}

impl ChangeSink {
    pub fn new(roles: TagRoles, tx: mpsc::Sender<TagEvent>) -> Self {
        Self { roles, tx }
    }

    /// Roteia e enfileira uma mudança. Retorna `false` quando o despachante já encerrou.
    pub async fn deliver(&self, node: &str, value: f64) -> bool {
        match self.roles.route(node, value) {
            Some(event) => self.tx.send(event).await.is_ok(),
            None => {
                tracing::debug!(node, value, "ignoring change for unwatched node");
                true
            }
        }
    }

    /// Avisa o despachante que uma nova assinatura vai começar.
    pub async fn reset(&self) -> bool {
        self.tx.send(TagEvent::Reset).await.is_ok()
    }

    /// `true` quando o despachante não recebe mais eventos.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Requisição enviada ao gateway de tags.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Resolve { node: &'a str },
    Read { node: &'a str },
    Subscribe { nodes: Vec<&'a str>, interval_ms: u64 },
}

/// Resposta a uma [`Request`].
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Mudança de valor enviada pelo gateway no canal de assinatura.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub node: String,
    pub value: f64,
}
