pub mod client;
pub mod error;
pub mod types;

use std::future::Future;
use std::time::Duration;

pub use client::GatewayClient;
pub use error::ConnectionError;
pub use types::{ChangeSink, NodeHandle, TagEvent, TagRoles};

/// Something that can open sessions against a tag server.
pub trait TagService: Send + Sync {
    type Session: TagSession;

    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Session, ConnectionError>> + Send;
}

/// A live change subscription.
pub trait SubscriptionHandle: Send {
    /// `false` once the server stopped delivering changes on this subscription.
    fn is_active(&self) -> bool;
}

/// An open session: node resolution, reads and change subscriptions.
pub trait TagSession: Send {
    type Subscription: SubscriptionHandle;

    fn resolve_node(
        &mut self,
        id: &str,
    ) -> impl Future<Output = Result<NodeHandle, ConnectionError>> + Send;

    /// Subscribe to changes of `nodes`; every change is handed to `sink`.
    fn subscribe(
        &mut self,
        nodes: &[NodeHandle],
        interval: Duration,
        sink: ChangeSink,
    ) -> impl Future<Output = Result<Self::Subscription, ConnectionError>> + Send;

    fn unsubscribe(
        &mut self,
        subscription: Self::Subscription,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn read_value(
        &mut self,
        node: &NodeHandle,
    ) -> impl Future<Output = Result<f64, ConnectionError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
