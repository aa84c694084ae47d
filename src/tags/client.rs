use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::error::ConnectionError;
use super::types::{ChangeSink, NodeHandle, Notification, Request, Response};
use super::{SubscriptionHandle, TagService, TagSession};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a tag gateway speaking newline-delimited JSON over TCP.
///
/// Requests (`resolve`, `read`) share one control connection per session;
/// each subscription gets its own streaming connection.
pub struct GatewayClient {
    request_timeout: Duration,
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl GatewayClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl TagService for GatewayClient {
    type Session = GatewaySession;

    async fn connect(&self, endpoint: &str) -> Result<GatewaySession, ConnectionError> {
        let control = Connection::open(endpoint, self.request_timeout).await?;
        Ok(GatewaySession {
            endpoint: endpoint.to_string(),
            control,
            request_timeout: self.request_timeout,
        })
    }
}

pub struct GatewaySession {
    endpoint: String,
    control: Connection,
    request_timeout: Duration,
}

/// Streaming task of one subscription; aborted when dropped.
pub struct GatewaySubscription {
    task: JoinHandle<()>,
}

impl SubscriptionHandle for GatewaySubscription {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for GatewaySubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TagSession for GatewaySession {
    type Subscription = GatewaySubscription;

    async fn resolve_node(&mut self, id: &str) -> Result<NodeHandle, ConnectionError> {
        let response = self
            .control
            .request(&Request::Resolve { node: id }, self.request_timeout)
            .await?;
        expect_ok(response, id)?;
        Ok(NodeHandle::new(id))
    }

    async fn subscribe(
        &mut self,
        nodes: &[NodeHandle],
        interval: Duration,
        sink: ChangeSink,
    ) -> Result<GatewaySubscription, ConnectionError> {
        let mut stream = Connection::open(&self.endpoint, self.request_timeout).await?;
        let request = Request::Subscribe {
            nodes: nodes.iter().map(|n| n.id.as_str()).collect(),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        };
        let response = stream.request(&request, self.request_timeout).await?;
        expect_ok(response, "subscription")?;

        let task = tokio::spawn(async move {
            loop {
                let line = match stream.next_line().await {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "subscription stream ended");
                        break;
                    }
                };
                match serde_json::from_str::<Notification>(&line) {
                    Ok(change) => {
                        if !sink.deliver(&change.node, change.value).await {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, line = %line.trim_end(), "malformed notification"),
                }
            }
        });

        Ok(GatewaySubscription { task })
    }

    async fn unsubscribe(&mut self, subscription: GatewaySubscription) -> Result<(), ConnectionError> {
        drop(subscription);
        Ok(())
    }

    async fn read_value(&mut self, node: &NodeHandle) -> Result<f64, ConnectionError> {
        let response = self
            .control
            .request(&Request::Read { node: &node.id }, self.request_timeout)
            .await?;
        let response = expect_ok(response, &node.id)?;
        response
            .value
            .ok_or_else(|| ConnectionError::Protocol(format!("read of {} returned no value", node.id)))
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.control.writer.shutdown().await {
            tracing::debug!(error = %e, "control connection shutdown failed");
        }
    }
}

fn expect_ok(response: Response, node: &str) -> Result<Response, ConnectionError> {
    if response.ok {
        Ok(response)
    } else {
        Err(ConnectionError::Status {
            node: node.to_string(),
            message: response.error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

// Accepts `tcp://host:port` as well as a bare `host:port`.
fn socket_addr(endpoint: &str) -> &str {
    endpoint
        .strip_prefix("tcp://")
        .unwrap_or(endpoint)
        .trim_end_matches('/')
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl Connection {
    async fn open(endpoint: &str, connect_timeout: Duration) -> Result<Self, ConnectionError> {
        let stream = timeout(connect_timeout, TcpStream::connect(socket_addr(endpoint)))
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))?
            .map_err(|source| ConnectionError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            line: String::new(),
        })
    }

    async fn request(
        &mut self,
        request: &Request<'_>,
        limit: Duration,
    ) -> Result<Response, ConnectionError> {
        let exchange = async {
            let mut payload = serde_json::to_string(request)?;
            payload.push('\n');
            self.writer.write_all(payload.as_bytes()).await?;
            let line = self.next_line().await?;
            Ok::<_, ConnectionError>(serde_json::from_str::<Response>(&line)?)
        };
        timeout(limit, exchange)
            .await
            .map_err(|_| ConnectionError::Timeout(limit))?
    }

    async fn next_line(&mut self) -> Result<String, ConnectionError> {
        self.line.clear();
        let read = self.reader.read_line(&mut self.line).await?;
        if read == 0 {
            return Err(ConnectionError::Closed);
        }
        Ok(self.line.clone())
    }
}
