//!
//! Per-call request context: identity, arrival time, client address, a
//! string-keyed value bag and the metric lifecycle. The transport wrapper
//! that created the context guarantees exactly-once [`RequestContext::
//! end_request`] on the sole exit path of a dispatch.
//!

use crate::imports::*;
use crate::metrics::Metrics;
use crate::server::session::{RawNotifier, RpcNotifier};

/// Notifier capability bound into contexts created by WebSocket sessions.
/// A session is either JSON-RPC or raw, never both.
#[derive(Clone)]
pub enum SessionNotifier {
    Rpc(RpcNotifier),
    Raw(RawNotifier),
}

struct Inner {
    name: String,
    id: Value,
    received_at: Instant,
    client_addr: Option<SocketAddr>,
    kv: Mutex<AHashMap<String, Value>>,
    notifier: Option<SessionNotifier>,
    metrics: Arc<Metrics>,
    ended: AtomicBool,
}

/// Capability handed to every handler invocation. Cheap to clone; clones
/// share the value bag and the end-request latch.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

impl RequestContext {
    pub(crate) fn new(
        metrics: Arc<Metrics>,
        name: impl Into<String>,
        id: Value,
        body_size: usize,
        client_addr: Option<SocketAddr>,
        notifier: Option<SessionNotifier>,
    ) -> RequestContext {
        metrics.request_started(body_size);
        let ctx = RequestContext {
            inner: Arc::new(Inner {
                name: name.into(),
                id,
                received_at: Instant::now(),
                client_addr,
                kv: Mutex::new(AHashMap::new()),
                notifier,
                metrics,
                ended: AtomicBool::new(false),
            }),
        };
        debug!(
            "request start name[{}] id[{}] size[{body_size}] client[{}]",
            ctx.name(),
            ctx.inner.id,
            ctx.client_addr_string(),
        );
        ctx
    }

    /// The request's opaque identifier (trace id for HTTP, generated per
    /// frame for WebSocket sessions).
    pub fn id(&self) -> &Value {
        &self.inner.id
    }

    /// Method name or path this context was created for.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.inner.client_addr
    }

    fn client_addr_string(&self) -> String {
        self.inner
            .client_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Log a message annotated with the context identity and elapsed time.
    pub fn log(&self, message: impl AsRef<str>) {
        info!(
            "{} name[{}] id[{}] cost[{:?}]",
            message.as_ref(),
            self.inner.name,
            self.inner.id,
            self.inner.received_at.elapsed(),
        );
    }

    pub fn with_value(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut kv) = self.inner.kv.lock() {
            kv.insert(key.into(), value);
        }
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner
            .kv
            .lock()
            .ok()
            .and_then(|kv| kv.get(key).cloned())
    }

    /// The JSON-RPC notifier, present when this call arrived over a
    /// JSON-RPC WebSocket session.
    pub fn rpc_notifier(&self) -> Option<RpcNotifier> {
        match &self.inner.notifier {
            Some(SessionNotifier::Rpc(notifier)) => Some(notifier.clone()),
            _ => None,
        }
    }

    /// The raw-frame notifier, present when this call arrived over a raw
    /// WebSocket session.
    pub fn raw_notifier(&self) -> Option<RawNotifier> {
        match &self.inner.notifier {
            Some(SessionNotifier::Raw(notifier)) => Some(notifier.clone()),
            _ => None,
        }
    }

    /// Finish the request and flush metrics. Idempotent: only the first
    /// call updates the counters.
    pub fn end_request(&self, code: i64) {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let elapsed = self.inner.received_at.elapsed();
        debug!(
            "request end name[{}] id[{}] code[{code}] cost[{elapsed:?}]",
            self.inner.name, self.inner.id,
        );
        self.inner
            .metrics
            .request_finished(&self.inner.name, code, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> RequestContext {
        RequestContext::new(
            Metrics::new("t"),
            "jsonRpc2",
            Value::String("id-1".into()),
            0,
            None,
            None,
        )
    }

    #[test]
    fn value_bag_round_trip() {
        let ctx = test_ctx();
        ctx.with_value("k", Value::from(42));
        assert_eq!(ctx.value("k"), Some(Value::from(42)));
        assert_eq!(ctx.value("missing"), None);
    }

    #[test]
    fn end_request_is_exactly_once() {
        let metrics = Metrics::new("t");
        let ctx = RequestContext::new(
            metrics.clone(),
            "m",
            Value::Null,
            0,
            None,
            None,
        );
        ctx.end_request(0);
        ctx.end_request(0);
        ctx.end_request(-32000);
        let text = metrics.render();
        assert!(text.contains(r#"request_total{cluster="t",method="m",status_code="0"} 1"#));
        assert!(!text.contains(r#"status_code="-32000""#));
    }
}
