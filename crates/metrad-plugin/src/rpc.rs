use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use metrad_policy::ConfigPolicy;
use metrad_types::status_code::RpcCode;
use metrad_types::{
    make_error_msg, ConfigDataNode, Metric, MetricType, Result, Status,
};
use metrad_wire::{Packet, WireDecode, WireEncode, PACKET_HEADER_SIZE, PACKET_MAX_SIZE};

/// Default dial timeout for a freshly handshaken plugin.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

// Stable RPC method names of the plugin contract.
pub const METHOD_PING: &str = "SessionState.Ping";
pub const METHOD_KILL: &str = "SessionState.Kill";
pub const METHOD_GET_METRIC_TYPES: &str = "Collector.GetMetricTypes";
pub const METHOD_COLLECT_METRICS: &str = "Collector.CollectMetrics";
pub const METHOD_COLLECTOR_POLICY: &str = "Collector.GetConfigPolicy";
pub const METHOD_PROCESS: &str = "Processor.Process";
pub const METHOD_PROCESSOR_POLICY: &str = "Processor.GetConfigPolicy";
pub const METHOD_PUBLISH: &str = "Publisher.Publish";
pub const METHOD_PUBLISHER_POLICY: &str = "Publisher.GetConfigPolicy";

/// A structured error a plugin returns in place of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFault {
    pub code: u16,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl WireEncode for RpcFault {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.code.encode(buf);
        self.message.encode(buf);
        self.fields.encode(buf);
    }
}

impl WireDecode for RpcFault {
    fn decode(buf: &[u8], offset: &mut usize) -> std::result::Result<Self, metrad_wire::WireError> {
        Ok(Self {
            code: u16::decode(buf, offset)?,
            message: String::decode(buf, offset)?,
            fields: BTreeMap::decode(buf, offset)?,
        })
    }
}

/// One framed request: a call sequence number, a stable method name, and an
/// opaque parameter blob.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub seq: u64,
    pub method: String,
    pub params: Bytes,
}

impl WireEncode for RpcRequest {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.seq.encode(buf);
        self.method.encode(buf);
        self.params.encode(buf);
    }
}

impl WireDecode for RpcRequest {
    fn decode(buf: &[u8], offset: &mut usize) -> std::result::Result<Self, metrad_wire::WireError> {
        Ok(Self {
            seq: u64::decode(buf, offset)?,
            method: String::decode(buf, offset)?,
            params: Bytes::decode(buf, offset)?,
        })
    }
}

/// One framed reply: the request's sequence number plus a result blob or a
/// fault. The sequence number lets a caller discard the late reply of an
/// abandoned call instead of mistaking it for the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub seq: u64,
    pub result: Bytes,
    pub error: Option<RpcFault>,
}

impl RpcReply {
    pub fn ok(seq: u64, result: Bytes) -> Self {
        Self {
            seq,
            result,
            error: None,
        }
    }

    pub fn fault(seq: u64, code: u16, message: impl Into<String>) -> Self {
        Self {
            seq,
            result: Bytes::new(),
            error: Some(RpcFault {
                code,
                message: message.into(),
                fields: BTreeMap::new(),
            }),
        }
    }
}

impl WireEncode for RpcReply {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.seq.encode(buf);
        self.result.encode(buf);
        self.error.encode(buf);
    }
}

impl WireDecode for RpcReply {
    fn decode(buf: &[u8], offset: &mut usize) -> std::result::Result<Self, metrad_wire::WireError> {
        Ok(Self {
            seq: u64::decode(buf, offset)?,
            result: Bytes::decode(buf, offset)?,
            error: Option::decode(buf, offset)?,
        })
    }
}

fn to_json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))
}

fn from_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))
}

/// RPC client for one live plugin instance.
///
/// Calls are serialized over a single connection; every call carries a
/// deadline and an overrun abandons the call rather than cancelling the
/// plugin-side work.
#[derive(Debug)]
pub struct PluginRpcClient {
    stream: Mutex<TcpStream>,
    call_timeout: Duration,
    address: String,
    next_seq: std::sync::atomic::AtomicU64,
}

impl PluginRpcClient {
    /// Dial the address a plugin reported in its handshake.
    pub async fn dial(address: &str, dial_timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                Status::with_message(RpcCode::TIMEOUT, format!("dial {}", address))
            })?
            .map_err(|e| {
                Status::with_message(RpcCode::CONNECT_FAILED, format!("dial {}: {}", address, e))
            })?;
        Ok(Self {
            stream: Mutex::new(stream),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            address: address.to_string(),
            next_seq: std::sync::atomic::AtomicU64::new(1),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call_with_deadline(
        &self,
        method: &str,
        params: Bytes,
        deadline: Duration,
    ) -> Result<Bytes> {
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let request = RpcRequest {
            seq,
            method: method.to_string(),
            params,
        };
        let frame = Packet::seal(&request)
            .map_err(|e| Status::with_message(RpcCode::SEND_FAILED, e.to_string()))?;

        let mut stream = self.stream.lock().await;
        let reply = tokio::time::timeout(deadline, async {
            stream.write_all(&frame).await.map_err(|e| {
                Status::with_message(RpcCode::SEND_FAILED, format!("{}: {}", method, e))
            })?;

            loop {
                let mut header = [0u8; PACKET_HEADER_SIZE];
                stream.read_exact(&mut header).await.map_err(|e| {
                    Status::with_message(RpcCode::SOCKET_CLOSED, format!("{}: {}", method, e))
                })?;
                let size = Packet::payload_size(&header);
                if size > PACKET_MAX_SIZE {
                    return make_error_msg(
                        RpcCode::BAD_RESPONSE,
                        format!("{}: oversized reply ({} bytes)", method, size),
                    );
                }
                let mut buf = vec![0u8; PACKET_HEADER_SIZE + size];
                buf[..PACKET_HEADER_SIZE].copy_from_slice(&header);
                stream
                    .read_exact(&mut buf[PACKET_HEADER_SIZE..])
                    .await
                    .map_err(|e| {
                        Status::with_message(RpcCode::SOCKET_CLOSED, format!("{}: {}", method, e))
                    })?;

                let reply: RpcReply = Packet::open(&buf)
                    .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))?;
                // A smaller sequence number is the late reply of an
                // abandoned call.
                if reply.seq < seq {
                    debug!(method, stale = reply.seq, "discarding stale reply");
                    continue;
                }
                if reply.seq != seq {
                    return make_error_msg(
                        RpcCode::BAD_RESPONSE,
                        format!("{}: reply seq {} for call {}", method, reply.seq, seq),
                    );
                }
                return Ok(reply);
            }
        })
        .await
        .map_err(|_| Status::with_message(RpcCode::TIMEOUT, method.to_string()))??;

        match reply.error {
            Some(fault) => {
                debug!(method, code = fault.code, "plugin rpc fault");
                Err(Status::with_message(RpcCode::FAULT, fault.message))
            }
            None => Ok(reply.result),
        }
    }

    async fn call(&self, method: &str, params: Bytes) -> Result<Bytes> {
        self.call_with_deadline(method, params, self.call_timeout)
            .await
    }

    /// `SessionState.Ping` with an explicit deadline (the health monitor uses
    /// a tighter one than ordinary calls).
    pub async fn ping_within(&self, deadline: Duration) -> Result<bool> {
        let result = self
            .call_with_deadline(METHOD_PING, Bytes::new(), deadline)
            .await?;
        let mut offset = 0;
        bool::decode(&result, &mut offset)
            .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))
    }

    pub async fn ping(&self) -> Result<bool> {
        self.ping_within(self.call_timeout).await
    }

    /// `SessionState.Kill`.
    pub async fn kill(&self, reason: &str) -> Result<bool> {
        let mut params = Vec::new();
        reason.to_string().encode(&mut params);
        let result = self.call(METHOD_KILL, Bytes::from(params)).await?;
        let mut offset = 0;
        bool::decode(&result, &mut offset)
            .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))
    }

    /// `Collector.GetMetricTypes`.
    pub async fn get_metric_types(&self, config: &ConfigDataNode) -> Result<Vec<MetricType>> {
        let result = self
            .call(METHOD_GET_METRIC_TYPES, to_json_bytes(config)?)
            .await?;
        from_json_bytes(&result)
    }

    /// `Collector.CollectMetrics`. The deadline comes from the collect job
    /// driving the call.
    pub async fn collect_metrics(
        &self,
        types: &[MetricType],
        deadline: Duration,
    ) -> Result<Vec<Metric>> {
        let result = self
            .call_with_deadline(METHOD_COLLECT_METRICS, to_json_bytes(&types)?, deadline)
            .await?;
        from_json_bytes(&result)
    }

    /// `Collector|Processor|Publisher.GetConfigPolicy`.
    pub async fn get_config_policy(&self, method: &str) -> Result<ConfigPolicy> {
        let result = self.call(method, Bytes::new()).await?;
        from_json_bytes(&result)
    }

    /// `Processor.Process`: hand a payload to a processor, receive the
    /// transformed payload and its content type.
    pub async fn process(
        &self,
        content_type: &str,
        content: &[u8],
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<(String, Vec<u8>)> {
        let mut params = Vec::new();
        content_type.to_string().encode(&mut params);
        Bytes::copy_from_slice(content).encode(&mut params);
        to_json_bytes(config)?.encode(&mut params);

        let result = self
            .call_with_deadline(METHOD_PROCESS, Bytes::from(params), deadline)
            .await?;
        let mut offset = 0;
        let out_type = String::decode(&result, &mut offset)
            .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))?;
        let out_body = Bytes::decode(&result, &mut offset)
            .map_err(|e| Status::with_message(RpcCode::BAD_RESPONSE, e.to_string()))?;
        Ok((out_type, out_body.to_vec()))
    }

    /// `Publisher.Publish`.
    pub async fn publish(
        &self,
        content_type: &str,
        content: &[u8],
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<()> {
        let mut params = Vec::new();
        content_type.to_string().encode(&mut params);
        Bytes::copy_from_slice(content).encode(&mut params);
        to_json_bytes(config)?.encode(&mut params);

        self.call_with_deadline(METHOD_PUBLISH, Bytes::from(params), deadline)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! A minimal in-process plugin endpoint used by the client tests.

    use super::*;
    use tokio::net::TcpListener;

    /// Serve `handler` on an ephemeral port; returns the listen address.
    pub async fn spawn<F>(handler: F) -> String
    where
        F: Fn(RpcRequest) -> RpcReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut header = [0u8; PACKET_HEADER_SIZE];
                loop {
                    if socket.read_exact(&mut header).await.is_err() {
                        break;
                    }
                    let size = Packet::payload_size(&header);
                    let mut buf = vec![0u8; PACKET_HEADER_SIZE + size];
                    buf[..PACKET_HEADER_SIZE].copy_from_slice(&header);
                    if socket.read_exact(&mut buf[PACKET_HEADER_SIZE..]).await.is_err() {
                        break;
                    }
                    let request: RpcRequest = Packet::open(&buf).unwrap();
                    let seq = request.seq;
                    let mut reply = handler(request);
                    reply.seq = seq;
                    let frame = Packet::seal(&reply).unwrap();
                    if socket.write_all(&frame).await.is_err() {
                        break;
                    }
                }
            }
        });
        addr
    }

    /// A handler that answers Ping with `true` and faults everything else.
    pub fn ping_only(request: RpcRequest) -> RpcReply {
        if request.method == METHOD_PING {
            let mut body = Vec::new();
            true.encode(&mut body);
            RpcReply::ok(request.seq, Bytes::from(body))
        } else {
            RpcReply::fault(request.seq, RpcCode::INVALID_METHOD, request.method)
        }
    }
}
