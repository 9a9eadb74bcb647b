//! Framed transport over any async byte stream.
//!
//! One read loop reassembles frames with [`FrameBuffer`] and routes them
//! by request id; one writer task serializes outbound frames. A request
//! goes out as a `HEADER` frame, a body frame, then attachment frames,
//! with `END` on the last one. Responses come back the same way minus the
//! header frame.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use super::{CancelHandle, ResponseSink, SerializedRequest, Transport};
use crate::codec::MsgPackCodec;
use crate::error::{RpcError, Result};
use crate::lock;
use crate::protocol::{flags, Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::rpc::Response;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Size of each socket read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for [`FramedTransport`].
#[derive(Debug, Clone)]
pub struct FramedConfig {
    pub writer: WriterConfig,
    /// Frames announcing a larger payload kill the connection.
    pub max_payload_size: u32,
    /// Reported as the transport name.
    pub name: String,
}

impl Default for FramedConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            name: "framed".to_string(),
        }
    }
}

impl FramedConfig {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }
}

/// Error payload of a `RESPONSE|ERROR` frame.
#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i32,
    message: String,
}

/// Response being assembled from its frames.
struct Inflight {
    sink: ResponseSink,
    body: Option<Bytes>,
    attachments: Vec<Bytes>,
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    calls: HashMap<u64, Inflight>,
}

/// Outstanding requests by id.
#[derive(Default)]
struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    fn remove(&self, id: u64) -> Option<Inflight> {
        lock(&self.state).calls.remove(&id)
    }

    /// Close the registry and fail everything still outstanding.
    fn fail_all(&self, cause: Option<&RpcError>) {
        let drained: Vec<Inflight> = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(outstanding = drained.len(), "failing outstanding requests");
        }
        for call in drained {
            call.sink.deliver(Err(replicate(cause)));
        }
    }

    fn dispatch_frame(&self, frame: Frame) {
        if !frame.is_response() {
            tracing::warn!(
                request_id = frame.request_id(),
                flags = frame.header.flags,
                "unexpected non-response frame"
            );
            return;
        }
        let id = frame.request_id();
        let end = frame.is_end();

        let settled = {
            let mut state = lock(&self.state);
            let Some(call) = state.calls.get_mut(&id) else {
                tracing::warn!(request_id = id, "response for unknown request");
                return;
            };

            let failure = if frame.is_error() {
                Some(decode_remote(&frame.payload))
            } else if frame.is_attachment() {
                if call.body.is_none() {
                    Some(RpcError::Protocol(
                        "attachment received before response body".to_string(),
                    ))
                } else {
                    call.attachments.push(frame.payload);
                    None
                }
            } else if call.body.is_some() {
                Some(RpcError::Protocol("duplicate response body".to_string()))
            } else {
                call.body = Some(frame.payload);
                None
            };

            match failure {
                Some(error) => state.calls.remove(&id).map(|call| (call, Some(error))),
                None if end => state.calls.remove(&id).map(|call| (call, None)),
                None => None,
            }
        };

        if let Some((call, failure)) = settled {
            let result = match failure {
                Some(error) => Err(error),
                None => Ok(Response::new(
                    call.body.unwrap_or_default(),
                    call.attachments,
                )),
            };
            call.sink.deliver(result);
        }
    }
}

/// Stock [`Transport`] over a byte stream.
pub struct FramedTransport {
    name: String,
    writer: WriterHandle,
    registry: Arc<Registry>,
    max_payload_size: u32,
    reader_task: JoinHandle<()>,
    _writer_monitor: JoinHandle<()>,
}

impl FramedTransport {
    /// Split `stream` and start the read loop and writer task on the
    /// current runtime.
    pub fn spawn<S>(stream: S, config: FramedConfig) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer);

        let registry = Arc::new(Registry::default());
        let reader_registry = registry.clone();
        let max_payload_size = config.max_payload_size;
        let name = config.name;
        let reader_name = name.clone();

        let reader_task = tokio::spawn(async move {
            let result = read_loop(read_half, &reader_registry, max_payload_size).await;
            match &result {
                Ok(()) => tracing::debug!(transport = %reader_name, "connection closed by peer"),
                Err(e) => tracing::error!(transport = %reader_name, "read loop error: {}", e),
            }
            reader_registry.fail_all(result.as_ref().err());
        });

        // a dead writer ends the connection just like a dead reader
        let reader_abort = reader_task.abort_handle();
        let monitor_registry = registry.clone();
        let monitor_name = name.clone();
        let writer_monitor = tokio::spawn(async move {
            let cause = match writer_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => Some(e),
                Err(e) => {
                    tracing::error!(transport = %monitor_name, "writer task died: {}", e);
                    None
                }
            };
            reader_abort.abort();
            monitor_registry.fail_all(cause.as_ref());
        });

        Arc::new(Self {
            name,
            writer,
            registry,
            max_payload_size,
            reader_task,
            _writer_monitor: writer_monitor,
        })
    }

    /// Requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        lock(&self.registry.state).calls.len()
    }

    pub fn is_connected(&self) -> bool {
        !lock(&self.registry.state).closed
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }
}

impl FramedTransport {
    /// Every frame payload must fit the header's length field and the
    /// peer's limit, or the stream desynchronizes.
    fn check_payload_sizes(&self, request: &SerializedRequest) -> Result<()> {
        let limit = self.max_payload_size as usize;
        let parts = [("header", &request.header), ("body", &request.body)]
            .into_iter()
            .chain(request.attachments.iter().map(|a| ("attachment", a)));
        for (part, payload) in parts {
            if payload.len() > limit {
                return Err(RpcError::Protocol(format!(
                    "request {} {} is {} bytes, limit is {}",
                    request.id,
                    part,
                    payload.len(),
                    limit
                )));
            }
        }
        Ok(())
    }
}

impl Transport for FramedTransport {
    fn submit(&self, request: SerializedRequest, sink: ResponseSink) -> Result<CancelHandle> {
        let id = request.id.0;
        self.check_payload_sizes(&request)?;
        let frames = request_frames(request);

        {
            let mut state = lock(&self.registry.state);
            if state.closed {
                return Err(RpcError::ConnectionClosed);
            }
            state.calls.insert(
                id,
                Inflight {
                    sink,
                    body: None,
                    attachments: Vec::new(),
                },
            );
        }

        if let Err(e) = self.writer.try_send(frames) {
            match self.registry.remove(id) {
                Some(call) => {
                    // not submitted yet, so dropping the sink is silent
                    drop(call);
                    return Err(e);
                }
                // the read loop already failed it
                None => return Ok(CancelHandle::noop()),
            }
        }

        let registry = Arc::downgrade(&self.registry);
        let writer = self.writer.clone();
        Ok(CancelHandle::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove(id).is_none() {
                return;
            }
            tracing::debug!(request_id = id, "sending cancel");
            let cancel = OutboundFrame::new(flags::IS_CANCEL, id, Bytes::new());
            if let Err(e) = writer.try_send(vec![cancel]) {
                tracing::warn!(request_id = id, "cancel frame not sent: {}", e);
            }
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.registry.fail_all(None);
    }
}

async fn read_loop<R>(mut reader: R, registry: &Registry, max_payload_size: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(RpcError::Io(e)),
        };

        for frame in frame_buffer.push(&buf[..n])? {
            registry.dispatch_frame(frame);
        }
    }
}

fn request_frames(request: SerializedRequest) -> Vec<OutboundFrame> {
    let mut parts = Vec::with_capacity(2 + request.attachments.len());
    parts.push((flags::IS_HEADER, request.header));
    parts.push((0, request.body));
    parts.extend(
        request
            .attachments
            .into_iter()
            .map(|attachment| (flags::IS_ATTACHMENT, attachment)),
    );
    if let Some(last) = parts.last_mut() {
        last.0 |= flags::END;
    }

    parts
        .into_iter()
        .map(|(frame_flags, payload)| OutboundFrame::new(frame_flags, request.id.0, payload))
        .collect()
}

fn decode_remote(payload: &[u8]) -> RpcError {
    match MsgPackCodec::decode::<RemoteError>(payload) {
        Ok(remote) => RpcError::Remote {
            code: remote.code,
            message: remote.message,
        },
        Err(e) => RpcError::Protocol(format!("undecodable error payload: {}", e)),
    }
}

/// Per-request copy of the error that ended the connection.
fn replicate(cause: Option<&RpcError>) -> RpcError {
    match cause {
        None => RpcError::ConnectionClosed,
        Some(RpcError::Io(e)) => RpcError::Io(io::Error::new(e.kind(), e.to_string())),
        Some(other) => RpcError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, Header};
    use crate::rpc::{Client, Request, RequestId, RpcClientExt};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Stream that never yields data and refuses every write.
    struct BrokenWrites;

    impl AsyncRead for BrokenWrites {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenWrites {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn serialized(id: u64, attachments: Vec<Bytes>) -> SerializedRequest {
        SerializedRequest {
            id: RequestId(id),
            header: Bytes::from_static(b"hdr"),
            body: Bytes::from_static(b"body"),
            attachments,
            timeout: None,
        }
    }

    #[test]
    fn test_request_frames_layout() {
        let frames = request_frames(serialized(
            9,
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        ));
        let decoded: Vec<Header> = frames
            .iter()
            .map(|f| Header::decode(&f.header).unwrap())
            .collect();

        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].flags, flags::IS_HEADER);
        assert_eq!(decoded[1].flags, 0);
        assert_eq!(decoded[2].flags, flags::IS_ATTACHMENT);
        assert_eq!(decoded[3].flags, flags::IS_ATTACHMENT | flags::END);
        assert!(decoded.iter().all(|h| h.request_id == 9));
    }

    #[test]
    fn test_request_frames_without_attachments() {
        let frames = request_frames(serialized(1, vec![]));
        let last = Header::decode(&frames[1].header).unwrap();
        assert_eq!(last.flags, flags::END);
    }

    #[test]
    fn test_decode_remote_error() {
        #[derive(serde::Serialize)]
        struct Payload<'a> {
            code: i32,
            message: &'a str,
        }
        let payload = MsgPackCodec::encode(&Payload {
            code: 500,
            message: "no such table",
        })
        .unwrap();

        match decode_remote(&payload) {
            RpcError::Remote { code, message } => {
                assert_eq!(code, 500);
                assert_eq!(message, "no such table");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(decode_remote(b"\xc1"), RpcError::Protocol(_)));
    }

    #[test]
    fn test_replicate_keeps_io_kind() {
        let cause = RpcError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match replicate(Some(&cause)) {
            RpcError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(replicate(None), RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (local, remote) = tokio::io::duplex(1024);
        let transport = FramedTransport::spawn(local, FramedConfig::default().name("test"));
        assert!(transport.is_connected());
        assert_eq!(transport.name(), "test");

        drop(remote);
        for _ in 0..100 {
            if !transport.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_frame_kills_connection() {
        use tokio::io::AsyncWriteExt;

        let (local, mut remote) = tokio::io::duplex(1024);
        let transport = FramedTransport::spawn(local, FramedConfig::default().max_payload_size(4));

        let frame = build_frame(flags::IS_RESPONSE | flags::END, 1, b"too large");
        remote.write_all(&frame).await.unwrap();

        for _ in 0..100 {
            if !transport.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_write_failure_fails_outstanding_requests() {
        let transport = FramedTransport::spawn(BrokenWrites, FramedConfig::default());
        let client = Client::builder().build(transport.clone()).unwrap();

        let call = client.call(Request::new("ApiService", "GetNode")).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("request must settle once the writer fails");

        match outcome {
            Err(RpcError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other.map(|r| r.body)),
        }
        assert!(!transport.is_connected());
        assert_eq!(transport.in_flight(), 0);

        assert!(matches!(
            client.call(Request::new("ApiService", "GetNode")),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_sending() {
        let (local, _remote) = tokio::io::duplex(1024);
        let transport = FramedTransport::spawn(local, FramedConfig::default().max_payload_size(256));
        let client = Client::builder().build(transport.clone()).unwrap();

        let result = client.call(
            Request::new("ApiService", "WriteRows").attachment(Bytes::from(vec![0u8; 257])),
        );
        match result {
            Err(RpcError::Protocol(message)) => assert!(message.contains("attachment")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(client.in_flight(), 0);
        assert!(transport.is_connected());

        let within = client.call(Request::new("ApiService", "WriteRows").body(vec![0u8; 256]));
        assert!(within.is_ok());
    }
}
