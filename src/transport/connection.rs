//! Framed, congestion-paced connection over a raw byte stream.
//!
//! A [`Connection`] owns one stream and composes the
//! [`LengthPrefixCodec`] with a per-connection [`Controller`]:
//!
//! - `send` waits for a slot in the congestion window, then writes one frame
//!   under the write lock, retrying failed writes.
//! - `receive` reads one frame and reports it to the controller as an
//!   acknowledgment.
//!
//! The stream is split into halves so that a send and a receive can be in
//! progress at the same time. Concurrent sends are serialized by the write
//! lock and reach the peer in lock-acquisition order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::congestion::Controller;
use super::context::Context;
use super::error::{TransportError, TransportResult};
use super::framing::LengthPrefixCodec;
use crate::core::constants::MIN_BACKOFF_POLL;
use crate::core::{CongestionConfig, Config, RetryConfig};

/// A framed connection with its own congestion window and write lock.
#[derive(Debug)]
pub struct Connection<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    codec: LengthPrefixCodec,
    ctrl: Controller,
    retry: RetryConfig,
    closed: AtomicBool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a raw stream.
    pub fn new(
        stream: S,
        codec: LengthPrefixCodec,
        retry: RetryConfig,
        congestion: CongestionConfig,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            codec,
            ctrl: Controller::new(congestion),
            retry,
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap a raw stream using the codec, retry and congestion settings of
    /// `config`.
    pub fn with_config(stream: S, config: &Config) -> Self {
        let codec = match config.max_frame_len {
            Some(max) => LengthPrefixCodec::with_max_frame_len(max),
            None => LengthPrefixCodec::new(),
        };
        Self::new(stream, codec, config.retry(), config.congestion)
    }

    /// Send one message.
    ///
    /// Makes up to `retries + 1` attempts. Each attempt first waits for a
    /// slot in the congestion window, polling every `RTT / 10` while the
    /// window is full. Context errors end the call immediately; write errors
    /// are retried after `retry_delay` and the last one is returned once
    /// attempts run out.
    pub async fn send(&self, ctx: &Context, payload: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // An oversize payload fails every attempt; reject it before it takes
        // a window slot.
        self.codec.check_len(payload.len())?;

        let attempts = self.retry.retries + 1;
        let mut last_err = TransportError::Closed;
        for attempt in 1..=attempts {
            self.acquire_slot(ctx).await?;

            match self.write_frame(ctx, payload).await {
                Ok(()) => {
                    debug!(len = payload.len(), attempt, "frame sent");
                    return Ok(());
                }
                Err(e) if e.is_context() => return Err(e),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "send attempt failed");
                    last_err = e;
                }
            }

            if attempt < attempts {
                ctx.sleep(self.retry.retry_delay).await?;
            }
        }
        Err(last_err)
    }

    /// Receive one message and acknowledge it to the congestion controller.
    ///
    /// Failures are returned as-is; retrying is up to the caller.
    pub async fn receive(&self, ctx: &Context) -> TransportResult<Vec<u8>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let payload = ctx
            .run(async {
                let mut reader = self.reader.lock().await;
                self.codec.decode(&mut *reader).await
            })
            .await??;

        self.ctrl.ack_received();
        debug!(len = payload.len(), window = self.ctrl.window(), "frame received");
        Ok(payload)
    }

    /// Shut down the write side. Later sends and receives fail with
    /// [`TransportError::Closed`]; the stream is released on drop.
    pub async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    async fn acquire_slot(&self, ctx: &Context) -> TransportResult<()> {
        while !self.ctrl.can_send(ctx) {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            ctx.sleep(self.backoff_poll()).await?;
        }
        Ok(())
    }

    async fn write_frame(&self, ctx: &Context, payload: &[u8]) -> TransportResult<()> {
        ctx.run(async {
            let mut writer = self.writer.lock().await;
            self.codec.encode(&mut *writer, payload).await
        })
        .await??;
        Ok(())
    }
}

impl<S> Connection<S> {
    /// Current smoothed round-trip time.
    pub fn rtt(&self) -> Duration {
        self.ctrl.rtt()
    }

    /// Current congestion window.
    pub fn window(&self) -> usize {
        self.ctrl.window()
    }

    /// The congestion controller of this connection.
    pub fn controller(&self) -> &Controller {
        &self.ctrl
    }

    /// The codec used for framing.
    pub fn codec(&self) -> LengthPrefixCodec {
        self.codec
    }

    /// The retry settings.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn backoff_poll(&self) -> Duration {
        (self.ctrl.rtt() / 10).max(MIN_BACKOFF_POLL)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::DuplexStream;

    use super::*;
    use crate::transport::{ContextError, FrameError};

    fn retry(retries: u32) -> RetryConfig {
        RetryConfig {
            retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn pair(congestion: CongestionConfig) -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64);
        let codec = LengthPrefixCodec::new();
        (
            Connection::new(a, codec, retry(1), congestion),
            Connection::new(b, codec, retry(1), congestion),
        )
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (client, server) = pair(CongestionConfig::default());
        let ctx = Context::background();

        let echo = tokio::spawn(async move {
            let ctx = Context::background();
            let data = server.receive(&ctx).await.unwrap();
            let mut reply = b"Echo: ".to_vec();
            reply.extend_from_slice(&data);
            server.send(&ctx, &reply).await.unwrap();
        });

        client.send(&ctx, b"Hello").await.unwrap();
        assert_eq!(client.controller().unacked(), 1);

        let resp = client.receive(&ctx).await.unwrap();
        assert_eq!(resp, b"Echo: Hello");
        assert_eq!(client.controller().unacked(), 0);
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_while_receive_pending() {
        let (client, server) = pair(CongestionConfig::default());
        let client = Arc::new(client);

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.receive(&Context::background()).await })
        };
        // Let the receiver take the read half and block on the empty pipe.
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        tokio::time::timeout(
            Duration::from_secs(1),
            client.send(&Context::background(), b"x"),
        )
        .await
        .expect("send blocked by a pending receive")
        .unwrap();
        assert!(!pending.is_finished());

        let ctx = Context::background();
        assert_eq!(server.receive(&ctx).await.unwrap(), b"x");
        server.send(&ctx, b"y").await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let congestion = CongestionConfig {
            initial_window: 32,
            ..CongestionConfig::default()
        };
        let (a, mut raw) = tokio::io::duplex(64);
        let conn = Arc::new(Connection::new(a, LengthPrefixCodec::new(), retry(0), congestion));

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move {
                let payload = vec![i; 500 + i as usize * 37];
                conn.send(&Context::background(), &payload).await.unwrap();
            }));
        }

        // The pipe holds 64 bytes, so writers are forced to yield mid-frame.
        let codec = LengthPrefixCodec::new();
        let mut seen = Vec::new();
        for _ in 0..16 {
            let frame = codec.decode(&mut raw).await.unwrap();
            let tag = frame[0];
            assert_eq!(frame.len(), 500 + tag as usize * 37);
            assert!(frame.iter().all(|b| *b == tag), "frame {} interleaved", tag);
            seen.push(tag);
        }
        for task in tasks {
            task.await.unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_send_waits_for_window() {
        let congestion = CongestionConfig {
            initial_window: 1,
            min_window: 1,
            max_window: 4,
            ..CongestionConfig::default()
        };
        let (client, server) = pair(congestion);
        let client = Arc::new(client);
        let ctx = Context::background();

        client.send(&ctx, b"one").await.unwrap();

        let blocked = {
            let client = client.clone();
            tokio::spawn(async move { client.send(&Context::background(), b"two").await })
        };

        assert_eq!(server.receive(&ctx).await.unwrap(), b"one");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!blocked.is_finished());
        assert!(client.controller().is_congested());

        server.send(&ctx, b"reply").await.unwrap();
        assert_eq!(client.receive(&ctx).await.unwrap(), b"reply");

        blocked.await.unwrap().unwrap();
        assert_eq!(server.receive(&ctx).await.unwrap(), b"two");
        // The congested ack halved the window, floored at min_window.
        assert_eq!(client.window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled_while_window_full() {
        let congestion = CongestionConfig {
            initial_window: 1,
            min_window: 1,
            max_window: 4,
            ..CongestionConfig::default()
        };
        let (client, _server) = pair(congestion);

        client.send(&Context::background(), b"one").await.unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(50));
        let err = client.send(&ctx, b"two").await.unwrap_err();
        assert!(matches!(err, TransportError::Context(ContextError::DeadlineExceeded)));
        assert_eq!(client.controller().unacked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_then_returns_last_error() {
        let (a, b) = tokio::io::duplex(64);
        drop(b);
        let conn = Connection::new(
            a,
            LengthPrefixCodec::new(),
            retry(2),
            CongestionConfig::default(),
        );

        let err = conn.send(&Context::background(), b"lost").await.unwrap_err();
        assert!(matches!(err, TransportError::Frame(FrameError::WriteLength(_))));
        // Every attempt took a window slot.
        assert_eq!(conn.controller().unacked(), 3);
    }

    #[tokio::test]
    async fn test_oversize_send_takes_no_slot() {
        let (a, _b) = tokio::io::duplex(64);
        let conn = Connection::new(
            a,
            LengthPrefixCodec::with_max_frame_len(2),
            retry(3),
            CongestionConfig::default(),
        );

        let err = conn.send(&Context::background(), b"abc").await.unwrap_err();
        assert!(matches!(err, TransportError::Frame(FrameError::TooLarge { .. })));
        assert_eq!(conn.controller().unacked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_deadline() {
        let (client, _server) = pair(CongestionConfig::default());
        let ctx = Context::with_timeout(Duration::from_millis(20));

        let err = client.receive(&ctx).await.unwrap_err();
        assert!(matches!(err, TransportError::Context(ContextError::DeadlineExceeded)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_receive_after_peer_close() {
        let (client, server) = pair(CongestionConfig::default());
        server.close().await.unwrap();

        let err = client.receive(&Context::background()).await.unwrap_err();
        assert!(matches!(err, TransportError::Frame(ref e) if e.is_peer_closed()));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_io() {
        let (client, _server) = pair(CongestionConfig::default());
        client.close().await.unwrap();
        // Closing twice is fine.
        client.close().await.unwrap();

        let ctx = Context::background();
        assert!(matches!(client.send(&ctx, b"x").await, Err(TransportError::Closed)));
        assert!(matches!(client.receive(&ctx).await, Err(TransportError::Closed)));
    }
}
