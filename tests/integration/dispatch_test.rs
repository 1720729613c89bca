// tests/integration/dispatch_test.rs

//! Handler isolation and bounded fan-out.

use super::test_helpers::*;
use bytes::Bytes;
use lodestone::config::ConnectionConfig;
use lodestone::connection::{Connection, ConnectionHandle, ConnectionServices};
use lodestone::core::LodestoneError;
use lodestone::core::codec::{DecodedArgs, FieldKind, SchemaCodec};
use lodestone::core::dispatch::{DispatchOutcome, Dispatcher};
use lodestone::core::events::EventRouter;
use lodestone::core::players::PlayerRegistry;
use lodestone::core::protocol::{Message, VarIntFramer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

async fn reject(
    _conn: ConnectionHandle,
    _message: Message,
    _args: DecodedArgs,
) -> Result<(), LodestoneError> {
    Err(LodestoneError::Handler("rejected by handler".into()))
}

async fn explode(
    _conn: ConnectionHandle,
    _message: Message,
    _args: DecodedArgs,
) -> Result<(), LodestoneError> {
    panic!("handler exploded")
}

fn failing_router() -> EventRouter {
    EventRouter::new().on("fail", reject).on("boom", explode)
}

#[tokio::test]
async fn test_failing_and_panicking_handlers_do_not_end_the_connection() {
    let events = RecordingEvents::wrapping(Arc::new(failing_router()));
    let mut ctx = TestContext::with_services(
        events.clone(),
        Arc::new(AcceptAllCodec),
        test_names(),
        test_settings(),
    );

    ctx.client.send_frame(0x13, b"").await;
    assert_eq!(events.next().await.name, "fail");

    ctx.client.send_frame(0x14, b"").await;
    ctx.client.send_frame(0x12, b"still alive").await;
    let seen = events.next().await;
    assert_eq!(seen.name, "chat");
    assert_eq!(seen.body, Bytes::from_static(b"still alive"));

    assert!(ctx.handle.is_running());
    assert_eq!(ctx.disconnect().await, Ok(()));
}

/// A handle for calling the dispatcher directly, outside a running connection.
fn idle_handle() -> ConnectionHandle {
    let (_client, server) = tokio::io::duplex(64);
    let services = ConnectionServices {
        framer: Arc::new(VarIntFramer::default()),
        codec: Arc::new(SchemaCodec::new()),
        events: Arc::new(EventRouter::new()),
        players: Arc::new(PlayerRegistry::new()),
    };
    Connection::new(server, "idle", 7, services, ConnectionConfig::default()).handle()
}

#[tokio::test]
async fn test_dispatch_outcomes() {
    let mut codec = SchemaCodec::new();
    codec
        .register("fail", &[])
        .register("boom", &[])
        .register("chat", &[FieldKind::String(8)]);
    let dispatcher = Dispatcher::new(Arc::new(codec), Arc::new(failing_router()));
    let conn = idle_handle();

    let outcome = dispatcher
        .dispatch(&conn, Message::new("chat", 0x12, Bytes::from_static(b"\x02hi")))
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);

    let outcome = dispatcher
        .dispatch(&conn, Message::new("unlisted", 0x50, Bytes::new()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Skipped);

    let outcome = dispatcher
        .dispatch(&conn, Message::new("fail", 0x13, Bytes::new()))
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Failed(LodestoneError::Handler("rejected by handler".into()))
    );

    let outcome = dispatcher
        .dispatch(&conn, Message::new("boom", 0x14, Bytes::new()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Panicked("handler exploded".into()));

    // A body that does not match its layout fails in the codec, before any handler.
    let outcome = dispatcher
        .dispatch(&conn, Message::new("chat", 0x12, Bytes::from_static(b"\x05hi")))
        .await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Failed(LodestoneError::InvalidData(_))
    ));
}

#[tokio::test]
async fn test_in_flight_handlers_are_bounded() {
    const LIMIT: usize = 2;
    const MESSAGES: usize = 6;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let events = {
        let (running, peak, finished, gate) =
            (running.clone(), peak.clone(), finished.clone(), gate.clone());
        EventRouter::new().on("chat", move |_conn, _message, _args| {
            let (running, peak, finished, gate) =
                (running.clone(), peak.clone(), finished.clone(), gate.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
                running.fetch_sub(1, Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<(), LodestoneError>(())
            }
        })
    };
    let settings = ConnectionConfig {
        max_in_flight_handlers: LIMIT,
        ..test_settings()
    };
    let mut ctx = TestContext::with_services(
        Arc::new(events),
        Arc::new(AcceptAllCodec),
        test_names(),
        settings,
    );

    for i in 0..MESSAGES {
        ctx.client.send_frame(0x12, &[i as u8]).await;
    }
    while running.load(Ordering::SeqCst) < LIMIT {
        tokio::task::yield_now().await;
    }
    // Give the read loop every chance to overshoot the limit.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(running.load(Ordering::SeqCst), LIMIT);

    gate.add_permits(MESSAGES);
    while finished.load(Ordering::SeqCst) < MESSAGES {
        tokio::task::yield_now().await;
    }
    assert_eq!(peak.load(Ordering::SeqCst), LIMIT);

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_slow_handler_does_not_block_other_messages() {
    let gate = Arc::new(Semaphore::new(0));
    let router = {
        let gate = gate.clone();
        EventRouter::new().on("ping", move |_conn, _message, _args| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.expect("gate closed");
                Ok::<(), LodestoneError>(())
            }
        })
    };
    let events = RecordingEvents::wrapping(Arc::new(router));
    let mut ctx = TestContext::with_services(
        events.clone(),
        Arc::new(AcceptAllCodec),
        test_names(),
        test_settings(),
    );

    ctx.client.send_frame(0x10, b"slow").await;
    ctx.client.send_frame(0x12, b"fast").await;
    // The recorder logs after the inner handler returns, so "chat" comes first.
    assert_eq!(events.next().await.name, "chat");

    gate.add_permits(1);
    assert_eq!(events.next().await.name, "ping");

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_stuck_handler_is_abandoned_after_the_drain_timeout() {
    let router = EventRouter::new().on("ping", |_conn, _message, _args| async move {
        std::future::pending::<()>().await;
        Ok::<(), LodestoneError>(())
    });
    let settings = ConnectionConfig {
        handler_drain_timeout_ms: 50,
        ..test_settings()
    };
    let mut ctx = TestContext::with_services(
        Arc::new(router),
        Arc::new(AcceptAllCodec),
        test_names(),
        settings,
    );

    ctx.client.send_frame(0x10, b"").await;
    tokio::task::yield_now().await;

    assert_eq!(ctx.disconnect().await, Ok(()));
}
