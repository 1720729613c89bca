// tests/integration/outbound_test.rs

//! Outbound ordering under concurrent producers, with and without a stream cipher.

use super::test_helpers::*;
use bytes::{Buf, Bytes};
use lodestone::core::LodestoneError;
use lodestone::core::events::EventRouter;
use lodestone::core::protocol::DEFAULT_MAX_FRAME_LEN;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

const PRODUCERS: u8 = 4;
const PACKETS_PER_PRODUCER: u16 = 100;

/// Spawns producers that each send a numbered sequence, and waits for them to finish.
async fn produce_concurrently(ctx: &TestContext) {
    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let handle = ctx.handle.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..PACKETS_PER_PRODUCER {
                let mut body = vec![producer];
                body.extend_from_slice(&seq.to_be_bytes());
                handle.send(0x30, &body).expect("send failed");
                if seq % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await.expect("producer panicked");
    }
}

/// Reads every produced packet and checks each producer's sequence is intact.
async fn assert_per_producer_order(client: &mut TestClient) {
    let mut next_seq: HashMap<u8, u16> = HashMap::new();
    for _ in 0..(PRODUCERS as usize * PACKETS_PER_PRODUCER as usize) {
        let frame = client.read_frame().await;
        assert_eq!(frame.packet_id, 0x30);
        let mut body: Bytes = frame.body;
        let producer = body.get_u8();
        let seq = body.get_u16();
        let expected = next_seq.entry(producer).or_insert(0);
        assert_eq!(seq, *expected, "producer {producer} packets out of order");
        *expected += 1;
    }
    for producer in 0..PRODUCERS {
        assert_eq!(next_seq.get(&producer), Some(&PACKETS_PER_PRODUCER));
    }
}

/// Enqueues `labels` from one task each. Tasks are spawned in reverse and each one
/// sends only after the previous label was enqueued, so enqueue order is label order.
async fn enqueue_from_chained_tasks(ctx: &TestContext, labels: &[&'static [u8]]) {
    let (start_tx, mut previous) = oneshot::channel::<()>();
    let mut stages = Vec::new();
    for label in labels {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        stages.push((*label, std::mem::replace(&mut previous, done_rx), done_tx));
    }

    let mut tasks = Vec::new();
    for (label, ready, done_tx) in stages.into_iter().rev() {
        let handle = ctx.handle.clone();
        tasks.push(tokio::spawn(async move {
            ready.await.expect("previous stage dropped its signal");
            handle.send(0x60, label).expect("send failed");
            let _ = done_tx.send(());
        }));
    }
    start_tx.send(()).unwrap();
    for task in tasks {
        task.await.expect("stage panicked");
    }
}

async fn assert_wire_order(client: &mut TestClient, labels: &[&'static [u8]]) {
    for label in labels {
        let frame = client.read_frame().await;
        assert_eq!(frame.packet_id, 0x60);
        assert_eq!(frame.body.as_ref(), *label);
    }
}

const CHAIN: [&[u8]; 5] = [b"A", b"B", b"C", b"D", b"E"];

#[tokio::test]
async fn test_enqueue_order_across_tasks_is_wire_order() {
    let mut ctx = TestContext::new();

    enqueue_from_chained_tasks(&ctx, &CHAIN).await;
    assert_wire_order(&mut ctx.client, &CHAIN).await;

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_enqueue_order_across_tasks_is_wire_order_when_encrypted() {
    let mut ctx = TestContext::with_cipher(
        Arc::new(EventRouter::new()),
        test_names(),
        test_settings(),
        0x6C,
    );

    enqueue_from_chained_tasks(&ctx, &CHAIN).await;
    assert_wire_order(&mut ctx.client, &CHAIN).await;

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_concurrent_producers_keep_their_own_order() {
    let mut ctx = TestContext::with_services(
        Arc::new(EventRouter::new()),
        Arc::new(AcceptAllCodec),
        test_names(),
        test_settings(),
    );

    produce_concurrently(&ctx).await;
    assert_per_producer_order(&mut ctx.client).await;

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_encrypted_stream_stays_decodable_under_concurrent_producers() {
    let mut ctx = TestContext::with_cipher(
        Arc::new(EventRouter::new()),
        test_names(),
        test_settings(),
        0x5A,
    );

    produce_concurrently(&ctx).await;
    assert_per_producer_order(&mut ctx.client).await;

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_encrypted_inbound_frames_are_decrypted_before_framing() {
    let events = RecordingEvents::new();
    let mut ctx = TestContext::with_cipher(events.clone(), test_names(), test_settings(), 0x21);

    ctx.client.send_frame(0x12, b"secret").await;
    let seen = events.next().await;
    assert_eq!(seen.name, "chat");
    assert_eq!(seen.body, Bytes::from_static(b"secret"));

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_handler_replies_arrive_in_send_order() {
    let events = EventRouter::new().on("ping", |conn, message, _args| async move {
        for i in 0..5u8 {
            conn.send(0x40, &[message.body[0], i])?;
        }
        Ok::<(), LodestoneError>(())
    });
    let mut ctx = TestContext::with_services(
        Arc::new(events),
        Arc::new(AcceptAllCodec),
        test_names(),
        test_settings(),
    );

    ctx.client.send_frame(0x10, &[9]).await;
    for i in 0..5u8 {
        let frame = ctx.client.read_frame().await;
        assert_eq!(frame.body.as_ref(), &[9, i]);
    }

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_oversized_send_is_rejected_without_closing() {
    let mut ctx = TestContext::new();
    let body = vec![0u8; DEFAULT_MAX_FRAME_LEN];
    assert!(matches!(
        ctx.handle.send(0x30, &body),
        Err(LodestoneError::FrameTooLarge { .. })
    ));
    assert_eq!(ctx.handle.outbound_len(), 0);

    ctx.handle.send(0x30, b"fits").unwrap();
    let frame = ctx.client.read_frame().await;
    assert_eq!(frame.body, Bytes::from_static(b"fits"));
    assert!(ctx.handle.is_running());

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_send_after_close_is_rejected() {
    let ctx = TestContext::new();
    let handle = ctx.handle.clone();
    assert_eq!(ctx.disconnect().await, Ok(()));

    assert!(!handle.is_running());
    assert_eq!(handle.send(0x00, b"late"), Err(LodestoneError::Closed));
}

#[tokio::test]
async fn test_closing_the_handle_ends_the_connection() {
    let mut ctx = TestContext::new();
    ctx.handle.close();
    tokio::time::timeout(TEST_TIMEOUT, ctx.handle.closed())
        .await
        .expect("closed() did not resolve");

    assert!(ctx.client.reads_eof().await);
    assert_eq!(ctx.finish().await, Ok(()));
}

#[tokio::test]
async fn test_cipher_switch_applies_to_later_traffic_only() {
    let events = EventRouter::new()
        .on("ping", |conn, _message, _args| async move {
            conn.send(0x50, b"plain ack")?;
            conn.set_cipher(Box::new(XorCipher::new(0x33)));
            Ok::<(), LodestoneError>(())
        })
        .on("chat", |conn, message, _args| async move {
            conn.send(0x51, &message.body)
        });
    let mut ctx = TestContext::with_services(
        Arc::new(events),
        Arc::new(AcceptAllCodec),
        test_names(),
        test_settings(),
    );

    ctx.client.send_frame(0x10, b"").await;
    let ack = ctx.client.read_frame().await;
    assert_eq!(ack.packet_id, 0x50);
    assert_eq!(ack.body, Bytes::from_static(b"plain ack"));

    ctx.client.set_cipher(0x33);
    ctx.client.send_frame(0x12, b"now encrypted").await;
    let echo = ctx.client.read_frame().await;
    assert_eq!(echo.packet_id, 0x51);
    assert_eq!(echo.body, Bytes::from_static(b"now encrypted"));

    assert_eq!(ctx.disconnect().await, Ok(()));
}
