// tests/integration/lifecycle_test.rs

//! End-to-end flows through the built-in handlers: status, login and cleanup.

use super::test_helpers::*;
use bytes::Buf;
use lodestone::config::Config;
use lodestone::core::builtin::offline_uuid;
use lodestone::core::players::{PlayerDirectory, PlayerRegistry};
use lodestone::core::protocol::ProtocolState;
use lodestone::core::protocol::wire::read_string;
use serde_json::Value;
use std::sync::Arc;

#[tokio::test]
async fn test_status_request_and_ping() {
    let mut config = Config::default();
    config.status.motd = "Integration test server".to_string();
    config.status.max_players = 7;
    let mut ctx = TestContext::with_config(config);

    ctx.client.handshake(1).await;
    ctx.client.send_frame(0x00, b"").await;

    let response = ctx.client.read_frame().await;
    assert_eq!(response.packet_id, 0x00);
    let mut body = &response.body[..];
    let json = read_string(&mut body, 32767).expect("status response is a string");
    let status: Value = serde_json::from_str(&json).expect("status response is JSON");
    assert_eq!(status["description"]["text"], "Integration test server");
    assert_eq!(status["players"]["max"], 7);
    assert_eq!(status["players"]["online"], 0);
    assert_eq!(status["version"]["protocol"], 498);
    assert_eq!(ctx.handle.protocol_state(), ProtocolState::Status);

    ctx.client
        .send_frame(0x01, &0x1122_3344_5566_7788i64.to_be_bytes())
        .await;
    let pong = ctx.client.read_frame().await;
    assert_eq!(pong.packet_id, 0x01);
    assert_eq!(pong.body.clone().get_i64(), 0x1122_3344_5566_7788);

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_handshake_records_the_client_protocol_version() {
    let mut ctx = TestContext::new();
    ctx.client
        .send_frame(0x00, &handshake_body(340, 1))
        .await;
    ctx.client.send_frame(0x00, b"").await;

    let response = ctx.client.read_frame().await;
    let mut body = &response.body[..];
    let json = read_string(&mut body, 32767).expect("status response is a string");
    let status: Value = serde_json::from_str(&json).expect("status response is JSON");
    assert_eq!(status["version"]["protocol"], 340);
    assert_eq!(ctx.handle.protocol_version(), 340);

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_handshake_with_unknown_next_state_is_contained() {
    let mut ctx = TestContext::new();
    ctx.client
        .send_frame(0x00, &handshake_body(498, 9))
        .await;
    // A second, valid handshake still works on the same connection.
    ctx.client.handshake(1).await;
    ctx.client.send_frame(0x00, b"").await;

    let response = ctx.client.read_frame().await;
    assert_eq!(response.packet_id, 0x00);
    assert_eq!(ctx.handle.protocol_state(), ProtocolState::Status);

    assert_eq!(ctx.disconnect().await, Ok(()));
}

#[tokio::test]
async fn test_login_registers_the_player_and_disconnect_removes_it() {
    let mut ctx = TestContext::new();

    ctx.client.handshake(2).await;
    ctx.client.send_frame(0x00, &string_body("Steve")).await;

    let success = ctx.client.read_frame().await;
    assert_eq!(success.packet_id, 0x02);
    let mut body = &success.body[..];
    let uuid = read_string(&mut body, 36).expect("uuid string");
    let name = read_string(&mut body, 16).expect("name string");
    assert_eq!(uuid, offline_uuid("Steve").hyphenated().to_string());
    assert_eq!(name, "Steve");

    // The handler enqueues the reply before it finishes updating the connection.
    while ctx.handle.protocol_state() != ProtocolState::Play {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctx.handle.identity(), Some(offline_uuid("Steve")));
    assert_eq!(ctx.handle.display_name(), "Steve");
    assert_eq!(ctx.players.online(), 1);
    assert_eq!(
        ctx.handle.player().map(|p| p.name.clone()),
        Some("Steve".to_string())
    );

    let players = ctx.players.clone();
    assert_eq!(ctx.disconnect().await, Ok(()));
    assert_eq!(players.online(), 0);
    assert!(players.lookup(&offline_uuid("Steve")).is_none());
}

#[tokio::test]
async fn test_disconnect_before_play_leaves_directory_untouched() {
    let mut ctx = TestContext::new();
    ctx.client.handshake(2).await;

    while ctx.handle.protocol_state() != ProtocolState::Login {
        tokio::task::yield_now().await;
    }
    let players = ctx.players.clone();
    assert_eq!(ctx.disconnect().await, Ok(()));
    assert_eq!(players.online(), 0);
}

#[tokio::test]
async fn test_status_reports_players_online() {
    let config = Config::default();
    let players = Arc::new(PlayerRegistry::new());
    let mut login = TestContext::with_players(config.clone(), players.clone());
    let mut status = TestContext::with_players(config, players.clone());

    login.client.handshake(2).await;
    login.client.send_frame(0x00, &string_body("Alex")).await;
    login.client.read_frame().await;
    while players.online() == 0 {
        tokio::task::yield_now().await;
    }

    status.client.handshake(1).await;
    status.client.send_frame(0x00, b"").await;
    let response = status.client.read_frame().await;
    let mut body = &response.body[..];
    let json = read_string(&mut body, 32767).expect("status response is a string");
    let reported: Value = serde_json::from_str(&json).expect("status response is JSON");
    assert_eq!(reported["players"]["online"], 1);

    assert_eq!(login.disconnect().await, Ok(()));
    assert_eq!(status.disconnect().await, Ok(()));
    assert_eq!(players.online(), 0);
}

#[tokio::test]
async fn test_connection_gets_fresh_encryption_artifacts() {
    let first = TestContext::new();
    let second = TestContext::new();

    let id = first.handle.server_id().to_string();
    assert_eq!(id.len(), 20);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_ne!(first.handle.server_id(), second.handle.server_id());

    assert_eq!(first.disconnect().await, Ok(()));
    assert_eq!(second.disconnect().await, Ok(()));
}
