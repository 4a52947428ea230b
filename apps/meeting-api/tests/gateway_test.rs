mod common;

use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio::time;

use common::{connect, expect_close, join, participant_named, recv, recv_through, recv_until, send};
use meeting_api::config::Config;
use meeting_api::models::participant::ConnectionState;

#[tokio::test]
async fn gateway_hello_then_welcome() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut ws, hello) = connect(addr).await;

    assert_eq!(hello["s"], 1);
    assert!(hello["d"]["connection_id"].as_str().unwrap().starts_with("conn_"));
    assert!(hello["d"]["heartbeat_interval"].as_u64().unwrap() > 0);

    send(&mut ws, "join", json!({ "display_name": "Alice", "role": "participant" })).await;
    let welcome = recv(&mut ws).await;
    assert_eq!(welcome["t"], "welcome");
    assert_eq!(welcome["s"], 2);

    let d = &welcome["d"];
    assert!(d["participant"]["id"].as_str().unwrap().starts_with("ptc_"));
    assert_eq!(d["participant"]["display_name"], "Alice");
    assert_eq!(d["participant"]["role"], "participant");
    assert_eq!(d["participant"]["connection"], "connected");
    assert!(d["resume_token"].as_str().unwrap().starts_with("rsm_"));

    let update = recv_until(&mut ws, "state_update").await;
    assert!(participant_named(&update, "Alice").is_some());
    assert!(update["d"]["queue"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn gateway_broadcasts_skip_unjoined_connections() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut lurker, _) = connect(addr).await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;

    // The lurker never joined: the next frame it sees is its own heartbeat ack.
    send(&mut lurker, "heartbeat", json!(null)).await;
    let frame = recv(&mut lurker).await;
    assert_eq!(frame["t"], "heartbeat_ack");
}

#[tokio::test]
async fn gateway_late_joiner_sees_itself_first() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut late, _) = connect(addr).await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;
    send(&mut alice, "raise_hand", json!({ "kind": "topic" })).await;
    send(&mut alice, "heartbeat", json!(null)).await;
    recv_until(&mut alice, "heartbeat_ack").await;

    send(&mut late, "join", json!({ "display_name": "Bob", "role": "participant" })).await;
    let welcome = recv(&mut late).await;
    assert_eq!(welcome["t"], "welcome");
    let update = recv(&mut late).await;
    assert_eq!(update["t"], "state_update");
    assert!(participant_named(&update, "Bob").is_some());
    assert_eq!(update["d"]["queue"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn gateway_displaced_connection_stops_receiving_broadcasts() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut first, _) = connect(addr).await;
    let welcome = join(&mut first, "Alice", "participant").await;
    let token = welcome["resume_token"].clone();

    let (mut second, _) = connect(addr).await;
    send(
        &mut second,
        "join",
        json!({ "display_name": "Alice", "role": "participant", "resume_token": token }),
    )
    .await;
    assert_eq!(recv(&mut second).await["t"], "welcome");
    send(&mut second, "toggle_reaction", json!(null)).await;
    send(&mut second, "heartbeat", json!(null)).await;
    recv_until(&mut second, "heartbeat_ack").await;

    send(&mut first, "heartbeat", json!(null)).await;
    assert_eq!(recv(&mut first).await["t"], "heartbeat_ack");

    send(&mut first, "toggle_reaction", json!(null)).await;
    let error = recv(&mut first).await;
    assert_eq!(error["t"], "error");
    assert_eq!(error["d"]["kind"], "NotAuthenticated");
}

#[tokio::test]
async fn gateway_heartbeat_timeout_starts_grace_period() {
    let config = Config {
        heartbeat_interval: Duration::from_millis(200),
        ..Config::default()
    };
    let (addr, state) = common::start_ws_server(config).await;
    let (mut alice, hello) = connect(addr).await;
    assert_eq!(hello["d"]["heartbeat_interval"], 200);
    join(&mut alice, "Alice", "participant").await;

    // Silent from here on.
    expect_close(&mut alice, 4009).await;

    let connection_of = || {
        state
            .meeting
            .lock()
            .sessions()
            .find_by_name("Alice")
            .map(|p| p.connection)
    };
    for _ in 0..50 {
        if connection_of() == Some(ConnectionState::GracePeriod) {
            break;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(connection_of(), Some(ConnectionState::GracePeriod));
}

#[tokio::test]
async fn gateway_name_taken_closes_connection() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;

    let (mut impostor, _) = connect(addr).await;
    send(&mut impostor, "join", json!({ "display_name": "alice", "role": "guest" })).await;

    let error = recv(&mut impostor).await;
    assert_eq!(error["t"], "error");
    assert_eq!(error["d"]["kind"], "NameTaken");
    expect_close(&mut impostor, 4004).await;
}

#[tokio::test]
async fn gateway_invalid_resume_token_closes_connection() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut ws, _) = connect(addr).await;

    send(
        &mut ws,
        "join",
        json!({ "display_name": "Alice", "role": "participant", "resume_token": "rsm_bogus" }),
    )
    .await;
    let error = recv(&mut ws).await;
    assert_eq!(error["d"]["kind"], "InvalidResumeToken");
    expect_close(&mut ws, 4004).await;
}

#[tokio::test]
async fn gateway_malformed_frame_keeps_connection() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut ws, _) = connect(addr).await;

    ws.send(tokio_tungstenite::tungstenite::Message::Text("not json".into()))
        .await
        .unwrap();
    let error = recv(&mut ws).await;
    assert_eq!(error["t"], "error");
    assert_eq!(error["d"]["kind"], "InvalidPayload");

    send(&mut ws, "raise_hand", json!({ "kind": "sideways" })).await;
    let error = recv(&mut ws).await;
    assert_eq!(error["d"]["kind"], "InvalidPayload");

    send(&mut ws, "heartbeat", json!(null)).await;
    assert_eq!(recv(&mut ws).await["t"], "heartbeat_ack");
}

#[tokio::test]
async fn gateway_commands_require_join() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut ws, _) = connect(addr).await;

    send(&mut ws, "toggle_reaction", json!(null)).await;
    let error = recv(&mut ws).await;
    assert_eq!(error["d"]["kind"], "NotAuthenticated");
}

#[tokio::test]
async fn gateway_resume_keeps_identity_and_queue_position() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut observer, _) = connect(addr).await;
    join(&mut observer, "Chair", "admin").await;

    let (mut alice, _) = connect(addr).await;
    let welcome = join(&mut alice, "Alice", "participant").await;
    let id = welcome["participant"]["id"].clone();
    let token = welcome["resume_token"].as_str().unwrap().to_string();

    send(&mut alice, "raise_hand", json!({ "kind": "topic" })).await;
    let raised = recv_until(&mut observer, "state_update").await;
    let raised = loop_until_queue_len(&mut observer, raised, 1).await;
    let raised_at = raised["d"]["queue"][0]["raised_at"].clone();

    alice.close(None).await.unwrap();
    let mut update = recv_until(&mut observer, "state_update").await;
    while participant_named(&update, "Alice").unwrap()["connection"] != "grace_period" {
        update = recv_until(&mut observer, "state_update").await;
    }
    assert_eq!(update["d"]["queue"][0]["raised_at"], raised_at);

    let (mut again, _) = connect(addr).await;
    send(
        &mut again,
        "join",
        json!({ "display_name": "Alice", "role": "participant", "resume_token": token }),
    )
    .await;
    let welcome = recv(&mut again).await;
    assert_eq!(welcome["t"], "welcome");
    assert_eq!(welcome["d"]["participant"]["id"], id);
    assert_eq!(welcome["d"]["participant"]["connection"], "connected");
    assert_eq!(welcome["d"]["resume_token"], token.as_str());

    let update = recv_until(&mut again, "state_update").await;
    assert_eq!(update["d"]["queue"][0]["participant_id"], id);
    assert_eq!(update["d"]["queue"][0]["raised_at"], raised_at);
}

async fn loop_until_queue_len(
    ws: &mut common::Ws,
    mut update: serde_json::Value,
    len: usize,
) -> serde_json::Value {
    while update["d"]["queue"].as_array().unwrap().len() != len {
        update = recv_until(ws, "state_update").await;
    }
    update
}

#[tokio::test]
async fn gateway_grace_expiry_releases_name() {
    let config = Config {
        grace_period: Duration::from_millis(200),
        ..Config::default()
    };
    let (addr, state) = common::start_ws_server(config).await;

    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;
    alice.close(None).await.unwrap();

    time::sleep(Duration::from_millis(600)).await;
    assert!(state.meeting.lock().sessions().find_by_name("Alice").is_none());

    let (mut newcomer, _) = connect(addr).await;
    let welcome = join(&mut newcomer, "Alice", "guest").await;
    assert_eq!(welcome["participant"]["role"], "guest");
}

#[tokio::test]
async fn gateway_vote_auto_closes_with_single_result() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut chair, _) = connect(addr).await;
    join(&mut chair, "Chair", "admin").await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;
    let (mut bob, _) = connect(addr).await;
    join(&mut bob, "Bob", "participant").await;

    send(&mut chair, "start_vote", json!({ "anonymous": false })).await;
    let started = recv_until(&mut alice, "vote_started").await;
    assert_eq!(started["d"]["anonymous"], false);
    recv_until(&mut bob, "vote_started").await;

    send(&mut alice, "cast_vote", json!({ "option": "yes" })).await;
    assert_eq!(recv_until(&mut alice, "vote_accepted").await["t"], "vote_accepted");
    send(&mut bob, "cast_vote", json!({ "option": "no" })).await;

    let frames = recv_through(&mut chair, |f| f["t"] == "vote_result").await;
    let result = frames.last().unwrap().clone();
    let after = recv_through(&mut chair, |f| {
        f["t"] == "vote_status_update" && f["d"]["active"] == false
    })
    .await;
    assert!(after.iter().all(|f| f["t"] != "vote_result"));
    assert_eq!(after[0]["t"], "state_update");

    let d = &result["d"];
    assert_eq!(d["summary"], json!({ "yes": 1, "no": 1, "abstain": 0 }));
    let details = d["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert!(details.contains(&json!({ "display_name": "Alice", "option": "yes" })));
    assert!(details.contains(&json!({ "display_name": "Bob", "option": "no" })));

    // A late stop is silent: no error, no second result.
    send(&mut chair, "stop_vote", json!(null)).await;
    send(&mut chair, "heartbeat", json!(null)).await;
    assert_eq!(recv(&mut chair).await["t"], "heartbeat_ack");
}

#[tokio::test]
async fn gateway_anonymous_stop_hides_details() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut chair, _) = connect(addr).await;
    join(&mut chair, "Chair", "admin").await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;
    let (mut bob, _) = connect(addr).await;
    join(&mut bob, "Bob", "participant").await;

    send(&mut chair, "start_vote", json!({ "anonymous": true })).await;
    recv_until(&mut alice, "vote_started").await;
    send(&mut alice, "cast_vote", json!({ "option": "abstain" })).await;
    recv_until(&mut alice, "vote_accepted").await;

    send(&mut chair, "stop_vote", json!(null)).await;
    let result = recv_until(&mut chair, "vote_result").await;
    assert_eq!(result["d"]["anonymous"], true);
    assert_eq!(result["d"]["summary"]["abstain"], 1);
    assert!(result["d"].get("details").is_none());
}

#[tokio::test]
async fn gateway_start_vote_needs_voters() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut chair, _) = connect(addr).await;
    join(&mut chair, "Chair", "admin").await;

    send(&mut chair, "start_vote", json!({ "anonymous": false })).await;
    let error = recv_until(&mut chair, "error").await;
    assert_eq!(error["d"]["kind"], "NoEligibleVoters");
}

#[tokio::test]
async fn gateway_participant_cannot_lower_hands() {
    let (addr, state) = common::start_ws_server(Config::default()).await;
    let (mut alice, _) = connect(addr).await;
    let welcome = join(&mut alice, "Alice", "participant").await;
    let (mut bob, _) = connect(addr).await;
    join(&mut bob, "Bob", "participant").await;

    send(&mut alice, "raise_hand", json!({ "kind": "reply" })).await;
    send(&mut alice, "heartbeat", json!(null)).await;
    recv_until(&mut alice, "heartbeat_ack").await;

    send(
        &mut bob,
        "admin_lower_hand",
        json!({ "target_id": welcome["participant"]["id"], "kind": "reply" }),
    )
    .await;
    let error = recv_until(&mut bob, "error").await;
    assert_eq!(error["d"]["kind"], "Unauthorized");
    assert_eq!(state.meeting.lock().snapshot().queue.len(), 1);
}

#[tokio::test]
async fn gateway_admin_lowers_hand_idempotently() {
    let (addr, state) = common::start_ws_server(Config::default()).await;
    let (mut chair, _) = connect(addr).await;
    join(&mut chair, "Chair", "admin").await;
    let (mut alice, _) = connect(addr).await;
    let welcome = join(&mut alice, "Alice", "participant").await;
    let target = json!({ "target_id": welcome["participant"]["id"], "kind": "topic" });

    send(&mut alice, "raise_hand", json!({ "kind": "topic" })).await;
    send(&mut alice, "heartbeat", json!(null)).await;
    recv_until(&mut alice, "heartbeat_ack").await;

    for _ in 0..2 {
        send(&mut chair, "admin_lower_hand", target.clone()).await;
        send(&mut chair, "heartbeat", json!(null)).await;
        let frames = recv_through(&mut chair, |f| f["t"] == "heartbeat_ack").await;
        assert!(frames.iter().all(|f| f["t"] != "error"));
    }
    assert!(state.meeting.lock().snapshot().queue.is_empty());
}

#[tokio::test]
async fn gateway_logout_frees_name() {
    let (addr, _state) = common::start_ws_server(Config::default()).await;
    let (mut alice, _) = connect(addr).await;
    join(&mut alice, "Alice", "participant").await;

    send(&mut alice, "logout", json!(null)).await;
    assert_eq!(recv_until(&mut alice, "logged_out").await["t"], "logged_out");
    expect_close(&mut alice, 1000).await;

    let (mut again, _) = connect(addr).await;
    join(&mut again, "Alice", "advisor").await;
}
