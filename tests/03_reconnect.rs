mod support;

use serde_json::json;

use support::{FakeBus, WsClient};

#[tokio::test]
async fn lost_bus_is_reconnected_and_subscriptions_restored() {
    let mut bus = FakeBus::start().await;
    let gateway = support::start_gateway(&bus, "reconnect").await;
    let me = gateway.self_channel.clone();

    let mut client = WsClient::connect(gateway.port).await;
    client
        .send_json(&json!({"type": "START_SESSION", "service": "click2call"}))
        .await;
    let (_, request) = bus.next_published().await;
    let client_id = request["clientId"].as_str().unwrap().to_string();

    let started = json!({
        "type": "SESSION_STARTED",
        "sessionId": "s1",
        "clientId": client_id,
        "service": "click2call"
    });
    bus.inject(&me, &started);
    assert_eq!(client.next_json().await, started);
    bus.wait_for_subscription("sid:s1").await;

    bus.drop_connections();
    assert!(!bus.is_subscribed(&me));
    assert!(!bus.is_subscribed("sid:s1"));

    // backoff retry brings both the inbox and the live session back
    bus.wait_for_subscription(&me).await;
    bus.wait_for_subscription("sid:s1").await;

    assert_eq!(bus.inject("sid:s1", &json!({"type": "CALL_STATUS"})), 1);
    assert_eq!(client.next_json().await, json!({"type": "CALL_STATUS"}));

    // and client traffic flows out over the new links
    let offer = json!({"type": "SDP_OFFER", "service": "click2call", "sessionId": "s1"});
    client.send_json(&offer).await;
    assert_eq!(bus.next_published().await, ("click2call".to_string(), offer));
}
