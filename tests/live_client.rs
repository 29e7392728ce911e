//! Live client against an in-process WebSocket server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use linecount::live::ConnectionState;
use linecount::{ClientNotification, LiveEvent, LiveEventClient, ReconnectPolicy};

/// Serve one scripted connection per entry, then stop accepting.
async fn serve(scripts: Vec<Vec<&'static str>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for script in scripts {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            for payload in script {
                ws.send(Message::Text(payload.to_string())).await.unwrap();
            }
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
    });
    format!("ws://{addr}/ws/video-count")
}

async fn next(rx: &mut UnboundedReceiver<ClientNotification>) -> ClientNotification {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("notification within 10s")
        .expect("client still alive")
}

fn policy(ms: u64) -> ReconnectPolicy {
    ReconnectPolicy {
        backoff: Duration::from_millis(ms),
    }
}

const COUNTED_1: &str =
    r#"{"event":"object_counted","total_count":1,"object_id":7,"object_label":"car"}"#;
const COUNTED_2: &str =
    r#"{"event":"object_counted","total_count":2,"object_id":9,"object_label":"truck"}"#;
const ENDED: &str = r#"{"event":"video_ended","total_count":2,"processed_video_url":"http://127.0.0.1:8000/processed-videos/out.mp4"}"#;

// ─── Delivery ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_arrive_in_order_and_survive_reconnect() {
    let url = serve(vec![
        vec![
            COUNTED_1,
            "this is not json",
            r#"{"event":"processed_video_saved","path":"x.mp4"}"#,
            COUNTED_2,
        ],
        vec![ENDED],
    ])
    .await;

    let mut client = LiveEventClient::websocket(url, policy(50));
    let mut rx = client.subscribe();
    client.connect();

    assert!(matches!(next(&mut rx).await, ClientNotification::Opened));
    match next(&mut rx).await {
        ClientNotification::Event(event) => {
            assert_eq!(event.total_count(), 1);
            assert_eq!(event.tag(), "object_counted");
        }
        other => panic!("expected first count, got {other:?}"),
    }
    assert!(matches!(next(&mut rx).await, ClientNotification::Diagnostic(_)));
    match next(&mut rx).await {
        ClientNotification::Event(event) => assert_eq!(event.total_count(), 2),
        other => panic!("expected second count, got {other:?}"),
    }
    match next(&mut rx).await {
        ClientNotification::Closed { reconnect_in } => {
            assert_eq!(reconnect_in, Some(Duration::from_millis(50)));
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert!(matches!(next(&mut rx).await, ClientNotification::Opened));
    match next(&mut rx).await {
        ClientNotification::Event(LiveEvent::VideoEnded {
            total_count,
            output_path,
        }) => {
            assert_eq!(total_count, 2);
            assert!(output_path.unwrap().ends_with("/out.mp4"));
        }
        other => panic!("expected video_ended, got {other:?}"),
    }
    assert_eq!(client.attempts(), 2);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let url = serve(vec![vec![COUNTED_1]]).await;

    let mut client = LiveEventClient::websocket(url, policy(60_000));
    let mut rx = client.subscribe();
    client.connect();

    assert!(matches!(next(&mut rx).await, ClientNotification::Opened));
    assert!(matches!(next(&mut rx).await, ClientNotification::Event(_)));
    assert!(matches!(
        next(&mut rx).await,
        ClientNotification::Closed {
            reconnect_in: Some(_)
        }
    ));
    assert!(client.reconnect_pending());

    client.disconnect().await;
    assert!(!client.reconnect_pending());
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.attempts(), 1);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn refused_connection_schedules_one_retry() {
    // Bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let mut client = LiveEventClient::websocket(format!("ws://{addr}/ws/video-count"), policy(60_000));
    let mut rx = client.subscribe();
    client.connect();

    assert!(matches!(next(&mut rx).await, ClientNotification::Diagnostic(_)));
    assert!(matches!(
        next(&mut rx).await,
        ClientNotification::Closed {
            reconnect_in: Some(_)
        }
    ));
    // A second connect() while the timer is pending is a no-op
    client.connect();
    assert_eq!(client.attempts(), 1);

    client.disconnect().await;
    assert!(!client.reconnect_pending());
}
