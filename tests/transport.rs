//! Session transport integration tests
//!
//! Runs a WebSocket server in-process so the full connect, setup, media,
//! and close sequence is exercised without a real backend.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use chime::codec::WireChunk;
use chime::transport::{SessionSetup, SessionTransport, TransportEvent, TransportState};

fn test_setup() -> SessionSetup {
    SessionSetup {
        model: "native-audio-latest".to_string(),
        voice: "zephyr".to_string(),
        system_instruction: "test instruction".to_string(),
    }
}

async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn setup_is_the_first_message_on_the_wire() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(value["setup"]["model"], "native-audio-latest");
        assert_eq!(value["setup"]["voice"], "zephyr");
        assert_eq!(value["setup"]["systemInstruction"], "test instruction");

        ws.close(None).await.unwrap();
    });

    let (transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();
    assert_eq!(transport.state(), TransportState::Open);
    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);

    server.await.unwrap();
}

#[tokio::test]
async fn inbound_parts_become_events_in_arrival_order() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();

        let message = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                        { "text": "thinking about it" },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "//8A/w==" } }
                    ]
                }
            }
        });
        ws.send(Message::Text(message.to_string().into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
    });

    let (_transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);

    match events.recv().await.unwrap() {
        TransportEvent::Audio(chunk) => {
            assert_eq!(chunk.mime_type, "audio/pcm;rate=24000");
            assert_eq!(chunk.data, "AAAA");
        }
        other => panic!("expected first audio event, got {other:?}"),
    }

    assert_eq!(
        events.recv().await.unwrap(),
        TransportEvent::Status("thinking about it".to_string())
    );

    match events.recv().await.unwrap() {
        TransportEvent::Audio(chunk) => assert_eq!(chunk.data, "//8A/w=="),
        other => panic!("expected second audio event, got {other:?}"),
    }

    assert_eq!(events.recv().await.unwrap(), TransportEvent::Closed);
    server.await.unwrap();
}

#[tokio::test]
async fn outbound_media_is_framed_as_realtime_input() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();

        let media = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(media.to_text().unwrap()).unwrap();
        assert_eq!(
            value["realtimeInput"]["media"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(value["realtimeInput"]["media"]["data"], "AAAA");

        ws.close(None).await.unwrap();
    });

    let (transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);

    transport.send(WireChunk::audio("AAAA".to_string()));

    assert_eq!(events.recv().await.unwrap(), TransportEvent::Closed);
    server.await.unwrap();
}

#[tokio::test]
async fn server_error_faults_the_transport() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();

        let message = serde_json::json!({ "error": { "message": "quota exceeded" } });
        ws.send(Message::Text(message.to_string().into()))
            .await
            .unwrap();
    });

    let (_transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);
    assert_eq!(
        events.recv().await.unwrap(),
        TransportEvent::Faulted("quota exceeded".to_string())
    );

    server.await.unwrap();
}

#[tokio::test]
async fn send_after_close_is_dropped_silently() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        // Drain until the client goes away
        while ws.next().await.is_some() {}
    });

    let (mut transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);

    transport.close();
    transport.close();
    assert_eq!(transport.state(), TransportState::Closed);

    // Dropped, never queued, never an error
    transport.send(WireChunk::audio("AAAA".to_string()));

    server.abort();
}

#[tokio::test]
async fn close_frame_is_delivered_even_with_media_queued() {
    let (listener, url) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();

        // Drain everything and report whether a close frame arrived
        let mut saw_close = false;
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                saw_close = true;
                break;
            }
        }
        saw_close
    });

    let (mut transport, mut events) = SessionTransport::connect(&url, test_setup()).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), TransportEvent::Opened);

    // Flood well past the outbound queue capacity, then close immediately;
    // the close signal must not be lost behind the backlog
    for _ in 0..256 {
        transport.send(WireChunk::audio("AAAA".to_string()));
    }
    transport.close();

    assert!(server.await.unwrap());
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let (listener, url) = bind_server().await;
    drop(listener);

    let result = SessionTransport::connect(&url, test_setup()).await;
    assert!(result.is_err());
}
