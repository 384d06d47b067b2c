//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real tokio-tungstenite server on a random port and
//! drive the client transport against it, checking the events the handler
//! sees and the frames the server receives.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use meteor_ddp_transport::{
        Transport, TransportError, TransportEvent, TransportHandler,
        WebSocketConfig, WebSocketTransport,
    };
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    /// Handler that forwards every event into a channel the test can await.
    struct Collector(mpsc::UnboundedSender<TransportEvent>);

    impl TransportHandler for Collector {
        fn on_event(&self, event: TransportEvent) {
            let _ = self.0.send(event);
        }
    }

    fn transport_for(
        addr: &str,
    ) -> (WebSocketTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let transport =
            WebSocketTransport::new(WebSocketConfig::new(format!("ws://{addr}")))
                .expect("inside a runtime");
        let (tx, rx) = mpsc::unbounded_channel();
        transport.bind_handler(Arc::new(Collector(tx)));
        (transport, rx)
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event should arrive in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_websocket_open_send_receive_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            assert_eq!(first.to_text().unwrap(), "hello from client");

            ws.send(Message::Text("hello from server".to_string().into()))
                .await
                .unwrap();

            // The client's close() should show up as a Close frame.
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        });

        let (transport, mut events) = transport_for(&addr);
        transport.open().expect("open should succeed");
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        transport
            .send_text("hello from client")
            .expect("send should succeed");
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Text("hello from server".into())
        );

        transport.close().expect("close should succeed");
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

        server.await.expect("server task should finish cleanly");
    }

    #[tokio::test]
    async fn test_websocket_connect_refused_reports_error_then_disconnect() {
        // Grab a free port, then release it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (transport, mut events) = transport_for(&addr);
        transport.open().expect("open only schedules the attempt");

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Error(_)
        ));
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_websocket_open_without_handler_fails() {
        let transport = WebSocketTransport::new(WebSocketConfig::default())
            .expect("inside a runtime");

        let result = transport.open();

        assert!(matches!(result, Err(TransportError::NoHandler)));
    }

    #[tokio::test]
    async fn test_websocket_send_before_open_fails() {
        let (transport, _events) = transport_for("127.0.0.1:1");

        let result = transport.send_text("too early");

        assert!(matches!(result, Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn test_websocket_server_close_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (transport, mut events) = transport_for(&addr);
        transport.open().unwrap();

        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    }

    #[test]
    fn test_websocket_new_outside_runtime_fails() {
        let result = WebSocketTransport::new(WebSocketConfig::default());
        assert!(matches!(result, Err(TransportError::NoRuntime)));
    }
}
