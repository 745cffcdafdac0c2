#[cfg(test)]
mod tests {
    use crate::common::{ScriptedPeer, create_controlled_test_server_with_limit};
    use crate::transport::{CallContext, CallDetails, ClientConfig, ClientConfigBuilder, Transport};
    use crate::wire::Frame;
    use crate::{ECHO_METHOD, EchoError, Message};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn outbound(texts: &[&str]) -> crate::transport::Outbound {
        let messages: Vec<Message> = texts.iter().map(|t| Message::new(*t)).collect();
        futures::stream::iter(messages).boxed()
    }

    #[tokio::test]
    async fn test_direct_round_trip() {
        let server = create_controlled_test_server_with_limit(10).await.unwrap();
        let transport = Transport::new(server.addr, ClientConfig::default());
        let ctx = CallContext::new();

        let call = transport
            .connect(CallDetails::new(ECHO_METHOD), outbound(&["a", "b", "c"]), &ctx)
            .await
            .unwrap();
        let (inbound, _teardown) = call.into_parts();
        let responses: Vec<Message> = inbound.map(|r| r.unwrap()).collect().await;

        assert_eq!(responses, vec![Message::new("a"), Message::new("b"), Message::new("c")]);
        assert!(ctx.failure().is_none());
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_endpoint_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = Transport::new(addr, ClientConfig::default());
        let result = transport
            .connect(CallDetails::new(ECHO_METHOD), outbound(&[]), &CallContext::new())
            .await;

        assert!(matches!(result, Err(EchoError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let config = ClientConfigBuilder::new()
            .connect_timeout(Duration::from_millis(200))
            .build();
        let transport = Transport::new(addr, config);
        let result = transport
            .connect(CallDetails::new(ECHO_METHOD), outbound(&[]), &CallContext::new())
            .await;

        assert!(matches!(result, Err(EchoError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let transport = Transport::new(addr, ClientConfig::default());
        let ctx = CallContext::new();
        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.cancel();
            })
        };

        let result = transport
            .connect(CallDetails::new(ECHO_METHOD), outbound(&[]), &ctx)
            .await;

        assert!(matches!(result, Err(EchoError::Cancelled)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let server = create_controlled_test_server_with_limit(10).await.unwrap();
        let transport = Transport::new(server.addr, ClientConfig::default());

        let result = transport
            .connect(CallDetails::new("/echo.EchoService/Missing"), outbound(&[]), &CallContext::new())
            .await;

        match result {
            Err(EchoError::ConnectionFailed(reason)) => assert!(reason.contains("unknown method")),
            other => panic!("expected rejection, got {other:?}"),
        }
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_reaches_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move { ScriptedPeer::accept(&listener).await.unwrap() });

        let transport = Transport::new(addr, ClientConfig::default());
        let details = CallDetails::new(ECHO_METHOD).with_metadata("x-request-id", "42");
        let _call = transport
            .connect(details, futures::stream::pending().boxed(), &CallContext::new())
            .await
            .unwrap();

        let peer = peer.await.unwrap();
        assert_eq!(peer.method, ECHO_METHOD);
        assert_eq!(peer.metadata.get("x-request-id").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_dropping_call_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move { ScriptedPeer::accept(&listener).await.unwrap() });

        let transport = Transport::new(addr, ClientConfig::default());
        let call = transport
            .connect(
                CallDetails::new(ECHO_METHOD),
                futures::stream::pending().boxed(),
                &CallContext::new(),
            )
            .await
            .unwrap();
        let mut peer = peer.await.unwrap();

        drop(call);

        let next = tokio::time::timeout(Duration::from_secs(2), peer.recv())
            .await
            .expect("peer should observe the connection closing");
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_peer_abort_is_transport_broken() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let mut peer = ScriptedPeer::accept(&listener).await.unwrap();
            peer.send(Frame::Message(Message::new("first"))).await.unwrap();
            peer.send(Frame::Abort {
                reason: "handler failed".to_string(),
            })
            .await
            .unwrap();
            peer
        });

        let transport = Transport::new(addr, ClientConfig::default());
        let ctx = CallContext::new();
        let call = transport
            .connect(CallDetails::new(ECHO_METHOD), futures::stream::pending().boxed(), &ctx)
            .await
            .unwrap();
        let (mut inbound, _teardown) = call.into_parts();

        assert_eq!(inbound.next().await.unwrap().unwrap(), Message::new("first"));
        assert!(matches!(inbound.next().await, Some(Err(EchoError::TransportBroken(_)))));
        assert!(inbound.next().await.is_none());
        assert!(matches!(ctx.failure(), Some(EchoError::TransportBroken(_))));

        let _peer = peer.await.unwrap();
    }
}
