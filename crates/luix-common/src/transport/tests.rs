//! Integration tests for the transport layer
//!
//! These tests verify framing, size limits and the server loop end to end
//! over in-memory pipes and loopback sockets.

#[cfg(test)]
mod tests {
    use crate::protocol::heartbeat::{heartbeat_request, is_heartbeat_success};
    use crate::protocol::{LuixError, Request, Response};
    use crate::transport::frame::{FrameHeader, HEADER_LEN, MAGIC};
    use crate::transport::{
        read_frame, write_frame, Codec, Frame, Serializer, TcpServer, TcpTransportAsync, WorkerLimits,
    };
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_frame_round_trip_over_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = Request::new("com.acme.OrderService", "getOrder").with_payload(vec![1, 2, 3]);
        let frame = Frame::request(&Codec::new(), &request, false).unwrap();

        write_frame(&mut client, &frame).await.unwrap();
        let received = read_frame(&mut server, MAX).await.unwrap().unwrap();

        assert_eq!(received, frame);
        assert!(!received.header.is_response());
        assert_eq!(received.decode_request().unwrap(), request);
    }

    #[tokio::test]
    async fn test_frame_header_names_serializer() {
        let request = Request::new("svc", "m");
        let frame = Frame::request(&Codec::for_serializer(Serializer::Json), &request, false).unwrap();
        assert_eq!(frame.header.serializer_id, Serializer::JSON_ID);
        assert_eq!(frame.decode_request().unwrap(), request);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_body() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Header only: the body is never written, so reading it would hang.
        let header = FrameHeader::new(0, Serializer::POSTCARD_ID, (MAX + 1) as u32);
        client.write_all(&header.encode()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), read_frame(&mut server, MAX))
            .await
            .expect("oversized frame must be rejected without waiting for its body");
        assert!(matches!(result, Err(LuixError::Codec(_))));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = FrameHeader::new(0, 1, 0).encode();
        buf[0] = 0;
        assert!(FrameHeader::decode(&buf, MAX).is_err());
        assert_eq!(buf.len(), HEADER_LEN);
        assert_ne!(u16::from_be_bytes([buf[0], buf[1]]), MAGIC);
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server, MAX).await.unwrap().is_none());
    }

    async fn start_echo_server() -> (String, CancellationToken) {
        let server = TcpServer::new("127.0.0.1:0", WorkerLimits::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run_with_handler(
            |request: Request| async move {
                let serializer = request.serializer().unwrap_or_default();
                Response::success(request.id, request.payload.clone(), serializer)
            },
            shutdown.clone(),
        ));
        (addr, shutdown)
    }

    #[tokio::test]
    async fn test_server_echoes_request_payload() {
        let (addr, shutdown) = start_echo_server().await;
        let transport = TcpTransportAsync::new(Duration::from_secs(1), MAX);
        let mut stream = transport.connect(&addr).await.unwrap();

        let request = Request::new("echo", "echo").with_payload(vec![7, 8, 9]);
        let response = transport
            .send_request(&mut stream, &Codec::new(), &request)
            .await
            .unwrap();

        assert_eq!(response.request_id, request.id);
        assert_eq!(response.payload, Some(vec![7, 8, 9]));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_server_answers_heartbeat_without_handler() {
        let server = TcpServer::new("127.0.0.1:0", WorkerLimits::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run_with_handler(
            |request: Request| async move {
                Response::error(request.id, &LuixError::Remote("reached the handler".into()))
            },
            shutdown.clone(),
        ));

        let transport = TcpTransportAsync::new(Duration::from_secs(1), MAX);
        let mut stream = transport.connect(&addr).await.unwrap();
        let response = transport
            .send_request(&mut stream, &Codec::new(), &heartbeat_request())
            .await
            .unwrap();

        assert!(is_heartbeat_success(response));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = TcpTransportAsync::new(Duration::from_millis(200), MAX);
        // Port 1 is reserved and never listening in test environments.
        let result = transport.connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(LuixError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_resolves_host_names() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = TcpTransportAsync::new(Duration::from_millis(500), MAX);

        let addr = format!("localhost:{}", port);
        let (stream, accepted) = tokio::join!(
            transport.connect(&addr),
            listener.accept()
        );
        assert_eq!(stream.unwrap().peer_addr().unwrap().port(), port);
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_address_without_port() {
        let transport = TcpTransportAsync::new(Duration::from_millis(200), MAX);
        let result = transport.connect("127.0.0.1").await;
        assert!(matches!(result, Err(LuixError::Connection(_))));
    }
}
