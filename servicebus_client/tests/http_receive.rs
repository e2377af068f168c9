use servicebus_client::{
    ClientError, HttpTransport, Message, MessageOptions, ReceiveError, ReceiveRequest,
    SubscriptionClient, Transport,
};
use servicebus_codec::ConnectionString;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
    sync::mpsc,
};
use wiremock::{
    matchers::{header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const HEAD: &str = "/my_topic/subscriptions/testApp1/messages/head";

fn connection_string(server: &MockServer) -> String {
    connection_string_for(&server.uri())
}

fn connection_string_for(endpoint: &str) -> String {
    format!("Endpoint={endpoint}/;SharedAccessKeyName=reader;SharedAccessKey=c2VjcmV0=")
}

fn transport(server: &MockServer) -> HttpTransport {
    let parsed: ConnectionString = connection_string(server).parse().unwrap();
    HttpTransport::new(&parsed).unwrap()
}

#[tokio::test]
async fn receive_and_delete_head() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(HEAD))
        .and(query_param("timeout", "60"))
        .and(header_exists("Authorization"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header(
                    "BrokerProperties",
                    r#"{"MessageId":"m-1","SequenceNumber":7,"DeliveryCount":1}"#,
                )
                .set_body_string(r#"{"a":1}"#),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Subscription is empty afterwards
    Mock::given(method("DELETE"))
        .and(path(HEAD))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let transport = transport(&server);
    let request = ReceiveRequest::new("my_topic", "testApp1");

    let message = transport
        .receive(request.clone())
        .await
        .unwrap()
        .expect("head message");
    assert_eq!(message.body.as_deref(), Ok(&br#"{"a":1}"#[..]));
    assert_eq!(message.properties.message_id.as_deref(), Some("m-1"));
    assert_eq!(message.properties.sequence_number, Some(7));

    assert_eq!(transport.receive(request).await, Ok(None));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let authorization = requests[0]
        .headers
        .get("Authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(authorization.starts_with("SharedAccessSignature sr=http%3A%2F%2F127.0.0.1"));
    assert!(authorization.contains("%2Fmy_topic%2Fsubscriptions%2FtestApp1&sig="));
    assert!(authorization.ends_with("&skn=reader"));
}

#[tokio::test]
async fn rejected_signature() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(HEAD))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            "<Error><Code>401</Code><Detail>InvalidSignature: The token has an invalid signature.</Detail></Error>",
        ))
        .mount(&server)
        .await;

    let error = transport(&server)
        .receive(ReceiveRequest::new("my_topic", "testApp1"))
        .await
        .unwrap_err();

    assert!(matches!(error, ReceiveError::Unauthorized { status: 401, .. }));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn listener_prints_through_callback() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(HEAD))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"a":1}"#))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(HEAD))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = SubscriptionClient::create_from_connection_string(
        &connection_string(&server),
        "my_topic",
        "testApp1",
    )
    .unwrap();

    let (send, mut recv) = mpsc::unbounded_channel();
    let handle = client
        .on_message(
            move |message: Message| {
                let send = send.clone();
                async move {
                    send.send(message.body.unwrap()).unwrap();
                }
            },
            MessageOptions::default(),
        )
        .unwrap();

    let body = recv.recv().await.unwrap();
    assert_eq!(&body[..], br#"{"a":1}"#);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn missing_subscription_stops_listener() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = SubscriptionClient::create_from_connection_string(
        &connection_string(&server),
        "my_topic",
        "testApp1",
    )
    .unwrap();
    let handle = client
        .on_message(|_message: Message| async {}, MessageOptions::default())
        .unwrap();

    let result = handle.task.await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn truncated_body_reaches_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    // Answers one receive with fewer body bytes than announced, then hangs up
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buffer = [0; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = socket.read(&mut buffer).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buffer[..read]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"a\":")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let client = SubscriptionClient::create_from_connection_string(
        &connection_string_for(&format!("http://{address}")),
        "my_topic",
        "testApp1",
    )
    .unwrap();

    let (send, mut recv) = mpsc::unbounded_channel();
    let handle = client
        .on_message(
            move |message: Message| {
                let send = send.clone();
                async move {
                    send.send(message.body).unwrap();
                }
            },
            MessageOptions::default(),
        )
        .unwrap();

    let body = tokio::time::timeout(std::time::Duration::from_secs(10), recv.recv())
        .await
        .expect("callback invoked for the truncated message")
        .unwrap();
    assert!(body.is_err(), "{body:?}");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn refused_connection_stops_listener() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = SubscriptionClient::create_from_connection_string(
        &connection_string_for(&format!("http://{address}")),
        "my_topic",
        "testApp1",
    )
    .unwrap();
    let handle = client
        .on_message(|_message: Message| async {}, MessageOptions::default())
        .unwrap();

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), handle.task)
        .await
        .expect("listener gave up")
        .unwrap();
    match result {
        Err(ClientError::ListenerFailed(reason)) => {
            assert!(reason.starts_with("Transport failure"), "{reason}")
        }
        otherwise => panic!("Expected listener failure, got {otherwise:?}"),
    }
}
