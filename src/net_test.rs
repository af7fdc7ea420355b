use super::*;

async fn occupied_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn binds_requested_port_when_free() {
    let (holder, port) = occupied_port().await;
    drop(holder);

    let (listener, bound) = bind_with_retry("127.0.0.1", port, 0).await.unwrap();
    assert_eq!(bound, port);
    assert_eq!(listener.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn ephemeral_port_reports_actual_port() {
    let (listener, bound) = bind_with_retry("127.0.0.1", 0, 0).await.unwrap();
    assert_ne!(bound, 0);
    assert_eq!(listener.local_addr().unwrap().port(), bound);
}

#[tokio::test]
async fn zero_retries_fails_on_busy_port() {
    let (_held, port) = occupied_port().await;
    let err = bind_with_retry("127.0.0.1", port, 0).await.unwrap_err();
    assert!(matches!(err, StartupError::PortsExhausted { first, last } if first == port && last == port));
}

#[tokio::test]
async fn skips_busy_port() {
    let (_held, port) = occupied_port().await;
    // The next port may also be taken on a busy machine, so allow a few.
    match bind_with_retry("127.0.0.1", port, 5).await {
        Ok((_, bound)) => assert!(bound > port && bound <= port.saturating_add(5)),
        Err(StartupError::PortsExhausted { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_host_is_bind_error() {
    let err = bind_with_retry("not a host", 0, 3).await.unwrap_err();
    assert!(matches!(err, StartupError::Bind { .. }));
}
