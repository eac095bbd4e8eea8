mod fixture;

use std::time::Duration;

use appliance_update::{
    ErrorKind,
    logs::{LogLine, LogStream, tail},
};
use fixture::Fixture;
use tokio::sync::mpsc;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path, query_param},
};

fn events(lines: &[&str]) -> ResponseTemplate {
    let body: String = lines.iter().map(|l| format!("data: {l}\n\n")).collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn mock_stream(fx: &Fixture, stream: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/log"))
        .and(query_param("path", "/user/hello"))
        .and(query_param("stream", stream))
        .respond_with(response)
        .mount(&fx.mock_server)
        .await;
}

async fn collect(mut rx: mpsc::Receiver<LogLine>) -> Vec<LogLine> {
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    lines
}

#[tokio::test]
async fn both_streams_are_forwarded() {
    let fx = Fixture::new().await;
    fx.mock_features(&[]).await;
    mock_stream(&fx, "stdout", events(&["listening on :8080", "ready"])).await;
    mock_stream(&fx, "stderr", events(&["warning: no config"])).await;

    let client = fx.connect().await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(collect(rx));
    tail(&client, "hello", tx, &fx.cancel).await.unwrap();
    let lines = collector.await.unwrap();

    let stdout: Vec<_> = lines
        .iter()
        .filter(|l| l.stream == LogStream::Stdout)
        .map(|l| l.line.as_str())
        .collect();
    assert_eq!(stdout, ["listening on :8080", "ready"]);
    assert!(lines.contains(&LogLine {
        stream: LogStream::Stderr,
        line: "warning: no config".into(),
    }));
}

#[tokio::test]
async fn unknown_service_fails_fast() {
    let fx = Fixture::new().await;
    fx.mock_features(&[]).await;
    Mock::given(method("GET"))
        .and(path("/log"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fx.mock_server)
        .await;

    let client = fx.connect().await.unwrap();
    let (tx, _rx) = mpsc::channel(16);
    let err = tokio::time::timeout(
        Duration::from_secs(2),
        tail(&client, "hello", tx, &fx.cancel),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, appliance_update::Error::ServiceNotFound(ref s) if s == "hello"));
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn failing_stream_does_not_stop_its_peer() {
    let fx = Fixture::with().log_reconnects(2).build().await;
    fx.mock_features(&[]).await;
    mock_stream(&fx, "stdout", events(&["still here"])).await;
    Mock::given(method("GET"))
        .and(path("/log"))
        .and(query_param("stream", "stderr"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&fx.mock_server)
        .await;

    let client = fx.connect().await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(collect(rx));
    tail(&client, "hello", tx, &fx.cancel).await.unwrap();
    let lines = collector.await.unwrap();
    assert_eq!(
        lines,
        [LogLine {
            stream: LogStream::Stdout,
            line: "still here".into(),
        }]
    );
}

#[tokio::test]
async fn cancelling_ends_the_tail_cleanly() {
    let fx = Fixture::new().await;
    fx.mock_features(&[]).await;
    let slow = events(&["late"]).set_delay(Duration::from_secs(30));
    mock_stream(&fx, "stdout", slow.clone()).await;
    mock_stream(&fx, "stderr", slow).await;

    let client = fx.connect().await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let cancel = fx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), tail(&client, "hello", tx, &fx.cancel))
        .await
        .unwrap()
        .unwrap();
    assert!(collect(rx).await.is_empty());
}
