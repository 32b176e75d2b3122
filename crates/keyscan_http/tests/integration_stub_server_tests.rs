use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use keyscan_core::keyspace::Partition;
use keyscan_core::{
    Cursor, FetchError, GroupMutator, KeySpace, PageFetcher, PageRequest,
    ParallelScanCoordinator, RecordingSleeper, ScanConfig, ScanError, ScanFilter,
};
use keyscan_http::{AccountServiceClient, AuthHeaders, ScanResource};

/// Request line plus lower-cased headers as the stub received them.
#[derive(Debug, Clone)]
struct SeenRequest {
    line: String,
    headers: Vec<(String, String)>,
}

impl SeenRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Answers one scripted response per connection, then stops.
struct StubServer {
    url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("stub should bind");
        let url = format!(
            "http://{}/account/v2",
            listener.local_addr().expect("stub should have an address")
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().expect("stub should accept");
                let mut reader = BufReader::new(stream.try_clone().expect("stream should clone"));

                let mut line = String::new();
                reader.read_line(&mut line).expect("request line should read");
                let mut headers = Vec::new();
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).expect("header should read");
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
                    }
                }
                log.lock().expect("poisoned mutex").push(SeenRequest {
                    line: line.trim_end().to_string(),
                    headers,
                });

                let mut stream = stream;
                let reply = format!(
                    "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).expect("reply should write");
            }
        });

        Self {
            url,
            seen,
            handle: Some(handle),
        }
    }

    fn requests(&mut self) -> Vec<SeenRequest> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("stub thread should finish");
        }
        self.seen.lock().expect("poisoned mutex").clone()
    }
}

fn client(url: &str, resource: ScanResource) -> AccountServiceClient {
    AccountServiceClient::new(
        url,
        resource,
        &AuthHeaders::new("test_provisioner").with_secret("s3cret"),
        Duration::from_secs(5),
    )
    .expect("client should build")
}

fn window() -> Partition {
    Partition {
        partition_id: 0,
        start: 0,
        end: 999,
    }
}

#[test]
fn page_request_sends_credentials_and_window() {
    let mut server = StubServer::start(vec![(
        200,
        r#"[{"key": 10, "email": "a@example.com"}, {"key": 260, "tags": ["x"]}]"#,
    )]);
    let filter = ScanFilter::attribute("country", "\"US\"").with_attribute_names(["key", "email"]);
    let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 100);

    let page = client(&server.url, ScanResource::Accounts)
        .fetch_page(&request)
        .expect("fetch should succeed");

    assert_eq!(page.len(), 2);
    assert_eq!(page.records()[0].string_field("email").as_deref(), Some("a@example.com"));
    assert_eq!(page.last_key(), Some(260));

    let seen = server.requests();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].line.starts_with("GET /account/v2/accounts?name=country&value=%22US%22"));
    assert!(seen[0]
        .line
        .contains("startKey=0&startInclusive=true&endKey=999&endInclusive=true&count=100"));
    assert!(seen[0].line.contains("attributeNames=key%2Cemail"));
    assert_eq!(seen[0].header("clientname"), Some("test_provisioner"));
    assert_eq!(seen[0].header("clientsecret"), Some("s3cret"));
}

#[test]
fn status_codes_are_classified() {
    let mut server = StubServer::start(vec![
        (404, r#"{"message": "no such attribute"}"#),
        (503, "maintenance"),
        (200, "not json"),
    ]);
    let client = client(&server.url, ScanResource::Licenses);
    let filter = ScanFilter::role("ROLE_EXT_ADMIN");
    let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 100);

    let not_found = client.fetch_page(&request).expect_err("404 should fail");
    let unavailable = client.fetch_page(&request).expect_err("503 should fail");
    let garbled = client.fetch_page(&request).expect_err("bad body should fail");

    assert!(matches!(not_found, FetchError::Client { status: 404, .. }));
    assert!(!not_found.is_retryable());
    assert!(matches!(
        unavailable,
        FetchError::Server { status: 503, ref message } if message == "maintenance"
    ));
    assert!(matches!(garbled, FetchError::Decode(_)));
    assert!(server.requests()[0].line.starts_with("GET /account/v2/licenses?role=ROLE_EXT_ADMIN"));
}

#[test]
fn connection_refused_is_a_retryable_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("probe should bind");
    let url = format!("http://{}", listener.local_addr().expect("probe address"));
    drop(listener);
    let filter = ScanFilter::role("ROLE_EXT_ADMIN");
    let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 100);

    let error = client(&url, ScanResource::Licenses)
        .fetch_page(&request)
        .expect_err("fetch should fail");

    assert!(matches!(error, FetchError::Transport(_)));
    assert!(error.is_retryable());
}

#[test]
fn scan_retries_server_error_then_succeeds() {
    let mut server = StubServer::start(vec![
        (500, "oops"),
        (200, r#"[{"key": 1}, {"key": 2}]"#),
    ]);
    let sleeper = Arc::new(RecordingSleeper::new());
    let coordinator = ParallelScanCoordinator::new(ScanConfig {
        key_space: KeySpace::new(0, 999).expect("key space should be valid"),
        partitions: 1,
        page_size: 100,
        ..ScanConfig::default()
    })
    .with_sleeper(sleeper.clone());

    let result = coordinator
        .scan(
            &client(&server.url, ScanResource::Licenses),
            &ScanFilter::role("ROLE_EXT_ADMIN"),
        )
        .expect("scan should succeed");

    assert_eq!(result.len(), 2);
    assert_eq!(sleeper.delays().len(), 1);
    let seen = server.requests();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].line, seen[1].line);
}

#[test]
fn scan_stops_on_client_error() {
    let mut server = StubServer::start(vec![(401, "bad credentials")]);
    let coordinator = ParallelScanCoordinator::new(ScanConfig {
        key_space: KeySpace::new(0, 999).expect("key space should be valid"),
        partitions: 1,
        page_size: 100,
        ..ScanConfig::default()
    })
    .with_sleeper(Arc::new(RecordingSleeper::new()));

    let error = coordinator
        .scan(
            &client(&server.url, ScanResource::Accounts),
            &ScanFilter::attribute("country", "\"US\""),
        )
        .expect_err("scan should fail");

    assert!(matches!(
        error.root_cause(),
        ScanError::Client(FetchError::Client { status: 401, .. })
    ));
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn mutations_hit_license_endpoints() {
    let mut server = StubServer::start(vec![(200, ""), (200, ""), (409, "in use")]);
    let client = client(&server.url, ScanResource::Licenses);

    client.move_member("user-7", 420).expect("move should succeed");
    client.delete_group(11).expect("delete should succeed");
    let error = client.delete_group(12).expect_err("delete should fail");

    assert!(matches!(error, FetchError::Client { status: 409, .. }));
    let lines: Vec<String> = server
        .requests()
        .into_iter()
        .map(|request| request.line)
        .collect();
    assert_eq!(
        lines,
        vec![
            "POST /account/v2/licenses/420/users/user-7 HTTP/1.1",
            "DELETE /account/v2/licenses/11 HTTP/1.1",
            "DELETE /account/v2/licenses/12 HTTP/1.1",
        ]
    );
}
