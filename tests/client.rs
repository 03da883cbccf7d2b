use std::{
    collections::HashMap,
    sync::{mpsc, Arc, Mutex},
    time::{Duration, Instant},
};

use serde_json::json;
use target_delivery::{
    AnalyticsForTargetEvent, ClientConfig, Content, ContentSource, Error, ExternalState,
    FileDataStore, HttpRequest, HttpResponse, MboxContent, PrivacyStatus, RawRequest,
    TargetClient, TargetConfiguration, TargetParameters, TargetPrefetch, TargetRequest,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn load_response(name: &str) -> serde_json::Value {
    let path = format!("tests/data/responses/{name}");
    serde_json::from_reader(std::fs::File::open(path).unwrap()).unwrap()
}

/// Transport answering every call with the next queued body and recording request bodies.
#[derive(Clone, Default)]
struct MockServer {
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    responses: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockServer {
    fn respond_with(&self, body: serde_json::Value) {
        self.responses.lock().unwrap().push(body);
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until `count` calls were received. Calls run on network threads, so they may still be
    /// in progress when the client returns.
    fn wait_for_requests(&self, count: usize) -> Vec<HttpRequest> {
        let deadline = Instant::now() + TIMEOUT;
        while self.requests.lock().unwrap().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.requests()
    }

    fn config(&self) -> ClientConfig {
        let server = self.clone();
        let mut config = ClientConfig::from_client_code("acme");
        config.transport(move |request: &HttpRequest| -> target_delivery::Result<HttpResponse> {
            server.requests.lock().unwrap().push(request.clone());
            let mut responses = server.responses.lock().unwrap();
            let body = if responses.is_empty() {
                json!({})
            } else {
                responses.remove(0)
            };
            Ok(HttpResponse::ok(&body))
        });
        config
    }
}

fn retrieve(client: &TargetClient, names: &[&str]) -> Vec<MboxContent> {
    let (sender, receiver) = mpsc::channel();
    let requests = names
        .iter()
        .map(|name| {
            let sender = sender.clone();
            TargetRequest::new(*name, "default")
                .with_callback(move |content| sender.send(content).unwrap())
        })
        .collect();
    client.retrieve_location_content(requests, None);

    let delivered: Vec<MboxContent> = (0..names.len())
        .map(|_| receiver.recv_timeout(TIMEOUT).unwrap())
        .collect();
    // Exactly once: nothing more arrives.
    drop(sender);
    assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    delivered
}

fn prefetch(client: &TargetClient, names: &[&str]) -> target_delivery::Result<()> {
    let (sender, receiver) = mpsc::channel();
    client.prefetch_content(
        names.iter().map(|name| TargetPrefetch::new(*name)).collect(),
        None,
        move |result| sender.send(result).unwrap(),
    );
    receiver.recv_timeout(TIMEOUT).unwrap()
}

#[test]
fn retrieve_location_content() {
    init();
    let server = MockServer::default();
    server.respond_with(load_response("execute.json"));
    let client = server.config().to_client().unwrap();

    let delivered = retrieve(&client, &["mbox0", "mbox1"]);

    let by_name: HashMap<_, _> = delivered
        .iter()
        .map(|content| (content.name.as_str(), content))
        .collect();
    assert_eq!(
        by_name["mbox0"].content,
        Content::Html("<p>hero</p>".to_owned())
    );
    assert_eq!(by_name["mbox1"].content, Content::Json(json!({"flag": true})));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].body["execute"]["mboxes"],
        json!([{"index": "0", "name": "mbox0"}, {"index": "1", "name": "mbox1"}])
    );
    assert_eq!(
        client.get_tnt_id().unwrap().as_deref(),
        Some("66E5C681-4F70-41A2-86AE-F1E151443B10.35_0")
    );

    client.shutdown().unwrap();
}

#[test]
fn server_failure_delivers_default_content() {
    init();
    let server = MockServer::default();
    server.respond_with(json!({"message": "failure"}));
    server.respond_with(json!({"message": "failure"}));
    let client = server.config().to_client().unwrap();

    let delivered = retrieve(&client, &["a", "b"]);
    assert!(delivered.iter().all(MboxContent::is_default));
    assert!(delivered
        .iter()
        .all(|content| content.content == Content::Html("default".to_owned())));

    match prefetch(&client, &["a"]) {
        Err(Error::Server(message)) => assert_eq!(message, "failure"),
        other => panic!("unexpected prefetch result: {other:?}"),
    }

    client.shutdown().unwrap();
}

#[test]
fn prefetched_content_is_consumed_once() {
    init();
    let server = MockServer::default();
    server.respond_with(load_response("prefetch.json"));
    let client = server.config().to_client().unwrap();

    prefetch(&client, &["mbox0", "mbox1"]).unwrap();

    let delivered = retrieve(&client, &["mbox0"]);
    assert_eq!(delivered[0].source, ContentSource::Cache);
    assert_eq!(server.requests().len(), 1);

    let delivered = retrieve(&client, &["mbox0"]);
    assert_eq!(delivered[0].source, ContentSource::Default);
    assert_eq!(server.requests().len(), 2);

    client.shutdown().unwrap();
}

#[test]
fn clear_prefetch_cache() {
    init();
    let server = MockServer::default();
    server.respond_with(load_response("prefetch.json"));
    let client = server.config().to_client().unwrap();

    prefetch(&client, &["mbox0", "mbox1"]).unwrap();
    client.clear_prefetch_cache();

    let delivered = retrieve(&client, &["mbox1"]);
    assert!(delivered[0].is_default());
    assert_eq!(server.requests().len(), 2);

    client.shutdown().unwrap();
}

#[test]
fn reset_experience_drops_third_party_id() {
    init();
    let server = MockServer::default();
    let client = server.config().to_client().unwrap();

    client.set_third_party_id(Some("customer-42"));
    assert_eq!(
        client.get_third_party_id().unwrap().as_deref(),
        Some("customer-42")
    );
    retrieve(&client, &["mbox"]);

    client.reset_experience();
    assert_eq!(client.get_third_party_id().unwrap(), None);
    retrieve(&client, &["mbox"]);

    let requests = server.requests();
    assert_eq!(requests[0].body["id"]["thirdPartyId"], json!("customer-42"));
    assert!(requests[1].body.get("id").is_none());

    client.shutdown().unwrap();
}

#[test]
fn notifications_for_unknown_mbox_make_no_network_call() {
    init();
    let server = MockServer::default();
    let client = server.config().to_client().unwrap();

    client.locations_displayed(vec!["never-fetched".to_owned()], None);
    client.location_clicked("never-fetched", None);

    // Getters are answered after the notifications have been processed.
    client.get_session_id().unwrap();
    assert!(server.requests().is_empty());

    client.shutdown().unwrap();
}

#[test]
fn display_and_click_notifications() {
    init();
    let server = MockServer::default();
    server.respond_with(load_response("execute.json"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut config = server.config();
    config.analytics_logger(move |event: AnalyticsForTargetEvent| {
        sink.lock().unwrap().push(event)
    });
    let client = config.to_client().unwrap();

    retrieve(&client, &["mbox0", "mbox1"]);
    client.locations_displayed(
        vec!["mbox0".to_owned()],
        Some(TargetParameters::new().with_parameters(HashMap::from([(
            "placement".to_owned(),
            "top".to_owned(),
        )]))),
    );
    client.location_clicked("mbox0", None);
    let session_id = client.get_session_id().unwrap();

    let requests = server.wait_for_requests(3);
    assert_eq!(requests.len(), 3);

    let notification = |notification_type: &str| {
        requests[1..]
            .iter()
            .map(|request| request.body["notifications"][0].clone())
            .find(|notification| notification["type"] == json!(notification_type))
            .unwrap()
    };

    let display = notification("display");
    assert_eq!(display["mbox"], json!({"name": "mbox0", "state": "state-0"}));
    assert_eq!(display["tokens"], json!(["display-token-0"]));
    assert_eq!(display["parameters"], json!({"placement": "top"}));

    let click = notification("click");
    assert_eq!(click["tokens"], json!(["click-token-0"]));

    let events = events.lock().unwrap();
    let payloads: Vec<&str> = events
        .iter()
        .map(|event| event.payload["&&tnta"].as_str())
        .collect();
    // Execute, display and click.
    assert_eq!(
        payloads,
        vec!["331289:0:0|2", "331289:0:0|2", "331289:0:0|32767"]
    );
    assert!(events
        .iter()
        .all(|event| event.payload["a.target.sessionId"] == session_id));

    client.shutdown().unwrap();
}

#[test]
fn timeout_delivers_default_content() {
    init();
    let mut config = ClientConfig::from_client_code("acme");
    config
        .timeout(Duration::from_millis(100))
        .transport(|_request: &HttpRequest| -> target_delivery::Result<HttpResponse> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(HttpResponse::ok(&load_response("execute.json")))
        });
    let client = config.to_client().unwrap();

    let delivered = retrieve(&client, &["mbox0"]);
    assert!(delivered[0].is_default());

    client.shutdown().unwrap();
}

#[test]
fn opted_out_client_sends_nothing() {
    init();
    let server = MockServer::default();
    let mut config = server.config();
    config.privacy_status(PrivacyStatus::OptedOut);
    let client = config.to_client().unwrap();

    let delivered = retrieve(&client, &["mbox"]);
    assert!(delivered[0].is_default());
    assert!(matches!(prefetch(&client, &["mbox"]), Err(Error::OptedOut)));

    client.set_tnt_id(Some("tnt"));
    assert_eq!(client.get_tnt_id().unwrap(), None);
    assert!(server.requests().is_empty());

    client.shutdown().unwrap();
}

#[test]
fn opting_out_clears_identifiers() {
    init();
    let server = MockServer::default();
    let client = server.config().to_client().unwrap();

    client.set_tnt_id(Some("tnt"));
    client.set_third_party_id(Some("third"));
    let session_id = client.get_session_id().unwrap();

    let mut configuration = TargetConfiguration::new("acme");
    configuration.privacy_status = PrivacyStatus::OptedOut;
    client.update_configuration(configuration);

    assert_eq!(client.get_tnt_id().unwrap(), None);
    assert_eq!(client.get_third_party_id().unwrap(), None);
    assert_ne!(client.get_session_id().unwrap(), session_id);

    client.shutdown().unwrap();
}

#[test]
fn external_state_is_captured_per_call() {
    init();
    let server = MockServer::default();
    let mut config = server.config();
    config.external_state_provider(|| {
        let mut external = ExternalState::default();
        external.visitor.marketing_cloud_id = Some("mcid".to_owned());
        external.lifecycle = HashMap::from([("launches".to_owned(), "7".to_owned())]);
        external
    });
    let client = config.to_client().unwrap();

    retrieve(&client, &["mbox"]);

    let body = &server.requests()[0].body;
    assert_eq!(body["id"]["marketingCloudVisitorId"], json!("mcid"));
    assert_eq!(
        body["execute"]["mboxes"][0]["profileParameters"],
        json!({"a.Launches": "7"})
    );
    assert_eq!(body["experienceCloud"]["analytics"]["logging"], json!("client_side"));

    client.shutdown().unwrap();
}

#[test]
fn raw_request_returns_response() {
    init();
    let server = MockServer::default();
    server.respond_with(load_response("execute.json"));
    let client = server.config().to_client().unwrap();

    let request: RawRequest = serde_json::from_value(json!({
        "execute": {"mboxes": [{"index": 0, "name": "mbox0"}]}
    }))
    .unwrap();
    let (sender, receiver) = mpsc::channel();
    client.execute_raw_request(request, move |result| sender.send(result).unwrap());

    let response = receiver.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(response["execute"]["mboxes"][0]["name"], json!("mbox0"));

    client.send_raw_notifications(vec![json!({"id": "n1", "type": "display"})]);
    client.get_session_id().unwrap();

    let requests = server.wait_for_requests(2);
    assert_eq!(requests[1].body["notifications"][0]["id"], json!("n1"));
    assert!(requests[1].body.get("execute").is_none());

    client.shutdown().unwrap();
}

#[test]
fn identifiers_survive_restart() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.json");
    let server = MockServer::default();

    let mut config = server.config();
    config.data_store(FileDataStore::open(&path).unwrap());
    let client = config.to_client().unwrap();
    client.set_tnt_id(Some("66E5C681-4F70-41A2-86AE-F1E151443B10.35_0"));
    client.set_third_party_id(Some("third"));
    let session_id = client.get_session_id().unwrap();
    client.shutdown().unwrap();

    let mut config = server.config();
    config.data_store(FileDataStore::open(&path).unwrap());
    let client = config.to_client().unwrap();
    assert_eq!(
        client.get_tnt_id().unwrap().as_deref(),
        Some("66E5C681-4F70-41A2-86AE-F1E151443B10.35_0")
    );
    assert_eq!(client.get_third_party_id().unwrap().as_deref(), Some("third"));
    assert_eq!(client.get_session_id().unwrap(), session_id);

    retrieve(&client, &["mbox"]);
    assert_eq!(
        server.requests()[0].url.host_str(),
        Some("mboxedge35.tt.omtrdc.net")
    );

    client.shutdown().unwrap();
}
