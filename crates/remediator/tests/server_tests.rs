//! End-to-end tests for the HTTP ingress.
//!
//! Each test binds the real router on a random port and drives it with
//! reqwest. Commands run through the local executor, procedures come from
//! a temp directory and the advisor is a wiremock OpenAI stand-in.

use async_trait::async_trait;
use notify::{ChannelError, Notification, Notifier, NotifyChannel};
use remediator::advisor::OpenAiAdvisor;
use remediator::executor::LocalExecutor;
use remediator::procedures::DirectoryProcedureRepository;
use remediator::registry::InMemoryRegistry;
use remediator::report::CallbackBase;
use remediator::server::{build_router, ServerState};
use remediator::{RemediationPolicy, RemediationWorkflow};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test app
// =============================================================================

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingChannel {
    fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }

    /// The `request_id` carried by the most recent approval card.
    fn approval_request_id(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let card = sent.iter().rev().find(|n| n.is_actionable()).unwrap();
        card.actions[0].body["request_id"].as_str().unwrap().to_string()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct TestApp {
    addr: SocketAddr,
    channel: Arc<RecordingChannel>,
    client: reqwest::Client,
    sop_dir: PathBuf,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post(&self, path: &str, body: &Value) -> (u16, Value) {
        let response = self.client.post(self.url(path)).json(body).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.sop_dir);
    }
}

async fn spawn_app(policy: RemediationPolicy, advisor_base: Option<String>) -> TestApp {
    let unique = uuid::Uuid::new_v4().simple();
    let sop_dir = std::env::temp_dir().join(format!("remediator-it-{unique}"));
    std::fs::create_dir_all(&sop_dir).unwrap();
    std::fs::write(
        sop_dir.join("disk-full.json"),
        r#"{"plan": [{"cmd": "echo cleaned"}], "risk": "low", "description": "clear tmp cache"}"#,
    )
    .unwrap();

    let channel = Arc::new(RecordingChannel::default());
    let notifier = Notifier::with_channels(vec![channel.clone() as Arc<dyn NotifyChannel>]);
    let advisor = OpenAiAdvisor::new(
        advisor_base.as_ref().map(|_| "sk-test".to_string()),
        None,
        advisor_base,
        Duration::from_secs(5),
    )
    .unwrap();

    let workflow = RemediationWorkflow::new(
        policy,
        CallbackBase::parse("https://remediator.example.com").unwrap(),
        Arc::new(InMemoryRegistry::new()),
        Arc::new(LocalExecutor::new()),
        Arc::new(notifier),
    )
    .unwrap()
    .with_procedures(Arc::new(DirectoryProcedureRepository::new(&sop_dir)))
    .with_advisor(Arc::new(advisor));

    let app = build_router(Arc::new(ServerState::new(Arc::new(workflow))));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        channel,
        client: reqwest::Client::new(),
        sop_dir,
    }
}

fn envelope(alertname: &str, fingerprint: &str) -> Value {
    json!({
        "version": "4",
        "status": "firing",
        "receiver": "remediator",
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": alertname, "severity": "critical", "instance": "vm-1"},
            "annotations": {"description": "root partition at 98%"},
            "startsAt": "2026-01-14T10:00:00Z",
            "fingerprint": fingerprint
        }]
    })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = spawn_app(RemediationPolicy::default(), None).await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_intake_rejects_bad_envelopes() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    let (status, body) = app.post("/api/alerts", &json!({"alerts": []})).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_input");

    let (status, _) = app
        .post("/api/alerts", &json!({"alerts": [{"labels": {"severity": "critical"}}]}))
        .await;
    assert_eq!(status, 400);

    let (status, _) = app.post("/api/alerts", &json!({"status": "firing"})).await;
    assert_eq!(status, 400);

    let response = app
        .client
        .post(app.url("/api/alerts"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    assert!(app.channel.titles().is_empty());
}

#[tokio::test]
async fn test_vetted_plan_approval_flow() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    let (status, body) = app.post("/api/alerts", &envelope("disk-full", "fp-1")).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "awaiting_approval");
    assert_eq!(body["alerts"][0]["origin"], "vetted");
    assert!(!body.to_string().contains(&app.channel.approval_request_id()));

    let (_, status_body) = app.get("/api/status").await;
    assert_eq!(status_body["pending_requests"], 1);
    assert_eq!(status_body["vetted_policy"], "require_approval");

    let request_id = app.channel.approval_request_id();
    let decision = json!({"decision": "approve", "request_id": request_id});

    let (status, body) = app.post("/api/approval_callback", &decision).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"status": "executed", "incident": "disk-full"}));

    let (status, body) = app.post("/api/approval_callback", &decision).await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "already_resolved_or_unknown");

    let titles = app.channel.titles();
    assert_eq!(
        titles,
        ["disk-full remediation approval", "disk-full remediation executed"]
    );

    let (_, status_body) = app.get("/api/status").await;
    assert_eq!(status_body["pending_requests"], 0);
}

#[tokio::test]
async fn test_duplicate_delivery_is_reported() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    app.post("/api/alerts", &envelope("disk-full", "fp-dup")).await;
    let (status, body) = app.post("/api/alerts", &envelope("disk-full", "fp-dup")).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "duplicate");
    assert_eq!(app.channel.titles().len(), 1);
}

#[tokio::test]
async fn test_decision_validation() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    let (status, _) = app.post("/api/approval_callback", &json!({"decision": "approve"})).await;
    assert_eq!(status, 400);

    let (status, _) = app
        .post(
            "/api/approval_callback",
            &json!({"decision": "maybe", "request_id": "0123456789abcdef0123456789abcdef"}),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = app
        .post(
            "/api/approval_callback",
            &json!({"decision": "approve", "request_id": "0123456789abcdef0123456789abcdef"}),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["status"], "error");

    let (status, _) = app
        .post("/api/approval_callback", &json!({"decision": "reject", "request_id": "../../etc"}))
        .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_advisor_plan_can_be_rejected() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": concat!(
                    "Root cause: runaway log.\n",
                    "sudo truncate -s 0 /var/log/app.log\n",
                    "Then monitor."
                )
            }}]
        })))
        .expect(1)
        .mount(&openai)
        .await;

    let app = spawn_app(RemediationPolicy::default(), Some(format!("{}/v1", openai.uri()))).await;

    let (status, body) = app.post("/api/alerts", &envelope("log-growth", "fp-ai")).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["origin"], "ai_suggested");

    let sent = app.channel.sent.lock().unwrap().last().cloned().unwrap();
    assert_eq!(sent.commands, ["sudo truncate -s 0 /var/log/app.log"]);

    let request_id = app.channel.approval_request_id();
    let (status, body) = app
        .post(
            "/api/approval_callback",
            &json!({"decision": "reject", "request_id": request_id}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"status": "rejected", "incident": "log-growth"}));
}

#[tokio::test]
async fn test_missing_advisor_is_reported_per_alert() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    let (status, body) = app.post("/api/alerts", &envelope("cpu-high", "fp-none")).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "advisor_unavailable");
    assert_eq!(app.channel.titles(), ["cpu-high: no remediation plan"]);
}

#[tokio::test]
async fn test_auto_execute_policy_runs_vetted_plan() {
    let policy = RemediationPolicy {
        vetted_policy: remediator::VettedPolicy::AutoExecute,
        ..RemediationPolicy::default()
    };
    let app = spawn_app(policy, None).await;

    let (status, body) = app.post("/api/alerts", &envelope("disk-full", "fp-auto")).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "auto_executed");
    assert_eq!(body["alerts"][0]["status"], "executed");
    assert_eq!(app.channel.titles(), ["disk-full auto-remediated"]);
}

#[tokio::test]
async fn test_precomputed_plan_needs_approval_even_under_auto_execute() {
    let policy = RemediationPolicy {
        vetted_policy: remediator::VettedPolicy::AutoExecute,
        ..RemediationPolicy::default()
    };
    let app = spawn_app(policy, None).await;

    let mut alert = envelope("log-growth", "fp-pre");
    alert["alerts"][0]["ai"] = json!({
        "summary": "Application log grew past 20G",
        "explanation": "Truncate the log; the app reopens it on write.",
        "commands": ["sudo truncate -s 0 /var/log/app.log", "rm -rf /var/log"]
    });

    let (status, body) = app.post("/api/alerts", &alert).await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "awaiting_approval");
    assert_eq!(body["alerts"][0]["origin"], "ai_suggested");

    let card = app.channel.sent.lock().unwrap().last().cloned().unwrap();
    assert_eq!(card.commands, ["sudo truncate -s 0 /var/log/app.log"]);
    assert_eq!(card.fact_value("AI summary"), Some("Application log grew past 20G"));

    alert["alerts"][0]["fingerprint"] = json!("fp-pre-2");
    alert["alerts"][0]["ai"]["commands"] = json!([]);
    let (status, body) = app.post("/api/alerts", &alert).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_url_syntax_in_alertname_never_selects_vetted_plan() {
    let policy = RemediationPolicy {
        vetted_policy: remediator::VettedPolicy::AutoExecute,
        ..RemediationPolicy::default()
    };
    let app = spawn_app(policy, None).await;

    let (status, body) = app
        .post("/api/alerts", &envelope("disk-full.json?ref=attacker&x=", "fp-key"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["alerts"][0]["outcome"], "advisor_unavailable");
    assert!(!app.channel.titles().iter().any(|t| t.contains("auto-remediated")));
}

#[tokio::test]
async fn test_procedure_endpoints() {
    let app = spawn_app(RemediationPolicy::default(), None).await;

    let (status, body) = app.get("/api/procedures/disk-full").await;
    assert_eq!(status, 200);
    assert_eq!(body["found"], true);
    assert_eq!(body["procedure"]["commands"], json!(["echo cleaned"]));
    assert_eq!(body["procedure"]["risk"], "low");

    let (status, body) = app.get("/api/procedures/unknown").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"found": false}));

    let response = app
        .client
        .put(app.url("/api/procedures/new-sop"))
        .json(&json!({"commands": ["echo hi"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn test_procedure_writes_when_enabled() {
    let policy = RemediationPolicy {
        allow_procedure_writes: true,
        ..RemediationPolicy::default()
    };
    let app = spawn_app(policy, None).await;

    let response = app
        .client
        .put(app.url("/api/procedures/nginx-down"))
        .json(&json!({"plan": [{"cmd": "sudo systemctl restart nginx"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let (_, body) = app.get("/api/procedures/nginx-down").await;
    assert_eq!(body["procedure"]["commands"], json!(["sudo systemctl restart nginx"]));

    let response = app
        .client
        .put(app.url("/api/procedures/empty"))
        .json(&json!({"commands": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
