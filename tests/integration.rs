use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_tungstenite::tungstenite::Message;
use training_backend::config::Config;
use training_backend::{build_state, routes::build_router};

fn scenario_bank_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("training-banks-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let bank = json!({
        "id": "two-step",
        "title": "Two step scenario",
        "questions": [
            {"id": 1, "prompt": "First", "options": ["A", "B"], "correctOptionIndex": 0, "explanation": "A is right"},
            {"id": 2, "prompt": "Second", "options": ["X", "Y", "Z"], "correctOptionIndex": 2, "explanation": "Z is right"}
        ]
    });
    std::fs::write(dir.join("two_step.json"), bank.to_string()).unwrap();
    dir
}

async fn spawn_server() -> (String, reqwest::Client) {
    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        banks_dir: Some(scenario_bank_dir()),
        ..Config::default()
    };
    let state = build_state(config).expect("state");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), reqwest::Client::new())
}

async fn create_session(base: &str, client: &reqwest::Client, body: Value) -> i64 {
    let resp = client
        .post(format!("{}/api/v1/sessions", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json::<Value>().await.unwrap()["sessionId"].as_i64().unwrap()
}

async fn post_action(base: &str, client: &reqwest::Client, id: i64, action: &str, body: Option<Value>) -> reqwest::Response {
    let req = client.post(format!("{}/api/v1/sessions/{}/{}", base, id, action));
    let req = match body {
        Some(b) => req.json(&b),
        None => req,
    };
    req.send().await.unwrap()
}

async fn next_event(ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin)) -> Value {
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

#[tokio::test]
async fn two_question_scenario_scores_full_marks() {
    let (base, client) = spawn_server().await;
    let id = create_session(&base, &client, json!({"bankId": "two-step"})).await;

    let view = client
        .get(format!("{}/api/v1/sessions/{}", base, id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(view["phase"], "notStarted");
    assert!(view.get("currentQuestion").is_none());

    let started = post_action(&base, &client, id, "start", None).await;
    assert_eq!(started.status(), 200);
    let started = started.json::<Value>().await.unwrap();
    assert_eq!(started["ledger"], json!([null, null]));
    assert_eq!(started["currentQuestion"]["prompt"], "First");
    assert!(started["currentQuestion"].get("correctOptionIndex").is_none());

    post_action(&base, &client, id, "select", Some(json!({"optionIndex": 0}))).await;
    post_action(&base, &client, id, "advance", None).await;
    let answered = post_action(&base, &client, id, "select", Some(json!({"optionIndex": 2}))).await;
    let answered = answered.json::<Value>().await.unwrap();
    assert_eq!(answered["feedback"]["isCorrect"], true);
    assert_eq!(answered["feedback"]["explanation"], "Z is right");
    assert_eq!(answered["isLast"], true);

    let done = post_action(&base, &client, id, "advance", None).await;
    assert_eq!(done.json::<Value>().await.unwrap()["phase"], "showingResults");

    let results = client
        .get(format!("{}/api/v1/sessions/{}/results", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(results.status(), 200);
    let results = results.json::<Value>().await.unwrap();
    assert_eq!(results["score"], 2);
    assert_eq!(results["total"], 2);
    assert_eq!(results["percentage"], 100);
    assert!(results.get("passed").is_none());
    assert_eq!(results["questions"][1]["selectedText"], "Z");

    let restarted = post_action(&base, &client, id, "restart", None).await;
    let restarted = restarted.json::<Value>().await.unwrap();
    assert_eq!(restarted["phase"], "inProgress");
    assert_eq!(restarted["cursor"], 0);
    assert_eq!(restarted["ledger"], json!([null, null]));
}

#[tokio::test]
async fn practice_session_guards_and_errors() {
    let (base, client) = spawn_server().await;
    let id = create_session(
        &base,
        &client,
        json!({"bankId": "level3-module5-inspection", "section": "5.1"}),
    )
    .await;

    let early = post_action(&base, &client, id, "advance", None).await;
    assert_eq!(early.status(), 409);
    assert_eq!(early.json::<Value>().await.unwrap()["error"]["code"], "INVALID_STATE");

    post_action(&base, &client, id, "start", None).await;
    let skipped = post_action(&base, &client, id, "advance", None).await;
    assert_eq!(skipped.status(), 409);
    let body = skipped.json::<Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "ANSWER_REQUIRED");
    assert!(body["error"]["request_id"].as_str().is_some());

    let submit = post_action(&base, &client, id, "submit", None).await;
    assert_eq!(submit.status(), 409);
    assert_eq!(submit.json::<Value>().await.unwrap()["error"]["code"], "EXAM_ONLY");

    let out_of_range = post_action(&base, &client, id, "select", Some(json!({"optionIndex": 9}))).await;
    assert_eq!(out_of_range.status(), 400);

    let results = client
        .get(format!("{}/api/v1/sessions/{}/results", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(results.status(), 409);

    let deleted = client
        .delete(format!("{}/api/v1/sessions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    let gone = client
        .get(format!("{}/api/v1/sessions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn session_creation_validates_payload() {
    let (base, client) = spawn_server().await;
    let missing = client
        .post(format!("{}/api/v1/sessions", base))
        .json(&json!({"bankId": "no-such-bank"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let invalid = client
        .post(format!("{}/api/v1/sessions", base))
        .json(&json!({"bankId": "fire-safety-mock", "questionCount": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    let body = invalid.json::<Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"].as_array().unwrap().len(), 1);

    let empty = client
        .post(format!("{}/api/v1/sessions", base))
        .json(&json!({"bankId": "level3-module5-inspection", "section": "9.9"}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 422);
    let body: Value = empty.json().await.unwrap();
    assert_eq!(body["error"]["code"], "EMPTY_SELECTION");
}

#[tokio::test]
async fn exam_flow_flags_submit_and_review_filters() {
    let (base, client) = spawn_server().await;
    let id = create_session(
        &base,
        &client,
        json!({"bankId": "fire-safety-mock", "mode": "exam", "seed": 7}),
    )
    .await;

    let started = post_action(&base, &client, id, "start", None).await;
    let started = started.json::<Value>().await.unwrap();
    assert_eq!(started["total"], 10);
    let remaining = started["remainingSecs"].as_u64().unwrap();
    assert!(remaining > 1790 && remaining <= 1800);
    assert!(started.get("feedback").is_none());

    post_action(&base, &client, id, "select", Some(json!({"optionIndex": 0}))).await;
    post_action(&base, &client, id, "flag", None).await;
    let skipped = post_action(&base, &client, id, "advance", None).await;
    assert_eq!(skipped.status(), 200);
    assert_eq!(skipped.json::<Value>().await.unwrap()["cursor"], 1);

    post_action(&base, &client, id, "jump", Some(json!({"index": 5}))).await;
    let flagged = post_action(&base, &client, id, "flag", None).await;
    assert_eq!(flagged.json::<Value>().await.unwrap()["flagged"], json!([0, 5]));
    let wrapped = post_action(&base, &client, id, "next-flagged", None).await;
    assert_eq!(wrapped.json::<Value>().await.unwrap()["cursor"], 0);

    let bad_jump = post_action(&base, &client, id, "jump", Some(json!({"index": 10}))).await;
    assert_eq!(bad_jump.status(), 400);

    let submitted = post_action(&base, &client, id, "submit", None).await;
    let submitted = submitted.json::<Value>().await.unwrap();
    assert_eq!(submitted["phase"], "showingResults");
    assert_eq!(submitted["stats"]["answered"], 1);

    let unanswered = client
        .get(format!("{}/api/v1/sessions/{}/results?filter=unanswered", base, id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(unanswered["passThreshold"], 80);
    assert_eq!(unanswered["passed"], false);
    assert_eq!(
        unanswered["exitPath"],
        "/study-centre/general-upskilling/fire-safety-module-6"
    );
    let items = unanswered["questions"].as_array().unwrap();
    assert_eq!(items.len(), 9);
    assert!(items.iter().all(|q| q["selectedText"] == "Not answered"));

    let flagged = client
        .get(format!("{}/api/v1/sessions/{}/results?filter=flagged", base, id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    let positions: Vec<_> = flagged["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["position"].as_u64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 5]);
}

#[tokio::test]
async fn minor_works_form_auto_fills_derived_fields() {
    let (base, client) = spawn_server().await;
    let created = client
        .post(format!("{}/api/v1/forms", base))
        .json(&json!({"kind": "minor-works"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created = created.json::<Value>().await.unwrap();
    let form_id = created["formId"].as_i64().unwrap();
    assert_eq!(created["fields"]["supplyVoltage"], "230V");
    assert_eq!(created["isComplete"], false);

    let patch = |field: &str, value: Value| {
        client
            .patch(format!("{}/api/v1/forms/{}", base, form_id))
            .json(&json!({"field": field, "value": value}))
            .send()
    };

    let three = patch("supplyPhases", json!("3")).await.unwrap().json::<Value>().await.unwrap();
    assert_eq!(three["derived"]["supplyVoltage"], "400V");

    let single = patch("supplyPhases", json!("1")).await.unwrap().json::<Value>().await.unwrap();
    assert_eq!(single["derived"]["supplyVoltage"], "230V");
    assert_eq!(single["derived"]["phaseRotation"], "na");

    let earthing = patch("earthingArrangement", json!("TN-C-S")).await.unwrap().json::<Value>().await.unwrap();
    assert_eq!(earthing["fields"]["supplyPme"], "yes");

    patch("protectiveDeviceType", json!("MCB Type B")).await.unwrap();
    let rated = patch("protectiveDeviceRating", json!("32")).await.unwrap().json::<Value>().await.unwrap();
    assert_eq!(rated["derived"]["maxPermittedZs"], "1.37");

    let measured = patch("earthFaultLoopImpedance", json!("2.1")).await.unwrap().json::<Value>().await.unwrap();
    assert_eq!(measured["zsWithinLimit"], false);
    assert_eq!(measured["warnings"].as_array().unwrap().len(), 1);

    let wrong_type = patch("workSafety", json!("yes")).await.unwrap();
    assert_eq!(wrong_type.status(), 400);
    let unknown = patch("noSuchField", json!("x")).await.unwrap();
    assert_eq!(unknown.status(), 400);

    let fetched = client
        .get(format!("{}/api/v1/forms/{}", base, form_id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert!(fetched["completionPct"].as_u64().unwrap() > 0);
    assert!(fetched["missingRequired"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "clientName"));

    let deleted = client
        .delete(format!("{}/api/v1/forms/{}", base, form_id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
}

#[tokio::test]
async fn websocket_pushes_session_updates() {
    let (base, client) = spawn_server().await;
    let id = create_session(&base, &client, json!({"bankId": "two-step"})).await;

    let ws_url = base.replace("http://", "ws://");
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}/ws/sessions/{}", ws_url, id))
        .await
        .unwrap();

    let initial = next_event(&mut ws).await;
    assert_eq!(initial["event"], "session_update");
    assert_eq!(initial["payload"]["phase"], "notStarted");

    let started = post_action(&base, &client, id, "start", None).await;
    assert_eq!(started.status(), 200);
    let update = next_event(&mut ws).await;
    assert_eq!(update["event"], "session_update");
    assert_eq!(update["payload"]["phase"], "inProgress");

    ws.send(Message::Text(
        json!({"event": "request_view", "payload": {}, "request_id": "view-1"}).to_string(),
    ))
    .await
    .unwrap();
    let view = next_event(&mut ws).await;
    assert_eq!(view["request_id"], "view-1");
    assert_eq!(view["payload"]["cursor"], 0);

    client
        .delete(format!("{}/api/v1/sessions/{}", base, id))
        .send()
        .await
        .unwrap();
    let closed = next_event(&mut ws).await;
    assert_eq!(closed["event"], "session_closed");
}
