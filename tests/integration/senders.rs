//! Channel senders against a mock HTTP server

use alerting_engine::models::{EmailFields, NoticeKind, Severity};
use alerting_engine::senders::{
    CustomHookSender, DingDingSender, FeiShuSender, SendError, SendParams, Sender, SlackSender,
    WeChatSender,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params(kind: NoticeKind, hook: String, content: Value) -> SendParams {
    SendParams {
        tenant_id: "default".to_string(),
        event_id: "fp-1".to_string(),
        rule_name: "high cpu".to_string(),
        severity: Severity::P1,
        notice_kind: kind,
        notice_id: "n-1".to_string(),
        notice_name: "ops".to_string(),
        is_recovered: false,
        hook,
        email: EmailFields::default(),
        content: content.to_string(),
        phone_numbers: Vec::new(),
        sign: String::new(),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn custom_hook_posts_the_content() {
    let mock_server = MockServer::start().await;
    let content = json!({ "fingerprint": "fp-1", "status": "firing" });

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(&content))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let hook = format!("{}/hook", mock_server.uri());
    CustomHookSender::new(client())
        .send(&params(NoticeKind::CustomHook, hook, content))
        .await
        .unwrap();
}

#[tokio::test]
async fn server_errors_surface_as_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let hook = format!("{}/slack", mock_server.uri());
    let err = SlackSender::new(client())
        .send(&params(NoticeKind::Slack, hook, json!({ "text": "hi" })))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Status { status: 500, ref body } if body == "boom"));
}

#[tokio::test]
async fn wechat_errcode_is_a_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "errcode": 93000, "errmsg": "invalid webhook url" })),
        )
        .mount(&mock_server)
        .await;

    let err = WeChatSender::new(client())
        .send(&params(
            NoticeKind::WeChat,
            mock_server.uri(),
            json!({ "msgtype": "markdown" }),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Rejected(message) if message.contains("93000")));
}

#[tokio::test]
async fn dingding_signs_the_url() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errcode": 0 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut params = params(
        NoticeKind::DingDing,
        format!("{}/robot/send?access_token=abc", mock_server.uri()),
        json!({ "msgtype": "markdown" }),
    );
    params.sign = "SEC123".to_string();
    DingDingSender::new(client()).send(&params).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let query = requests[0].url.query().unwrap_or_default().to_string();
    assert!(query.contains("access_token=abc"));
    assert!(query.contains("timestamp="));
    assert!(query.contains("sign="));
}

#[tokio::test]
async fn feishu_signs_the_body_and_checks_the_code() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "code": 19021, "msg": "sign match fail" })),
        )
        .mount(&mock_server)
        .await;

    let mut params = params(
        NoticeKind::FeiShu,
        mock_server.uri(),
        json!({ "msg_type": "interactive" }),
    );
    params.sign = "secret".to_string();
    let err = FeiShuSender::new(client()).send(&params).await.unwrap_err();
    assert!(matches!(err, SendError::Rejected(message) if message.contains("19021")));

    let requests = mock_server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["msg_type"], "interactive");
    assert!(body["sign"].as_str().is_some_and(|sign| !sign.is_empty()));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn empty_hook_is_a_missing_field() {
    let err = CustomHookSender::new(client())
        .send(&params(NoticeKind::CustomHook, String::new(), json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::MissingField("hook url")));
}
