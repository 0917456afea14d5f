use super::*;

#[test]
fn submission_serializes_camel_case_user_id() {
    let submission = RelaySubmission {
        name: "Mia".into(),
        email: "mia@example.com".into(),
        subject: "Access".into(),
        message: "Cannot open file".into(),
        user_id: Uuid::nil(),
    };
    let json = serde_json::to_value(&submission).unwrap();
    assert_eq!(json["userId"], "00000000-0000-0000-0000-000000000000");
    assert_eq!(json["subject"], "Access");
    assert!(json.get("user_id").is_none());
}

#[tokio::test]
async fn spawn_submit_swallows_transport_failure() {
    let relay = FormRelay::new(reqwest::Client::new(), "http://127.0.0.1:9/relay".into());
    let handle = relay.spawn_submit(RelaySubmission {
        name: "n".into(),
        email: "e@example.com".into(),
        subject: "s".into(),
        message: "m".into(),
        user_id: Uuid::nil(),
    });
    // The task must finish without panicking even though the post fails.
    handle.await.unwrap();
}
