use std::time::Duration;

use action_relay::{
    clients::mattermost::MattermostClient,
    dispatcher::{Dispatcher, Notifier},
    error::{DispatchError, LookupError},
};
use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

const TOKEN: &str = "bot-token";

fn client(server: &MockServer) -> MattermostClient {
    MattermostClient::with_timeout(&server.uri(), TOKEN, Duration::from_secs(5)).unwrap()
}

async fn mount_user(server: &MockServer, email: &str, username: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v4/users/email/{}", email)))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": username })))
        .mount(server)
        .await;
}

/// Test: A single event with one resolved mention produces the expected post
#[tokio::test]
async fn test_posts_formatted_message_with_mention() -> Result<()> {
    let server = MockServer::start().await;
    mount_user(&server, "a@x.com", "alice").await;

    Mock::given(method("POST"))
        .and(path("/api/v4/posts"))
        .and(header("authorization", "Bearer bot-token"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "channel_id": "C1",
            "message": "New signup\n\nLink: [http://x/1](http://x/1)\n@alice "
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(client(&server), 1);
    dispatcher
        .dispatch("C1", "New signup", "http://x/1", &["a@x.com".to_string()])
        .await?;

    Ok(())
}

/// Test: A failed lookup drops only that mention and delivery still happens
#[tokio::test]
async fn test_failed_lookup_is_skipped() -> Result<()> {
    let server = MockServer::start().await;
    mount_user(&server, "a@x.com", "alice").await;
    mount_user(&server, "c@x.com", "carol").await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/b@x.com"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v4/posts"))
        .and(body_json(json!({
            "channel_id": "C1",
            "message": "m\n\nLink: [l](l)\n@alice @carol "
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let emails = vec![
        "a@x.com".to_string(),
        "b@x.com".to_string(),
        "c@x.com".to_string(),
    ];

    Dispatcher::new(client(&server), 1)
        .dispatch("C1", "m", "l", &emails)
        .await?;

    Ok(())
}

/// Test: An unparseable lookup body counts as a failed lookup
#[tokio::test]
async fn test_unreadable_lookup_body_is_skipped() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/a@x.com"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_username_by_email("a@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, LookupError::Body(_)));

    let mentions = Dispatcher::new(client(&server), 1)
        .resolve_mentions(&["a@x.com".to_string()])
        .await;
    assert!(mentions.is_empty());

    Ok(())
}

/// Test: Concurrent lookups still yield mentions in email order
#[tokio::test]
async fn test_concurrent_lookups_keep_order() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/slow@x.com"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "username": "slow" }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    mount_user(&server, "fast@x.com", "fast").await;
    mount_user(&server, "mid@x.com", "mid").await;

    let emails = vec![
        "slow@x.com".to_string(),
        "fast@x.com".to_string(),
        "mid@x.com".to_string(),
    ];

    let mentions = Dispatcher::new(client(&server), 3)
        .resolve_mentions(&emails)
        .await;

    assert_eq!(mentions, vec!["@slow", "@fast", "@mid"]);

    Ok(())
}

/// Test: Emails are percent-encoded as one path segment
#[tokio::test]
async fn test_lookup_encodes_email() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users/email/odd%2Fname%20x@x.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": "odd" })))
        .expect(1)
        .mount(&server)
        .await;

    let username = client(&server)
        .get_username_by_email("odd/name x@x.com")
        .await?;
    assert_eq!(username, "odd");

    Ok(())
}

/// Test: Any status other than 201 is a dispatch failure, returned not raised
#[tokio::test]
async fn test_non_created_status_is_dispatch_failure() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v4/posts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(client(&server), 1);
    let err = dispatcher.notify("C1", "m", "l", &[]).await.unwrap_err();

    assert!(matches!(err, DispatchError::Status(StatusCode::OK)));

    Ok(())
}

/// Test: An unreachable server is a transport failure
#[tokio::test]
async fn test_unreachable_server_is_transport_failure() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let uri = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let client = MattermostClient::with_timeout(&uri, TOKEN, Duration::from_secs(2))?;
    let err = client.create_post("C1", "m").await.unwrap_err();

    assert!(matches!(err, DispatchError::Transport(_)));

    Ok(())
}
