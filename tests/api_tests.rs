// tests/api_tests.rs
//
// End-to-end tests against a spawned server: guest confirmation round trip,
// follow-up notifications, listings, and like aggregation.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use threadline::config::Config;
use threadline::email::RecordingMailer;
use threadline::models::comment::PendingComment;
use threadline::notify::ConfirmationObserver;
use threadline::routes;
use threadline::state::AppState;
use threadline::utils::jwt::sign_identity;

struct TestApp {
    address: String,
    pool: SqlitePool,
    mailer: Arc<RecordingMailer>,
    secret_key: String,
    _dir: tempfile::TempDir,
}

/// Spawns the app on a random port with a recording mailer and a fresh
/// file-backed database. Threading is enabled up to level 2, matching the
/// original plugin's test settings.
async fn spawn_app_with_observers(observers: Vec<Arc<dyn ConfirmationObserver>>) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("comments.db");

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
        .unwrap()
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("Failed to open test database");

    threadline::MIGRATOR
        .run(&pool)
        .await
        .expect("Failed to migrate test database");

    // Bind first so the site URL (used in emailed links) carries the port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let config = Config {
        database_url: format!("sqlite://{}", db_path.display()),
        secret_key: "test_secret_for_integration_tests".to_string(),
        site_url: address.clone(),
        port,
        rust_log: "error".to_string(),
        allowed_origins: vec![],
        max_thread_level: 2,
        max_thread_level_by_app_model: HashMap::from([("gallery.picture".to_string(), 0)]),
        confirmation_ttl_hours: 72,
        smtp: None,
    };

    let mailer = Arc::new(RecordingMailer::new());
    let mut state = AppState::with_mailer(pool.clone(), config.clone(), mailer.clone());
    for observer in observers {
        state = state.with_observer(observer);
    }

    let app = routes::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        pool,
        mailer,
        secret_key: config.secret_key,
        _dir: dir,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_observers(vec![]).await
}

impl TestApp {
    fn identity_token(&self, id: i64, name: &str, email: &str) -> String {
        sign_identity(id, name, email, &self.secret_key, 600).unwrap()
    }

    fn comment_payload(&self, name: &str, email: &str) -> serde_json::Value {
        serde_json::json!({
            "content_type": "tests.article",
            "object_pk": "1",
            "page_url": format!("{}/article/1/", self.address),
            "name": name,
            "email": email,
            "comment": "Es war einmal eine kleine...",
            "followup": true,
            "reply_to": 0
        })
    }

    async fn comment_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// Extracts the signed key from the confirmation link in an email body.
    fn confirm_key(&self, body: &str) -> String {
        Regex::new(r"http://\S+/confirm/(\S+)")
            .unwrap()
            .captures(body)
            .expect("No confirmation link in email")[1]
            .to_string()
    }

    fn mute_key(&self, body: &str) -> String {
        Regex::new(r"http://\S+/mute/(\S+)")
            .unwrap()
            .captures(body)
            .expect("No mute link in email")[1]
            .to_string()
    }
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn authenticated_post_is_published_without_confirmation() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(42, "Bob", "bob@example.com");

    let response = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&app.comment_payload("ignored", "ignored@example.com"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user_name"], "Bob");
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["level"], 0);
    assert_eq!(body["order"], 1);
    assert!(body.get("user_email").is_none(), "email must not be exposed");

    // No confirmation email for authenticated users.
    assert_eq!(app.mailer.outbox().len(), 0);
    assert_eq!(app.comment_count().await, 1);
}

#[tokio::test]
async fn guest_post_sends_confirmation_and_persists_nothing() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");

    let outbox = app.mailer.outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].to, "bob@example.com");
    assert!(outbox[0].body.contains("/api/confirm/"));

    assert_eq!(app.comment_count().await, 0);
}

#[tokio::test]
async fn guest_post_requires_name_and_email() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let mut payload = app.comment_payload("Bob", "bob@example.com");
    payload.as_object_mut().unwrap().remove("email");

    let response = client
        .post(format!("{}/api/comments", app.address))
        .json(&payload)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn tampered_confirmation_key_is_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap();

    let key = app.confirm_key(&app.mailer.outbox()[0].body);
    let truncated = &key[..key.len() - 1];

    let response = client
        .get(format!("{}/api/confirm/{}", app.address, truncated))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(app.comment_count().await, 0);
}

#[tokio::test]
async fn confirmation_creates_comment_and_redirects_to_page() {
    let app = spawn_app().await;
    let client = no_redirect_client();

    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap();

    let key = app.confirm_key(&app.mailer.outbox()[0].body);

    let response = client
        .get(format!("{}/api/confirm/{}", app.address, key))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/article/1/#c", app.address)));
    assert_eq!(app.comment_count().await, 1);
}

#[tokio::test]
async fn consecutive_confirmation_visits_fail() {
    let app = spawn_app().await;
    let client = no_redirect_client();

    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap();

    let key = app.confirm_key(&app.mailer.outbox()[0].body);
    let url = format!("{}/api/confirm/{}", app.address, key);

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 303);

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status().as_u16(), 404);
    assert_eq!(app.comment_count().await, 1);
}

struct RejectAll;

#[async_trait]
impl ConfirmationObserver for RejectAll {
    async fn confirmation_received(&self, _comment: &PendingComment) -> bool {
        false
    }
}

#[tokio::test]
async fn observer_may_discard_the_comment() {
    let app = spawn_app_with_observers(vec![Arc::new(RejectAll)]).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap();

    let key = app.confirm_key(&app.mailer.outbox()[0].body);

    let response = client
        .get(format!("{}/api/confirm/{}", app.address, key))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "discarded");
    assert_eq!(app.comment_count().await, 0);
}

#[tokio::test]
async fn followers_are_notified_and_can_mute() {
    let app = spawn_app().await;
    let client = no_redirect_client();

    // Bob comments with followup=true and confirms.
    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap();
    let key = app.confirm_key(&app.mailer.outbox()[0].body);
    client
        .get(format!("{}/api/confirm/{}", app.address, key))
        .send()
        .await
        .unwrap();

    // No followers yet, so still just Bob's confirmation email.
    assert_eq!(app.mailer.outbox().len(), 1);

    // Alice comments on the same article and confirms.
    client
        .post(format!("{}/api/comments", app.address))
        .json(&app.comment_payload("Alice", "alice@example.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(app.mailer.outbox().len(), 2);
    let key = app.confirm_key(&app.mailer.outbox()[1].body);
    client
        .get(format!("{}/api/confirm/{}", app.address, key))
        .send()
        .await
        .unwrap();

    // Bob follows the conversation; Alice must not be notified about her
    // own comment.
    let outbox = app.mailer.outbox();
    assert_eq!(outbox.len(), 3);
    assert_eq!(outbox[2].to, "bob@example.com");
    assert!(
        outbox[2]
            .body
            .contains("There is a new comment following up yours.")
    );

    // Bob mutes the conversation via the emailed link.
    let mute_key = app.mute_key(&outbox[2].body);
    let response = client
        .get(format!("{}/api/mute/{}", app.address, mute_key))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["muted"], 1);

    // Re-clicking the link is harmless.
    let response = client
        .get(format!("{}/api/mute/{}", app.address, mute_key))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["muted"], 0);
}

#[tokio::test]
async fn reply_endpoint_404s_on_unknown_comment() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/comments/1/reply", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn reply_endpoint_signals_the_depth_ceiling() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(1, "Bob", "bob@example.com");

    // Build a chain down to the configured maximum (level 2).
    let mut parent_id = 0;
    for _ in 0..3 {
        let mut payload = app.comment_payload("Bob", "bob@example.com");
        payload["reply_to"] = serde_json::json!(parent_id);
        let response = client
            .post(format!("{}/api/comments", app.address))
            .header("Authorization", format!("Bearer {}", token))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        parent_id = body["id"].as_i64().unwrap();
    }

    // The level-1 comment still accepts replies.
    let response = client
        .get(format!("{}/api/comments/2/reply", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reply_level"], 2);
    assert_eq!(body["max_thread_level"], 2);

    // The level-2 comment is at the ceiling.
    let response = client
        .get(format!("{}/api/comments/{}/reply", app.address, parent_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["max_thread_level"], 2);

    // Posting past the ceiling is refused the same way.
    let mut payload = app.comment_payload("Bob", "bob@example.com");
    payload["reply_to"] = serde_json::json!(parent_id);
    let response = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn threading_disabled_content_type_rejects_replies() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(1, "Bob", "bob@example.com");

    let mut payload = app.comment_payload("Bob", "bob@example.com");
    payload["content_type"] = serde_json::json!("gallery.picture");
    let response = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let root: serde_json::Value = response.json().await.unwrap();

    let mut payload = app.comment_payload("Bob", "bob@example.com");
    payload["content_type"] = serde_json::json!("gallery.picture");
    payload["reply_to"] = root["id"].clone();
    let response = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["max_thread_level"], 0);
}

#[tokio::test]
async fn object_listing_is_in_thread_and_order_sequence() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(1, "Bob", "bob@example.com");

    // Root A, root B, then a reply to root A: the reply must render with
    // thread A, before root B.
    let mut ids = Vec::new();
    for reply_to in [0, 0] {
        let mut payload = app.comment_payload("Bob", "bob@example.com");
        payload["reply_to"] = serde_json::json!(reply_to);
        let body: serde_json::Value = client
            .post(format!("{}/api/comments", app.address))
            .header("Authorization", format!("Bearer {}", token))
            .json(&payload)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(body["id"].as_i64().unwrap());
    }
    let mut payload = app.comment_payload("Bob", "bob@example.com");
    payload["reply_to"] = serde_json::json!(ids[0]);
    let reply: serde_json::Value = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let listed: Vec<serde_json::Value> = client
        .get(format!(
            "{}/api/objects/tests.article/1/comments",
            app.address
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let listed_ids: Vec<i64> = listed.iter().map(|c| c["id"].as_i64().unwrap()).collect();
    assert_eq!(
        listed_ids,
        vec![ids[0], reply["id"].as_i64().unwrap(), ids[1]]
    );
}

#[tokio::test]
async fn latest_comments_honors_the_app_model_filter() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(1, "Bob", "bob@example.com");

    for content_type in ["tests.article", "tests.article", "gallery.picture"] {
        let mut payload = app.comment_payload("Bob", "bob@example.com");
        payload["content_type"] = serde_json::json!(content_type);
        client
            .post(format!("{}/api/comments", app.address))
            .header("Authorization", format!("Bearer {}", token))
            .json(&payload)
            .send()
            .await
            .unwrap();
    }

    let listed: Vec<serde_json::Value> = client
        .get(format!(
            "{}/api/comments/latest?app_models=tests.article&count=5",
            app.address
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(listed.len(), 2);
    assert!(
        listed
            .iter()
            .all(|c| c["content_type"] == "tests.article")
    );
}

#[tokio::test]
async fn like_toggle_updates_counts_and_cached_dictionary() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let token = app.identity_token(1, "Bob", "bob@example.com");

    let comment: serde_json::Value = client
        .post(format!("{}/api/comments", app.address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&app.comment_payload("Bob", "bob@example.com"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let comment_id = comment["id"].as_i64().unwrap();

    // Liking requires an identity token.
    let response = client
        .post(format!("{}/api/comments/{}/like", app.address, comment_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // Warm the cache before liking.
    let likes_url = format!("{}/api/objects/tests.article/1/likes", app.address);
    let summary: serde_json::Value = client.get(&likes_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(summary["total"], 0);

    let body: serde_json::Value = client
        .post(format!("{}/api/comments/{}/like", app.address, comment_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["liked"], true);
    assert_eq!(body["likes_count"], 1);

    // The toggle invalidated the cached dictionary.
    let summary: serde_json::Value = client.get(&likes_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["likes"][comment_id.to_string()], 1);

    // Toggling again unlikes.
    let body: serde_json::Value = client
        .post(format!("{}/api/comments/{}/like", app.address, comment_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["liked"], false);
    assert_eq!(body["likes_count"], 0);
}
