use app_auth_server::auth::key_manager::{KeyManager, KeyStore, MemoryKeyStore, StoredKey};
use app_auth_server::auth::password::hash_password_with_cost;
use app_auth_server::config::StorageBackend;
use app_auth_server::infra::connection_manager::ChannelConnection;
use app_auth_server::{AuthServer, HttpServerState, ServerConfig, Stores};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

const MASTER_PASSWORD: &str = "correct";
const ADMIN_PASSWORD: &str = "admin-pass";
const WEBHOOK_SECRET: &str = "test-secret";

/// 整个测试进程共用一把 RSA 密钥，在独立线程的运行时中生成
static STORED_KEY: OnceLock<StoredKey> = OnceLock::new();

async fn shared_key_store() -> Arc<MemoryKeyStore> {
    let stored = STORED_KEY
        .get_or_init(|| {
            std::thread::spawn(|| {
                let runtime = tokio::runtime::Runtime::new().unwrap();
                runtime.block_on(async {
                    let store = Arc::new(MemoryKeyStore::new());
                    KeyManager::new(store.clone()).load_or_create().await.unwrap();
                    store.load_oldest().await.unwrap().unwrap()
                })
            })
            .join()
            .unwrap()
        })
        .clone();

    let store = Arc::new(MemoryKeyStore::new());
    store.insert(&stored).await.unwrap();
    store
}

struct TestApp {
    router: Router,
    state: HttpServerState,
}

async fn test_app(allow_new_device_login: bool) -> TestApp {
    test_app_with(allow_new_device_login, |_| {}).await
}

async fn test_app_with(
    allow_new_device_login: bool,
    customize: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let mut config = ServerConfig::default();
    config.storage_backend = StorageBackend::Memory;
    config.auth.bcrypt_cost = 4;
    config.auth.allow_new_device_login = allow_new_device_login;
    config.auth.master_password_bcrypt = Some(hash_password_with_cost(MASTER_PASSWORD, 4).unwrap());
    config.admin.password_bcrypt = Some(hash_password_with_cost(ADMIN_PASSWORD, 4).unwrap());
    config.internal.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    customize(&mut config);

    let mut stores = Stores::memory(config.auth.bcrypt_cost);
    stores.keys = shared_key_store().await;

    let server = AuthServer::with_stores(config, stores, None).await.unwrap();
    TestApp {
        router: server.router(),
        state: server.state(),
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn login(&self, device_name: &str) -> Value {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                json!({ "masterPassword": MASTER_PASSWORD, "deviceName": device_name }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    /// 管理员登录，返回 `ADMIN_SESSION=...` Cookie
    async fn admin_cookie(&self) -> String {
        let response = self
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/admin/api/session/login",
                json!({ "username": "admin", "password": ADMIN_PASSWORD }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Max-Age=28800"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn subscribe(&self) -> mpsc::Receiver<String> {
        let (connection, rx) = ChannelConnection::new(32);
        self.state.push.connections().register(
            Uuid::new_v4(),
            Arc::new(connection),
            app_auth_server::auth::AppPrincipal {
                username: "app".to_string(),
                device_id: Uuid::new_v4(),
                issued_at: Utc::now(),
            },
        );
        rx
    }

    fn chat_event_request(&self, body: &str, timestamp: i64) -> Request<Body> {
        let signature = self.state.internal_events.sign(timestamp, body).unwrap();
        Request::builder()
            .method(Method::POST)
            .uri("/api/app/internal/chat-events")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-App-Timestamp", timestamp.to_string())
            .header("X-App-Signature", signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn bearer_request(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn cookie_request(method: Method, uri: &str, cookie: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn drain_events(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(text) = rx.try_recv() {
        events.push(serde_json::from_str(&text).unwrap());
    }
    events
}

#[tokio::test]
async fn test_login_me_revoke_flow() {
    let app = test_app(true).await;

    let login = app.login("Pixel").await;
    assert_eq!(login["username"], "app");
    assert_eq!(login["deviceName"], "Pixel");
    assert!(login["deviceToken"].as_str().unwrap().len() >= 43);
    let token = login["accessToken"].as_str().unwrap().to_string();
    let device_id = login["deviceId"].as_str().unwrap().to_string();

    let (status, me) = app.send(bearer_request(Method::GET, "/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["deviceId"], device_id.as_str());
    assert_eq!(me["username"], "app");

    let (status, devices) = app
        .send(bearer_request(Method::GET, "/api/auth/devices", &token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices[0]["current"], true);
    assert_eq!(devices[0]["status"], "ACTIVE");

    let (status, _) = app
        .send(bearer_request(
            Method::DELETE,
            &format!("/api/auth/devices/{}", device_id),
            &token,
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.send(bearer_request(Method::GET, "/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rejections() {
    let app = test_app(true).await;

    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "masterPassword": "wrong" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid credentials");

    let (status, _) = app
        .send(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "masterPassword": MASTER_PASSWORD, "accessTtlSeconds": 0 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(bearer_request(Method::GET, "/api/auth/me", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let gated = test_app(false).await;
    let (status, _) = gated
        .send(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "masterPassword": MASTER_PASSWORD }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_refresh_rotates_device_token() {
    let app = test_app(true).await;
    let login = app.login("Laptop").await;
    let first_token = login["deviceToken"].as_str().unwrap().to_string();

    let (status, refreshed) = app
        .send(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "deviceToken": first_token, "accessTtlSeconds": 120 }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = refreshed["deviceToken"].as_str().unwrap();
    assert_ne!(rotated, first_token);
    assert_eq!(refreshed["deviceId"], login["deviceId"]);

    // 旧令牌已失效
    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "deviceToken": first_token }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid device token");
}

#[tokio::test]
async fn test_public_jwks_and_health() {
    let app = test_app(true).await;

    let (status, jwks) = app
        .send(Request::get("/.well-known/jwks.json").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    let key = &jwks["keys"][0];
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["alg"], "RS256");
    assert_eq!(key["use"], "sig");
    assert!(key["kid"].as_str().is_some());

    let (status, health) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let (status, access) = app
        .send(Request::get("/api/auth/new-device-access").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(access["allowNewDeviceLogin"], true);
}

#[tokio::test]
async fn test_chat_event_dedup_broadcasts_once() {
    let app = test_app(true).await;
    let mut rx = app.subscribe();
    let body = json!({ "chatId": "c1", "runId": "r1", "chatName": "General" }).to_string();
    let now = Utc::now().timestamp();

    let (status, ack) = app.send(app.chat_event_request(&body, now)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "accepted": true, "duplicate": false }));

    let (status, ack) = app.send(app.chat_event_request(&body, now)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "accepted": true, "duplicate": true }));

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "chat.new_content");
    assert_eq!(events[0]["payload"]["chatId"], "c1");
    assert_eq!(events[0]["payload"]["chatName"], "General");
    assert_eq!(events[0]["payload"]["refreshHints"]["refreshChats"], true);
    assert!(events[0]["payload"]["updatedAt"].as_i64().unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chat_events_single_broadcast() {
    let app = test_app(true).await;
    let mut rx = app.subscribe();
    let body = json!({ "chatId": "c2", "runId": "r2" }).to_string();
    let now = Utc::now().timestamp();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let router = app.router.clone();
        let request = app.chat_event_request(&body, now);
        handles.push(tokio::spawn(async move {
            let response = router.oneshot(request).await.unwrap();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            serde_json::from_slice::<Value>(&bytes).unwrap()
        }));
    }

    let mut firsts = 0;
    for handle in handles {
        if handle.await.unwrap()["duplicate"] == false {
            firsts += 1;
        }
    }
    assert_eq!(firsts, 1);
    assert_eq!(drain_events(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_chat_event_signature_failures_are_unauthorized() {
    let app = test_app(true).await;
    let body = json!({ "chatId": "c3", "runId": "r3" }).to_string();

    // 签名过期
    let stale = Utc::now().timestamp() - 301;
    let (status, _) = app.send(app.chat_event_request(&body, stale)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 缺少签名头
    let (status, body_json) = app
        .send(json_request(
            Method::POST,
            "/api/app/internal/chat-events",
            json!({ "chatId": "c3", "runId": "r3" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body_json["message"], "unauthorized");

    // 签名正确但 body 不是合法事件
    let (status, _) = app
        .send(app.chat_event_request("not json", Utc::now().timestamp()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_event_without_webhook_secret_is_server_error() {
    let app = test_app_with(true, |config| config.internal.webhook_secret = None).await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/app/internal/chat-events")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-App-Timestamp", Utc::now().timestamp().to_string())
        .header("X-App-Signature", "ab")
        .body(Body::from(json!({ "chatId": "c4", "runId": "r4" }).to_string()))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(body["message"], "unauthorized");
}

#[tokio::test]
async fn test_admin_session_and_inbox_flow() {
    let app = test_app(true).await;
    let mut rx = app.subscribe();

    let (status, _) = app
        .send(Request::get("/admin/api/session/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = app.admin_cookie().await;
    let (status, me) = app
        .send(cookie_request(Method::GET, "/admin/api/session/me", &cookie, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "admin");

    let (status, message) = app
        .send(cookie_request(
            Method::POST,
            "/admin/api/inbox/send",
            &cookie,
            Some(json!({ "title": "Hello", "content": "World", "type": "warn" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["sender"], "ADMIN");
    assert_eq!(message["type"], "WARN");
    assert_eq!(message["read"], false);

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "inbox.new");
    assert_eq!(events[0]["payload"]["unreadCount"], 1);
    assert_eq!(events[1]["type"], "inbox.sync");

    // App 端读取并标记已读
    let login = app.login("Tablet").await;
    let token = login["accessToken"].as_str().unwrap();
    let (status, inbox) = app
        .send(bearer_request(Method::GET, "/api/app/inbox?unreadOnly=true", token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/app/inbox/read")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "messageIds": [message["messageId"]] }).to_string(),
        ))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, count) = app
        .send(bearer_request(Method::GET, "/api/app/inbox/unread-count", token))
        .await;
    assert_eq!(count["unreadCount"], 0);
    let sync = drain_events(&mut rx);
    assert_eq!(sync.last().unwrap()["type"], "inbox.sync");
    assert_eq!(sync.last().unwrap()["payload"]["unreadCount"], 0);

    let (status, _) = app
        .send(cookie_request(Method::POST, "/admin/api/session/logout", &cookie, None))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .send(cookie_request(Method::GET, "/admin/api/session/me", &cookie, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_security_surface() {
    let app = test_app(false).await;
    let cookie = app.admin_cookie().await;

    // 开关关闭时 App 登录被拒，管理员打开后放行
    let (status, _) = app
        .send(cookie_request(
            Method::PUT,
            "/admin/api/security/new-device-access",
            &cookie,
            Some(json!({ "allowNewDeviceLogin": true })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, issued) = app
        .send(cookie_request(
            Method::POST,
            "/admin/api/security/app-tokens/issue",
            &cookie,
            Some(json!({ "masterPassword": MASTER_PASSWORD, "deviceName": "CLI" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let device_id = issued["deviceId"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(cookie_request(
            Method::POST,
            &format!("/admin/api/security/app-devices/{}/revoke", device_id),
            &cookie,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, tokens) = app
        .send(cookie_request(
            Method::GET,
            "/admin/api/security/tokens?sources=app_access&status=revoked",
            &cookie,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let tokens = tokens.as_array().unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0]["status"], "REVOKED");

    let (status, _) = app
        .send(cookie_request(
            Method::GET,
            "/admin/api/security/tokens?status=bogus",
            &cookie,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, jwks) = app
        .send(cookie_request(Method::GET, "/admin/api/security/jwks", &cookie, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let key = &jwks["jwks"]["keys"][0];

    let (status, pem) = app
        .send(cookie_request(
            Method::POST,
            "/admin/api/security/public-key/generate",
            &cookie,
            Some(json!({ "e": key["e"], "n": key["n"] })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(pem["publicKeyPem"]
        .as_str()
        .unwrap()
        .starts_with("-----BEGIN PUBLIC KEY-----"));

    let (status, _) = app
        .send(cookie_request(
            Method::POST,
            "/admin/api/security/public-key/generate",
            &cookie,
            Some(json!({ "e": "", "n": "AQAB" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, hashed) = app
        .send(cookie_request(
            Method::POST,
            "/admin/api/bcrypt/generate",
            &cookie,
            Some(json!({ "password": "pw" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(bcrypt::verify("pw", hashed["bcrypt"].as_str().unwrap()).unwrap());
}

#[tokio::test]
async fn test_websocket_requires_access_token() {
    let app = test_app(true).await;

    let (status, _) = app
        .send(Request::get("/api/app/ws").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            Request::get("/api/app/ws?access_token=not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 令牌有效但不是 WebSocket 握手，认证通过后由升级提取器拒绝
    let login = app.login("Browser").await;
    let token = login["accessToken"].as_str().unwrap();
    let (status, _) = app
        .send(
            Request::get(format!("/api/app/ws?access_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_ne!(status, StatusCode::UNAUTHORIZED);
    assert!(status.is_client_error());
}
