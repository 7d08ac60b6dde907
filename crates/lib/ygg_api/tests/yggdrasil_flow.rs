//! End-to-end tests driving the router over in-memory backends.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;
use ygg_api::config::ApiConfig;
use ygg_api::{AppState, router};
use ygg_core::auth::engine::AuthEngine;
use ygg_core::auth::jwt::TokenSigner;
use ygg_core::auth::password::{CredentialVerifier, PasswordAlgorithm};
use ygg_core::clock::ManualClock;
use ygg_core::identity::store::MemoryUuidStore;
use ygg_core::identity::{IdentityDeriver, UuidMode, offline_uuid};
use ygg_core::profiles::memory::MemoryProfiles;
use ygg_core::session::{SessionEngine, SessionSettings};
use ygg_core::signing::{KeySource, SigningService};
use ygg_core::store::memory::{MemorySessionStore, MemoryTokenStore};

const SIGNING_KEY: &str = include_str!("../../ygg_core/testdata/signing_key.pem");
const SITE_URL: &str = "https://skins.example";

struct TestApp {
    router: Router,
    clock: ManualClock,
}

async fn app() -> TestApp {
    app_with(ApiConfig::new("Test Ygg", SITE_URL)).await
}

async fn app_with(config: ApiConfig) -> TestApp {
    let clock = ManualClock::default();
    let signer = Arc::new(TokenSigner::new(b"integration-secret", Duration::days(3)));
    let deriver = Arc::new(IdentityDeriver::new(
        UuidMode::Offline,
        Arc::new(MemoryUuidStore::new()),
    ));
    let profiles = Arc::new(MemoryProfiles::new(
        CredentialVerifier::new(PasswordAlgorithm::Sha256, ""),
        deriver,
    ));
    let steve = profiles.add_user("steve@example.com", "secret").await.unwrap();
    profiles.add_profile(&steve.id, "Steve").await.unwrap();
    let multi = profiles.add_user("multi@example.com", "secret").await.unwrap();
    profiles.add_profile(&multi.id, "Alpha").await.unwrap();
    profiles.add_profile(&multi.id, "Bravo").await.unwrap();

    let tokens = Arc::new(MemoryTokenStore::new(signer.clone(), Arc::new(clock.clone())));
    let sessions = Arc::new(MemorySessionStore::new(Arc::new(clock.clone())));
    let signing = Arc::new(SigningService::new(KeySource::Pem(SIGNING_KEY.into())));

    let auth = AuthEngine::new(
        profiles.clone(),
        tokens.clone(),
        signer,
        Arc::new(clock.clone()),
    );
    let session = SessionEngine::new(
        tokens,
        sessions,
        profiles,
        signing.clone(),
        Arc::new(clock.clone()),
        SessionSettings {
            site_url: SITE_URL.into(),
            bulk_limit: 3,
        },
    );

    let state = AppState {
        auth: Arc::new(auth),
        sessions: Arc::new(session),
        signing,
        config,
    };
    TestApp {
        router: router(state),
        clock,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn login(&self, username: &str) -> Value {
        let (status, body) = self
            .post(
                "/authserver/authenticate",
                json!({"username": username, "password": "secret", "requestUser": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn steve_id() -> String {
    offline_uuid("Steve").simple().to_string()
}

#[tokio::test]
async fn authenticate_join_has_joined() {
    let app = app().await;
    let auth = app.login("steve@example.com").await;
    assert_eq!(auth["selectedProfile"]["name"], "Steve");
    assert_eq!(auth["selectedProfile"]["id"], steve_id());
    assert_eq!(auth["availableProfiles"].as_array().unwrap().len(), 1);
    assert!(auth["user"]["id"].is_string());
    assert!(auth["user"]["properties"].as_array().unwrap().is_empty());

    let (status, _) = app
        .post(
            "/sessionserver/session/minecraft/join",
            json!({
                "accessToken": auth["accessToken"],
                "selectedProfile": steve_id(),
                "serverId": "abc",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, profile) = app
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=abc")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], steve_id());
    assert_eq!(profile["name"], "Steve");
    let properties = profile["properties"].as_array().unwrap();
    assert!(properties.iter().all(|p| p["signature"].is_string()));

    let (status, body) = app
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=abc")
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
}

/// A join arriving from `peer` that claims to be forwarded for `forwarded`.
fn forwarded_join(auth: &Value, server_id: &str, peer: [u8; 4], forwarded: &str) -> Request<Body> {
    let body = json!({
        "accessToken": auth["accessToken"],
        "selectedProfile": steve_id(),
        "serverId": server_id,
    });
    Request::post("/sessionserver/session/minecraft/join")
        .header("content-type", "application/json")
        .header("X-Forwarded-For", forwarded)
        .extension(ConnectInfo(SocketAddr::from((peer, 40000))))
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn forwarded_addresses_need_a_trusted_proxy() {
    let direct = app().await;
    let auth = direct.login("Steve").await;
    let (status, _) = direct
        .send(forwarded_join(&auth, "direct", [192, 0, 2, 9], "203.0.113.7"))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = direct
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=direct&ip=203.0.113.7")
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = direct
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=direct&ip=192.0.2.9")
        .await;
    assert_eq!(status, StatusCode::OK);

    let proxied = app_with(ApiConfig::new("Test Ygg", SITE_URL).with_trusted_proxy_headers(true)).await;
    let auth = proxied.login("Steve").await;
    let (status, _) = proxied
        .send(forwarded_join(&auth, "proxied", [10, 0, 0, 1], "203.0.113.7"))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = proxied
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=proxied&ip=203.0.113.7")
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn session_expires_before_has_joined() {
    let app = app().await;
    let auth = app.login("Steve").await;
    let (status, _) = app
        .post(
            "/sessionserver/session/minecraft/join",
            json!({
                "accessToken": auth["accessToken"],
                "selectedProfile": steve_id(),
                "serverId": "late",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.clock.advance(Duration::seconds(31));
    let (status, _) = app
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve&serverId=late")
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bad_credentials_are_forbidden() {
    let app = app().await;
    let (status, body) = app
        .post(
            "/authserver/authenticate",
            json!({"username": "steve@example.com", "password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "ForbiddenOperationException");
    assert_eq!(
        body["errorMessage"],
        "Invalid credentials. Invalid username or password."
    );
}

#[tokio::test]
async fn validate_refresh_invalidate_lifecycle() {
    let app = app().await;
    let auth = app.login("Steve").await;
    let access = auth["accessToken"].clone();
    let client = auth["clientToken"].clone();

    let (status, _) = app
        .post(
            "/authserver/validate",
            json!({"accessToken": access, "clientToken": client}),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .post(
            "/authserver/validate",
            json!({"accessToken": access, "clientToken": "someone-else"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, refreshed) = app
        .post(
            "/authserver/refresh",
            json!({"accessToken": access, "clientToken": client}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["clientToken"], client);
    assert_eq!(refreshed["selectedProfile"]["name"], "Steve");
    assert!(refreshed.get("availableProfiles").is_none());
    assert!(refreshed.get("user").is_none());
    assert_ne!(refreshed["accessToken"], access);

    let (status, body) = app
        .post("/authserver/validate", json!({"accessToken": access}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorMessage"], "Invalid token.");

    let fresh = refreshed["accessToken"].clone();
    for _ in 0..2 {
        let (status, _) = app
            .post("/authserver/invalidate", json!({"accessToken": fresh}))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (status, _) = app
        .post("/authserver/validate", json!({"accessToken": fresh}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refresh_binds_a_profile_once() {
    let app = app().await;
    let auth = app.login("multi@example.com").await;
    assert!(auth.get("selectedProfile").is_none());
    assert_eq!(auth["availableProfiles"].as_array().unwrap().len(), 2);

    let alpha = offline_uuid("Alpha").simple().to_string();
    let (status, refreshed) = app
        .post(
            "/authserver/refresh",
            json!({
                "accessToken": auth["accessToken"],
                "selectedProfile": {"id": alpha, "name": "Alpha"},
                "requestUser": true,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["selectedProfile"]["name"], "Alpha");
    assert!(refreshed["user"]["id"].is_string());

    let (status, body) = app
        .post(
            "/authserver/refresh",
            json!({
                "accessToken": refreshed["accessToken"],
                "selectedProfile": {"id": alpha, "name": "Alpha"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IllegalArgumentException");
}

#[tokio::test]
async fn join_with_unbound_profile_is_forbidden() {
    let app = app().await;
    let auth = app.login("Steve").await;
    let (status, body) = app
        .post(
            "/sessionserver/session/minecraft/join",
            json!({
                "accessToken": auth["accessToken"],
                "selectedProfile": offline_uuid("Alpha").simple().to_string(),
                "serverId": "abc",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorMessage"], "Invalid token.");
}

#[tokio::test]
async fn signout_revokes_every_token() {
    let app = app().await;
    let first = app.login("Steve").await;
    let second = app.login("Steve").await;

    let (status, _) = app
        .post(
            "/authserver/signout",
            json!({"username": "Steve", "password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/authserver/signout",
            json!({"username": "Steve", "password": "secret"}),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for auth in [first, second] {
        let (status, _) = app
            .post(
                "/authserver/validate",
                json!({"accessToken": auth["accessToken"]}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn profile_by_uuid_signs_only_on_request() {
    let app = app().await;
    let uri = format!("/sessionserver/session/minecraft/profile/{}", steve_id());

    let (status, profile) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["name"], "Steve");
    let properties = profile["properties"].as_array().unwrap();
    assert!(!properties.is_empty());
    assert!(properties.iter().all(|p| p.get("signature").is_none()));

    let (status, profile) = app.get(&format!("{uri}?unsigned=false")).await;
    assert_eq!(status, StatusCode::OK);
    let properties = profile["properties"].as_array().unwrap();
    assert!(properties.iter().all(|p| p["signature"].is_string()));

    let (status, profile) = app.get(&format!("{uri}?unsigned")).await;
    assert_eq!(status, StatusCode::OK);
    let properties = profile["properties"].as_array().unwrap();
    assert!(properties.iter().all(|p| p.get("signature").is_none()));

    let (status, body) = app.get(&format!("{uri}?unsigned=maybe")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IllegalArgumentException");

    let unknown = uuid::Uuid::new_v4().simple().to_string();
    let (status, _) = app
        .get(&format!("/sessionserver/session/minecraft/profile/{unknown}"))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .get("/sessionserver/session/minecraft/profile/not-a-uuid")
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bulk_lookup_respects_the_limit() {
    let app = app().await;
    let (status, found) = app
        .post("/api/profiles/minecraft", json!(["steve", "Bravo", "ghost"]))
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Steve", "Bravo"]);

    let (status, body) = app
        .post("/api/profiles/minecraft", json!(["a", "b", "c", "d"]))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "ForbiddenOperationException");
}

#[tokio::test]
async fn metadata_advertises_key_and_domains() {
    let app = app().await;
    let (status, meta) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["meta"]["serverName"], "Test Ygg");
    assert_eq!(meta["meta"]["implementationName"], "ygg");
    assert_eq!(meta["meta"]["links"]["homepage"], SITE_URL);
    assert_eq!(meta["skinDomains"], json!(["skins.example"]));
    assert!(
        meta["signaturePublickey"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN PUBLIC KEY-----")
    );
}

#[tokio::test]
async fn malformed_bodies_are_illegal_arguments() {
    let app = app().await;
    let (status, body) = app
        .send(
            Request::post("/authserver/authenticate")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IllegalArgumentException");
    assert!(body["cause"].is_string());

    let (status, body) = app
        .post("/authserver/authenticate", json!({"username": "Steve"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IllegalArgumentException");

    let (status, _) = app
        .get("/sessionserver/session/minecraft/hasJoined?username=Steve")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
