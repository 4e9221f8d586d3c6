//! Integration tests for the newsroom
//!
//! These drive the HTTP surface end to end against a fake GitHub contents
//! API, a mocked Gemini endpoint and mocked RSS feeds.

mod common {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::{json, Value};
    use wiremock::matchers::path_regex;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    pub const REPO: &str = "someone/data";
    const PREFIX: &str = "/repos/someone/data/contents/";

    /// In-memory stand-in for the contents API, including sha checks on write.
    #[derive(Clone, Default)]
    pub struct FakeContents {
        files: Arc<Mutex<HashMap<String, (String, String)>>>,
        revisions: Arc<AtomicUsize>,
    }

    impl FakeContents {
        pub fn document(&self, path: &str) -> Option<Value> {
            let files = self.files.lock().unwrap();
            let (_, text) = files.get(path)?;
            serde_json::from_str(text).ok()
        }

        pub fn revision_count(&self) -> usize {
            self.revisions.load(Ordering::SeqCst)
        }
    }

    impl Respond for FakeContents {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let path = request.url.path().trim_start_matches(PREFIX).to_string();
            let mut files = self.files.lock().unwrap();

            match request.method.as_str() {
                "GET" => match files.get(&path) {
                    Some((sha, text)) => ResponseTemplate::new(200).set_body_json(json!({
                        "sha": sha,
                        "content": STANDARD.encode(text),
                        "encoding": "base64"
                    })),
                    None => ResponseTemplate::new(404),
                },
                "PUT" => {
                    let body: Value = match serde_json::from_slice(&request.body) {
                        Ok(body) => body,
                        Err(_) => return ResponseTemplate::new(400),
                    };
                    let sent_sha = body.get("sha").and_then(Value::as_str);
                    let current_sha = files.get(&path).map(|(sha, _)| sha.as_str());
                    if sent_sha != current_sha {
                        return ResponseTemplate::new(409);
                    }
                    let encoded = body["content"].as_str().unwrap_or_default();
                    let text = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
                    let n = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
                    files.insert(path, (format!("sha{}", n), text));
                    ResponseTemplate::new(200).set_body_json(json!({}))
                }
                _ => ResponseTemplate::new(405),
            }
        }
    }

    pub async fn github_server() -> (MockServer, FakeContents) {
        let server = MockServer::start().await;
        let contents = FakeContents::default();
        Mock::given(path_regex(r"^/repos/someone/data/contents/.+$"))
            .respond_with(contents.clone())
            .mount(&server)
            .await;
        (server, contents)
    }
}

#[cfg(test)]
mod config_integration_tests {
    use newsroom::config::Config;

    #[test]
    fn test_load_example_secrets() {
        // The example shipped with the project must stay loadable
        let config = Config::load("secrets.example.toml");
        assert!(config.is_ok(), "Failed to load secrets.example.toml: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.settings.model, "gemini-flash-latest");
        assert!(config.settings.max_entries_per_feed > 0);
    }
}

#[cfg(test)]
mod github_store_integration_tests {
    use super::common::*;
    use newsroom::documents::{Documents, Feed, FEEDS_PATH};
    use newsroom::github::GitHubStore;
    use newsroom::store::DocumentStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_round_trip_through_contents_api() {
        let (server, contents) = github_server().await;
        let store = GitHubStore::new(server.uri(), REPO, "ghp_test", None).unwrap();
        let doc = json!({"2024-12-09": "# Briefing\n\n- one\n- two", "2024-12-10": "유니코드"});

        assert!(store.load("news_data.json").await.is_none());
        store.save("news_data.json", &doc).await.unwrap();
        store.save("news_data.json", &doc).await.unwrap();

        assert_eq!(store.load("news_data.json").await, Some(doc));
        assert_eq!(contents.revision_count(), 2);
    }

    #[tokio::test]
    async fn test_feed_edits_persist_across_clients() {
        let (server, contents) = github_server().await;
        let first = Documents::new(Arc::new(
            GitHubStore::new(server.uri(), REPO, "ghp_test", None).unwrap(),
        ));
        let second = Documents::new(Arc::new(
            GitHubStore::new(server.uri(), REPO, "ghp_test", None).unwrap(),
        ));

        first
            .add_feed(Feed::new("A", "https://a.example/rss"))
            .await
            .unwrap();
        second
            .add_feed(Feed::new("B", "https://b.example/rss"))
            .await
            .unwrap();
        first.delete_feed("A").await.unwrap();

        assert_eq!(
            contents.document(FEEDS_PATH),
            Some(json!([{"name": "B", "url": "https://b.example/rss"}]))
        );
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use http_body_util::BodyExt;
    use newsroom::documents::{Documents, BRIEFINGS_PATH, STATS_PATH};
    use newsroom::fetcher::Fetcher;
    use newsroom::github::GitHubStore;
    use newsroom::routes::{router, AppState};
    use newsroom::session::SessionStore;
    use newsroom::summarizer::GeminiSummarizer;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PASSWORD: &str = "letmein";
    const GEMINI_PATH: &str = "/v1beta/models/gemini-flash-latest:generateContent";

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
            <channel>
                <title>World Wire</title>
                <link>https://wire.example</link>
                <description>News</description>
                <item>
                    <title>Summit ends with agreement</title>
                    <link>https://wire.example/summit</link>
                    <description>Leaders agreed on a framework.</description>
                </item>
            </channel>
        </rss>
    "#;

    fn gemini_reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        }))
    }

    fn build_app(github: &MockServer, gemini: &MockServer) -> Router {
        let store = GitHubStore::new(github.uri(), REPO, "ghp_test", None).unwrap();
        let state = Arc::new(AppState {
            documents: Documents::new(Arc::new(store)),
            fetcher: Arc::new(Fetcher::new(5).unwrap()),
            summarizer: Arc::new(
                GeminiSummarizer::new(gemini.uri(), "gemini-key", "gemini-flash-latest").unwrap(),
            ),
            sessions: SessionStore::new(),
            admin_password: PASSWORD.to_string(),
        });
        router(state)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn form(uri: &str, cookie: &str, fields: &[(&str, &str)]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
            .unwrap()
    }

    fn page(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn cookie_of(response: &Response) -> String {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
            .expect("response should start a session")
    }

    #[tokio::test]
    async fn test_admin_publishes_and_viewer_reads() {
        let (github, contents) = github_server().await;
        let gemini = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .respond_with(gemini_reply("# First edition"))
            .up_to_n_times(1)
            .mount(&gemini)
            .await;
        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .respond_with(gemini_reply("# Second edition"))
            .mount(&gemini)
            .await;
        let feeds = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wire.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&feeds)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.xml"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&feeds)
            .await;

        let app = build_app(&github, &gemini);

        // Log in on a fresh session
        let login = send(&app, form("/admin/login", "", &[("password", PASSWORD)])).await;
        assert_eq!(login.status(), StatusCode::SEE_OTHER);
        let admin = cookie_of(&login);

        // Configure one working and one broken feed
        let wire_url = format!("{}/wire.xml", feeds.uri());
        let gone_url = format!("{}/gone.xml", feeds.uri());
        send(&app, form("/admin/feeds", &admin, &[("name", "Wire"), ("url", wire_url.as_str())])).await;
        send(&app, form("/admin/feeds", &admin, &[("name", "Gone"), ("url", gone_url.as_str())])).await;
        assert_eq!(
            contents.document("feeds.json"),
            Some(json!([
                {"name": "Wire", "url": wire_url},
                {"name": "Gone", "url": gone_url}
            ]))
        );

        // Two manual runs on the same day: the second replaces the first
        let first = body_string(send(&app, form("/admin/run", &admin, &[])).await).await;
        assert!(first.contains("Successfully published news for"));
        assert!(first.contains("1 of 2 feeds could not be fetched"));
        assert!(first.contains("Gone: HTTP error: status 410"));
        let second = body_string(send(&app, form("/admin/run", &admin, &[])).await).await;
        assert!(second.contains("<h1>Second edition</h1>"));

        let briefings = contents.document(BRIEFINGS_PATH).unwrap();
        let briefings = briefings.as_object().unwrap();
        assert_eq!(briefings.len(), 1);
        assert_eq!(briefings.values().next().unwrap(), "# Second edition");

        // The Gemini prompt carried the surviving feed's article
        let requests = gemini.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let prompt = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(prompt.contains("Summit ends with agreement"));
        assert!(prompt.contains("Leaders agreed on a framework."));

        // A reader sees the briefing and is counted once
        let view = send(&app, page("/", None)).await;
        let reader = cookie_of(&view);
        assert!(body_string(view).await.contains("<h1>Second edition</h1>"));
        send(&app, page("/", Some(&reader))).await;
        assert_eq!(contents.document(STATS_PATH).unwrap()["total_visits"], 1);
    }

    #[tokio::test]
    async fn test_summarizer_outage_publishes_nothing() {
        let (github, contents) = github_server().await;
        let gemini = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("Resource has been exhausted"))
            .mount(&gemini)
            .await;
        let feeds = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wire.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&feeds)
            .await;

        let app = build_app(&github, &gemini);
        let login = send(&app, form("/admin/login", "", &[("password", PASSWORD)])).await;
        let admin = cookie_of(&login);
        let wire_url = format!("{}/wire.xml", feeds.uri());
        send(&app, form("/admin/feeds", &admin, &[("name", "Wire"), ("url", wire_url.as_str())])).await;

        let body = body_string(send(&app, form("/admin/run", &admin, &[])).await).await;

        assert!(body.contains("Summarization failed"));
        assert!(body.contains("429"));
        assert!(contents.document(BRIEFINGS_PATH).is_none());
    }
}
