use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::documents::{dates_newest_first, Documents, Feed};
use crate::fetcher::{FeedFailure, Fetcher};
use crate::pipeline::{fetch_and_analyze, PipelineError};
use crate::session::{session_cookie, AdminEvent, AdminState, Notice, Screen, SessionStore};
use crate::summarizer::Summarizer;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct AppState {
    pub documents: Documents,
    pub fetcher: Arc<Fetcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub sessions: SessionStore,
    /// Compared verbatim against login attempts
    pub admin_password: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/admin", get(admin))
        .route("/admin/login", post(login))
        .route("/admin/logout", post(logout))
        .route("/admin/feeds", post(add_feed))
        .route("/admin/feeds/delete", post(delete_feed))
        .route("/admin/run", post(run))
        .route("/health", get(health))
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub dates: Vec<DateOption>,
    pub content_html: String,
}

pub struct DateOption {
    pub date: String,
    pub selected: bool,
}

#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub locked: bool,
    pub running: bool,
    pub notices: Vec<Notice>,
    pub feeds: Vec<Feed>,
    /// Distinct feed names, in list order
    pub feed_names: Vec<String>,
    pub failures: Vec<FeedFailure>,
    pub preview_html: Option<String>,
    pub stats_json: String,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

/// Renders briefing markdown. Raw HTML in the source is shown as text, and
/// links or images pointing anywhere but http(s) or mailto lose their tag.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    // One entry per open link/image: true if its tags were dropped
    let mut dropped: Vec<bool> = Vec::new();
    let parser = Parser::new_ext(markdown, options).filter_map(move |event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Some(Event::Text(raw)),
        Event::Start(Tag::Link { ref dest_url, .. })
        | Event::Start(Tag::Image { ref dest_url, .. }) => {
            let allowed = is_allowed_target(dest_url);
            if !allowed {
                warn!("Dropped link to disallowed target '{}'", dest_url);
            }
            dropped.push(!allowed);
            allowed.then_some(event)
        }
        Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
            if dropped.pop().unwrap_or(false) {
                None
            } else {
                Some(event)
            }
        }
        other => Some(other),
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn is_allowed_target(dest: &str) -> bool {
    url::Url::parse(dest)
        .map(|url| matches!(url.scheme(), "http" | "https" | "mailto"))
        .unwrap_or(false)
}

fn today() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

fn with_session(mut response: Response, id: Uuid, created: bool) -> Response {
    if created {
        if let Ok(value) = HeaderValue::from_str(&session_cookie(id)) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

fn back_to_admin(id: Uuid, created: bool) -> Response {
    with_session(Redirect::to("/admin").into_response(), id, created)
}

// Route handlers
#[derive(Deserialize)]
pub struct IndexQuery {
    pub date: Option<String>,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IndexQuery>,
) -> Result<Response, AppError> {
    let (id, created) = state.sessions.resolve(&headers).await;

    let briefings = state.documents.get_briefings().await;
    let dates = dates_newest_first(&briefings);
    let selected = query
        .date
        .filter(|d| briefings.contains_key(d))
        .or_else(|| dates.first().cloned());

    let content_html = selected
        .as_ref()
        .and_then(|d| briefings.get(d))
        .map(|md| render_markdown(md))
        .unwrap_or_default();

    let dates = dates
        .into_iter()
        .map(|date| DateOption {
            selected: selected.as_deref() == Some(date.as_str()),
            date,
        })
        .collect();

    if state.sessions.claim_visit(id).await {
        let now = chrono::Local::now().naive_local();
        match state.documents.record_visit(now).await {
            Ok(stats) => info!("Visit #{} recorded", stats.total_visits),
            Err(e) => warn!("Failed to record visit: {}", e),
        }
    }

    let page = HtmlTemplate(IndexTemplate {
        dates,
        content_html,
    });
    Ok(with_session(page.into_response(), id, created))
}

async fn admin_page(
    state: &AppState,
    id: Uuid,
    failures: Vec<FeedFailure>,
    preview_html: Option<String>,
) -> Result<AdminTemplate, AppError> {
    let session = state.sessions.get(id).await;
    let notices = state.sessions.take_notices(id).await;
    let screen = Screen::admin(session.admin);

    if screen == Screen::AdminUnauthenticated {
        return Ok(AdminTemplate {
            locked: true,
            running: false,
            notices,
            feeds: Vec::new(),
            feed_names: Vec::new(),
            failures: Vec::new(),
            preview_html: None,
            stats_json: String::new(),
        });
    }

    let feeds = state.documents.get_feeds().await;
    let mut feed_names: Vec<String> = Vec::new();
    for feed in &feeds {
        if !feed_names.contains(&feed.name) {
            feed_names.push(feed.name.clone());
        }
    }
    let stats = state.documents.get_stats("N/A").await;

    Ok(AdminTemplate {
        locked: false,
        running: screen == Screen::AdminRunning,
        notices,
        feeds,
        feed_names,
        failures,
        preview_html,
        stats_json: serde_json::to_string_pretty(&stats)?,
    })
}

pub async fn admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (id, created) = state.sessions.resolve(&headers).await;
    let page = admin_page(&state, id, Vec::new(), None).await?;
    Ok(with_session(HtmlTemplate(page).into_response(), id, created))
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let (id, created) = state.sessions.resolve(&headers).await;
    let password_ok = form.password == state.admin_password;
    state
        .sessions
        .transition(id, AdminEvent::Login { password_ok })
        .await;
    back_to_admin(id, created)
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (id, created) = state.sessions.resolve(&headers).await;
    state.sessions.transition(id, AdminEvent::Logout).await;
    back_to_admin(id, created)
}

#[derive(Deserialize)]
pub struct AddFeedForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Checks an admin-entered feed URL: absolute http(s) only.
pub fn validate_feed_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid feed URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported URL scheme: {}", other)),
    }
}

pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<AddFeedForm>,
) -> Response {
    let (id, created) = state.sessions.resolve(&headers).await;
    if !state.sessions.get(id).await.admin.is_authenticated() {
        return back_to_admin(id, created);
    }

    let name = form.name.trim();
    let url = form.url.trim();
    let notice = if name.is_empty() || url.is_empty() {
        Notice::error("Feed name and URL are both required.")
    } else {
        match validate_feed_url(url) {
            Err(reason) => Notice::error(reason),
            Ok(()) => match state.documents.add_feed(Feed::new(name, url)).await {
                Ok(_) => {
                    info!("Added feed '{}' ({})", name, url);
                    Notice::success(format!("Added {}", name))
                }
                Err(e) => {
                    warn!("Failed to add feed '{}': {}", name, e);
                    Notice::error("Failed to save feed.")
                }
            },
        }
    };

    state.sessions.push_notice(id, notice).await;
    back_to_admin(id, created)
}

#[derive(Deserialize)]
pub struct DeleteFeedForm {
    #[serde(default)]
    pub name: String,
}

pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<DeleteFeedForm>,
) -> Response {
    let (id, created) = state.sessions.resolve(&headers).await;
    if !state.sessions.get(id).await.admin.is_authenticated() || form.name.is_empty() {
        return back_to_admin(id, created);
    }

    let notice = match state.documents.delete_feed(&form.name).await {
        Ok(_) => {
            info!("Deleted feed '{}'", form.name);
            Notice::success(format!("Deleted {}", form.name))
        }
        Err(e) => {
            warn!("Failed to delete feed '{}': {}", form.name, e);
            Notice::error("Failed to delete feed.")
        }
    };

    state.sessions.push_notice(id, notice).await;
    back_to_admin(id, created)
}

/// Runs fetch-and-analyze and publishes the result under today's date.
///
/// The run happens on its own task so that a client going away mid-run does
/// not strand the session in `Running`; the task finishes the run and leaves
/// its notices for the next page load.
pub async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (id, created) = state.sessions.resolve(&headers).await;

    if state
        .sessions
        .transition(id, AdminEvent::StartRun)
        .await
        .is_none()
    {
        if state.sessions.get(id).await.admin == AdminState::Running {
            state
                .sessions
                .push_notice(id, Notice::warning("An analysis is already running."))
                .await;
        }
        return Ok(back_to_admin(id, created));
    }

    let task = tokio::spawn(execute_run(state.clone(), id));
    let (failures, preview_html) = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("Analysis task failed: {}", e);
            state.sessions.transition(id, AdminEvent::FinishRun).await;
            return Err(e.into());
        }
    };

    let page = admin_page(&state, id, failures, preview_html).await?;
    Ok(with_session(HtmlTemplate(page).into_response(), id, created))
}

/// Body of a run started by `run`. Always ends with `FinishRun`.
async fn execute_run(state: Arc<AppState>, id: Uuid) -> (Vec<FeedFailure>, Option<String>) {
    let feeds = state.documents.get_feeds().await;
    let outcome = fetch_and_analyze(&feeds, &state.fetcher, state.summarizer.as_ref()).await;

    let mut failures = Vec::new();
    let mut preview_html = None;
    let mut notices = Vec::new();

    match outcome {
        Ok(analysis) => {
            if !analysis.failures.is_empty() {
                notices.push(Notice::warning(format!(
                    "{} of {} feeds could not be fetched and were skipped.",
                    analysis.failures.len(),
                    feeds.len()
                )));
            }
            let date = today();
            match state.documents.publish_briefing(&date, &analysis.report).await {
                Ok(()) => {
                    info!(
                        "Published briefing for {} from {} articles",
                        date, analysis.article_count
                    );
                    notices.push(Notice::success(format!(
                        "Successfully published news for {}",
                        date
                    )));
                }
                Err(e) => {
                    warn!("Failed to publish briefing for {}: {}", date, e);
                    notices.push(Notice::error("Failed to save news data."));
                }
            }
            preview_html = Some(render_markdown(&analysis.report));
            failures = analysis.failures;
        }
        Err(e) => {
            warn!("Fetch and analyze failed: {}", e);
            notices.push(Notice::error(e.to_string()));
            if let PipelineError::NoArticles { failures: failed, .. } = e {
                failures = failed;
            }
        }
    }

    state
        .sessions
        .update(id, |session| {
            session.notices.extend(notices);
            if let Some(next) = session.admin.apply(AdminEvent::FinishRun) {
                session.admin = next;
            }
        })
        .await;

    (failures, preview_html)
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
