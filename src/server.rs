use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, FromRequest, FromRequestParts, Json, Path, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use cookie::{Cookie, SameSite};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::accounts::{User, UserStore};
use crate::config::{Config, SessionConfig};
use crate::db::{now_ts, Database};
use crate::error::{GoalListError, Result};
use crate::forms::{FieldErrors, GoalForm, LoginForm, ProfileForm, RegisterForm, TaskForm, TaskUpdateForm};
use crate::goals::{Goal, GoalStore};
use crate::interfaces::scheduler::ScheduledJob;
use crate::profile_image::ProfileImageRenderer;
use crate::scheduler::Scheduler;
use crate::sessions::SessionStore;
use crate::tasks::{Task, TaskStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionStore>,
    pub goals: Arc<GoalStore>,
    pub tasks: Arc<TaskStore>,
    pub renderer: Arc<ProfileImageRenderer>,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            users: Arc::new(UserStore::new(db.clone())),
            sessions: Arc::new(SessionStore::new(db.clone())),
            goals: Arc::new(GoalStore::new(db.clone())),
            tasks: Arc::new(TaskStore::new(db.clone())),
            renderer: Arc::new(ProfileImageRenderer::new(db, config.profile_image.clone())),
            session: config.session.clone(),
        }
    }
}

struct SessionPurgeJob {
    sessions: Arc<SessionStore>,
    interval: Duration,
}

#[async_trait::async_trait]
impl ScheduledJob for SessionPurgeJob {
    fn name(&self) -> &str {
        "session_purge"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        self.sessions.purge_expired(now_ts()).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

#[derive(Serialize)]
struct HomeResponse {
    now: String,
    user: User,
}

#[derive(Serialize)]
struct GoalDetailResponse {
    goal: Goal,
    tasks: Vec<Task>,
}

/// An error already mapped to its HTTP status.
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorResponse {
                error: "Unauthorized".to_string(),
                fields: None,
            },
        }
    }
}

impl From<GoalListError> for ApiError {
    fn from(err: GoalListError) -> Self {
        let (status, error, fields) = match err {
            GoalListError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "validation failed".to_string(),
                Some(fields),
            ),
            GoalListError::Domain(message) => {
                tracing::warn!(reason = %message, "Rejected by domain rule");
                (StatusCode::CONFLICT, message, None)
            }
            err @ GoalListError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string(), None),
            GoalListError::Unauthorized(_) => return Self::unauthorized(),
            err => {
                tracing::error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    None,
                )
            }
        };
        Self {
            status,
            body: ErrorResponse { error, fields },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PathRejection> for ApiError {
    fn from(err: PathRejection) -> Self {
        tracing::debug!(error = %err, "Rejected path parameter");
        GoalListError::field("id", "Enter a whole number.").into()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors that belong to the body as a whole rather than one field.
const NON_FIELD_ERRORS: &str = "non_field_errors";

/// JSON request body. Unlike `Json`, a body that does not deserialize is
/// reported as a 400 with the offending field named.
pub struct JsonForm<T>(pub T);

impl<T, S> FromRequest<S> for JsonForm<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        let bytes = Bytes::from_request(req, state).await.map_err(|err| {
            ApiError::from(GoalListError::field(NON_FIELD_ERRORS, err.body_text()))
        })?;
        let mut de = serde_json::Deserializer::from_slice(&bytes);
        let value = serde_path_to_error::deserialize(&mut de).map_err(body_error)?;
        de.end()
            .map_err(|_| ApiError::from(GoalListError::field(NON_FIELD_ERRORS, "Malformed JSON body.")))?;
        Ok(Self(value))
    }
}

fn body_error(err: serde_path_to_error::Error<serde_json::Error>) -> ApiError {
    let path = err.path().to_string();
    let inner = err.into_inner();
    tracing::debug!(path = %path, error = %inner, "Rejected request body");
    if !inner.is_data() {
        return GoalListError::field(NON_FIELD_ERRORS, "Malformed JSON body.").into();
    }
    let detail = inner.to_string();
    let (field, message) = match missing_field(&detail) {
        Some(name) => (name, "This field is required."),
        None if path == "." => (NON_FIELD_ERRORS, "Expected a JSON object."),
        None => (path.as_str(), "Enter a valid value."),
    };
    GoalListError::field(field, message).into()
}

fn missing_field(detail: &str) -> Option<&str> {
    detail
        .strip_prefix("missing field `")?
        .split('`')
        .next()
}

/// Numeric record id taken from the route.
pub struct RecordId(pub i32);

impl<S> FromRequestParts<S> for RecordId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> ApiResult<Self> {
        let Path(id) = Path::<i32>::from_request_parts(parts, state).await?;
        Ok(Self(id))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/home", get(home))
        .route("/accounts/register", post(register))
        .route("/accounts/login", post(login))
        .route("/accounts/logout", post(logout))
        .route("/accounts/me", get(me).put(edit_profile).delete(delete_account))
        .route("/goals", get(list_goals).post(create_goal))
        .route("/goals/{id}", get(goal_detail).put(edit_goal).delete(delete_goal))
        .route("/goals/{id}/tasks", get(list_tasks).post(create_task))
        .route("/goals/{id}/profile_image", get(profile_image))
        .route("/tasks/{id}", get(get_task).put(edit_task).delete(delete_task))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version().to_string(),
    })
}

async fn home(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<HomeResponse>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(HomeResponse {
        now: chrono::Utc::now().to_rfc3339(),
        user,
    }))
}

async fn register(
    State(state): State<AppState>,
    JsonForm(form): JsonForm<RegisterForm>,
) -> ApiResult<impl IntoResponse> {
    let user = state.users.register(form).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(State(state): State<AppState>, JsonForm(form): JsonForm<LoginForm>) -> ApiResult<Response> {
    let remember = form.remember;
    let user = state.users.authenticate(form).await?;
    let ttl = if remember {
        state.session.remember_ttl_secs
    } else {
        state.session.ttl_secs
    };
    let (token, _) = state
        .sessions
        .create(user.id, remember, now_ts(), ttl)
        .await?;
    tracing::info!(user_id = user.id, remember, "User logged in");

    let cookie = session_cookie(&state.session, token, remember);
    Ok(with_cookie(Json(user).into_response(), &cookie))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = session_token(&headers, &state.session.cookie_name) {
        state.sessions.revoke(&token).await?;
    }
    let cookie = removal_cookie(&state.session);
    Ok(with_cookie(StatusCode::NO_CONTENT.into_response(), &cookie))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<User>> {
    Ok(Json(authenticate(&state, &headers).await?))
}

async fn edit_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonForm(form): JsonForm<ProfileForm>,
) -> ApiResult<Json<User>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.users.update_profile(user.id, form).await?))
}

async fn delete_account(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let user = authenticate(&state, &headers).await?;
    state.users.delete_user(user.id).await?;
    let cookie = removal_cookie(&state.session);
    Ok(with_cookie(StatusCode::NO_CONTENT.into_response(), &cookie))
}

async fn list_goals(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Goal>>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.goals.list_goals(user.id).await?))
}

async fn create_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonForm(form): JsonForm<GoalForm>,
) -> ApiResult<impl IntoResponse> {
    let user = authenticate(&state, &headers).await?;
    let goal = state.goals.create_goal(user.id, form).await?;
    Ok((StatusCode::CREATED, Json(goal)))
}

async fn goal_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<Json<GoalDetailResponse>> {
    let user = authenticate(&state, &headers).await?;
    let goal = state.goals.get_goal(user.id, id).await?;
    let tasks = state.tasks.list_tasks(user.id, id).await?;
    Ok(Json(GoalDetailResponse { goal, tasks }))
}

async fn edit_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
    JsonForm(form): JsonForm<GoalForm>,
) -> ApiResult<Json<Goal>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.goals.update_goal(user.id, id, form).await?))
}

async fn delete_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<StatusCode> {
    let user = authenticate(&state, &headers).await?;
    state.goals.delete_goal(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<Json<Vec<Task>>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.tasks.list_tasks(user.id, id).await?))
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
    JsonForm(form): JsonForm<TaskForm>,
) -> ApiResult<impl IntoResponse> {
    let user = authenticate(&state, &headers).await?;
    let task = state.tasks.create_task(user.id, id, form).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<Json<Task>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.tasks.get_task(user.id, id).await?))
}

async fn edit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
    JsonForm(form): JsonForm<TaskUpdateForm>,
) -> ApiResult<Json<Task>> {
    let user = authenticate(&state, &headers).await?;
    Ok(Json(state.tasks.update_task(user.id, id, form).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<StatusCode> {
    let user = authenticate(&state, &headers).await?;
    state.tasks.delete_task(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    RecordId(id): RecordId,
) -> ApiResult<Response> {
    let user = authenticate(&state, &headers).await?;
    let rendered = state.renderer.render_for_owner(user.id, id).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], rendered.png).into_response())
}

/// Resolves the session cookie to an active user.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let token =
        session_token(headers, &state.session.cookie_name).ok_or_else(ApiError::unauthorized)?;
    let session = state
        .sessions
        .resolve(&token, now_ts())
        .await?
        .ok_or_else(ApiError::unauthorized)?;
    match state.users.get_user(session.user_id).await {
        Ok(user) if user.is_active => Ok(user),
        Ok(_) | Err(GoalListError::NotFound { .. }) => Err(ApiError::unauthorized()),
        Err(err) => Err(err.into()),
    }
}

fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Remembered sessions get a persistent cookie; others last until the browser closes.
fn session_cookie(config: &SessionConfig, token: String, remember: bool) -> Cookie<'static> {
    let mut builder = Cookie::build((config.cookie_name.clone(), token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .path("/");
    if remember {
        builder = builder.max_age(time::Duration::seconds(config.remember_ttl_secs));
    }
    builder.build()
}

fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    let mut cookie = Cookie::build((config.cookie_name.clone(), ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .path("/")
        .build();
    cookie.make_removal();
    cookie
}

fn with_cookie(mut response: Response, cookie: &Cookie<'_>) -> Response {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(err) => tracing::error!(error = %err, "Session cookie is not a valid header value"),
    }
    response
}

pub async fn run(config: Config) -> Result<()> {
    run_with_shutdown(config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = Database::open(&config.database.sqlite_path).await?;
    tracing::info!(
        db_path = db.path(),
        template = %config.profile_image.template_path.display(),
        output_dir = %config.profile_image.output_dir.display(),
        "Goal list daemon starting"
    );

    let state = AppState::new(db, &config);
    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(SessionPurgeJob {
        sessions: state.sessions.clone(),
        interval: Duration::from_secs(config.session.purge_interval_secs.max(1)),
    }));
    scheduler.start();

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "Listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;

    Ok(())
}
