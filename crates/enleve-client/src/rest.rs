//! Hosted backend adapter.
//!
//! Records go through the PostgREST endpoints under `/rest/v1`, objects
//! through `/storage/v1`, identity through `/auth/v1` and the invitation
//! through `/functions/v1`. Every request carries the project's anon key;
//! once signed in, the user's access token rides along as a bearer token so
//! row-level security sees the caller.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use enleve_shared::backend::{
    AdminFunctions, AttendanceQuery, ChangeFeed, ChangeFilter, Identity, ObjectStorage,
    QueueProcedures, RecordStore, SortOrder, Subscription,
};
use enleve_shared::constants::{
    INVITE_FUNCTION, ROTATE_QUEUE_RPC, TABLE_ATTENDANCE, TABLE_CHAT_HISTORIES,
    TABLE_PREFERENCES, TABLE_PROFILES, TABLE_USER_ROLES,
};
use enleve_shared::invite::{InviteRequest, InviteResponse};
use enleve_shared::models::{
    Attendance, AttendancePatch, AuthUser, BrokerProfile, ChatHistoryEntry, ClientPreference,
    ProfilePatch, SignedUrl,
};
use enleve_shared::types::{AttendanceId, AttendanceStatus, Role, UserId};
use enleve_shared::BackendError;

use crate::commands::auth::{PasswordAuth, SignUp};
use crate::realtime;

type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Clone)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

#[derive(Deserialize)]
struct RoleRow {
    role: Role,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpData<'a>,
}

#[derive(Serialize)]
struct SignUpData<'a> {
    nome_completo: &'a str,
    role: &'a str,
}

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn table_path(table: &str) -> String {
        format!("/rest/v1/{table}")
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = send(
            self.request(Method::GET, &Self::table_path(table))
                .await
                .query(params),
        )
        .await?;
        decode(response).await
    }

    /// PATCH matching rows and return the updated ones.
    async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
        body: &B,
    ) -> Result<Vec<T>> {
        let response = send(
            self.request(Method::PATCH, &Self::table_path(table))
                .await
                .query(params)
                .header("Prefer", "return=representation")
                .json(body),
        )
        .await?;
        decode(response).await
    }
}

/// PostgREST query parameters for an attendance query.
pub fn attendance_params(query: &AttendanceQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("select", "*".to_string())];
    if let Some(status) = query.status {
        params.push(("status", eq(status.as_str())));
    }
    if let Some(channel) = &query.channel {
        params.push(("canal", eq(channel.as_str())));
    }
    if let Some(broker) = query.assigned_broker {
        params.push(("corretor_responsavel_id", eq(&broker.to_string())));
    }
    if let Some((column, order)) = query.order {
        let direction = match order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        params.push(("order", format!("{}.{direction}.nullslast", column.column())));
    }
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn in_list(values: &[String]) -> String {
    format!("in.({})", values.join(","))
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`.
pub fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

/// Best human-readable message in an error body.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

pub fn status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthenticated,
        StatusCode::FORBIDDEN => BackendError::Forbidden(message),
        StatusCode::NOT_FOUND => BackendError::NotFound,
        StatusCode::CONFLICT => BackendError::Conflict(message),
        _ => BackendError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(%status, body = %body, "backend request failed");
    Err(status_error(status, error_message(&body)))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl RecordStore for RestBackend {
    async fn list_attendances(&self, query: &AttendanceQuery) -> Result<Vec<Attendance>> {
        self.select(TABLE_ATTENDANCE, &attendance_params(query)).await
    }

    async fn count_attendances(&self, query: &AttendanceQuery) -> Result<u64> {
        let mut params = attendance_params(query);
        params[0].1 = "id".into();
        params.retain(|(key, _)| *key != "order" && *key != "limit");

        let response = send(
            self.request(Method::HEAD, &Self::table_path(TABLE_ATTENDANCE))
                .await
                .query(&params)
                .header("Prefer", "count=exact"),
        )
        .await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| BackendError::Decode("missing Content-Range count".into()))
    }

    async fn get_attendance(&self, id: AttendanceId) -> Result<Attendance> {
        let rows: Vec<Attendance> = self
            .select(
                TABLE_ATTENDANCE,
                &[("select", "*".into()), ("id", eq(&id.to_string()))],
            )
            .await?;
        rows.into_iter().next().ok_or(BackendError::NotFound)
    }

    async fn update_attendance_if(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        patch: &AttendancePatch,
    ) -> Result<Option<Attendance>> {
        let rows: Vec<Attendance> = self
            .patch(
                TABLE_ATTENDANCE,
                &[
                    ("id", eq(&id.to_string())),
                    ("status", eq(expected.as_str())),
                ],
                patch,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<BrokerProfile>> {
        let rows: Vec<BrokerProfile> = self
            .select(
                TABLE_PROFILES,
                &[("select", "*".into()), ("id", eq(&id.to_string()))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_profiles(&self, ids: &[UserId]) -> Result<Vec<BrokerProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(UserId::to_string).collect();
        self.select(
            TABLE_PROFILES,
            &[("select", "*".into()), ("id", in_list(&ids))],
        )
        .await
    }

    async fn update_profile(&self, id: UserId, patch: &ProfilePatch) -> Result<BrokerProfile> {
        let rows: Vec<BrokerProfile> = self
            .patch(TABLE_PROFILES, &[("id", eq(&id.to_string()))], patch)
            .await?;
        // Row-level security hides rows the caller cannot touch.
        rows.into_iter().next().ok_or(BackendError::NotFound)
    }

    async fn roles_of(&self, user: UserId) -> Result<Vec<Role>> {
        let rows: Vec<RoleRow> = self
            .select(
                TABLE_USER_ROLES,
                &[("select", "role".into()), ("user_id", eq(&user.to_string()))],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.role).collect())
    }

    async fn list_preferences(&self, limit: usize) -> Result<Vec<ClientPreference>> {
        self.select(
            TABLE_PREFERENCES,
            &[
                ("select", "tipo,valor_texto,valor_numero".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatHistoryEntry>> {
        self.select(
            TABLE_CHAT_HISTORIES,
            &[
                ("select", "*".into()),
                ("session_id", eq(session_id)),
                ("order", "id.asc".into()),
            ],
        )
        .await
    }
}

#[async_trait]
impl QueueProcedures for RestBackend {
    async fn rotate_queue(&self, broker: UserId) -> Result<()> {
        send(
            self.request(Method::POST, &format!("/rest/v1/rpc/{ROTATE_QUEUE_RPC}"))
                .await
                .json(&json!({ "corretor_id": broker })),
        )
        .await?;
        debug!(%broker, "queue rotated");
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<()> {
        let size = data.len();
        send(
            self.request(Method::POST, &format!("/storage/v1/object/{bucket}/{path}"))
                .await
                .header(CONTENT_TYPE, content_type)
                .header("x-upsert", if upsert { "true" } else { "false" })
                .body(data),
        )
        .await?;
        debug!(bucket, path, size, "object uploaded");
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<SignedUrl> {
        let response = send(
            self.request(
                Method::POST,
                &format!("/storage/v1/object/sign/{bucket}/{path}"),
            )
            .await
            .json(&json!({ "expiresIn": ttl.num_seconds() })),
        )
        .await?;
        let signed: SignedUrlResponse = decode(response).await?;
        Ok(SignedUrl {
            url: format!("{}/storage/v1{}", self.base_url, signed.signed_url),
            expires_at: Utc::now() + ttl,
        })
    }
}

#[async_trait]
impl ChangeFeed for RestBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        realtime::subscribe(
            realtime::socket_url(&self.base_url, &self.anon_key),
            filter,
            self.access_token().await,
        )
        .await
    }
}

#[async_trait]
impl Identity for RestBackend {
    async fn current_user(&self) -> Result<Option<AuthUser>> {
        if self.access_token().await.is_none() {
            return Ok(None);
        }
        match send(self.request(Method::GET, "/auth/v1/user").await).await {
            Ok(response) => {
                let user: AuthUser = decode(response).await?;
                Ok(Some(user))
            }
            Err(BackendError::Unauthenticated) | Err(BackendError::Forbidden(_)) => {
                info!("access token rejected, session dropped");
                *self.session.write().await = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        if self.access_token().await.is_none() {
            return Ok(());
        }
        let result = send(self.request(Method::POST, "/auth/v1/logout").await).await;
        // The local session goes regardless of what the server says.
        *self.session.write().await = None;
        if let Err(e) = result {
            warn!(error = %e, "remote sign-out failed");
        }
        Ok(())
    }
}

#[async_trait]
impl AdminFunctions for RestBackend {
    async fn invite_user(&self, request: &InviteRequest) -> Result<InviteResponse> {
        let response = send(
            self.request(Method::POST, &format!("/functions/v1/{INVITE_FUNCTION}"))
                .await
                .json(request),
        )
        .await?;
        decode(response).await
    }
}

#[async_trait]
impl PasswordAuth for RestBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser> {
        let response = send(
            self.http
                .post(format!("{}/auth/v1/token", self.base_url))
                .query(&[("grant_type", "password")])
                .header("apikey", &self.anon_key)
                .json(&json!({ "email": email, "password": password })),
        )
        .await?;
        let token: TokenResponse = decode(response).await?;
        let user = token.user.clone();
        *self.session.write().await = Some(AuthSession {
            access_token: token.access_token,
            user: token.user,
        });
        Ok(user)
    }

    async fn sign_up(&self, request: &SignUp) -> Result<()> {
        send(
            self.http
                .post(format!("{}/auth/v1/signup", self.base_url))
                .header("apikey", &self.anon_key)
                .json(&SignUpBody {
                    email: &request.email,
                    password: &request.password,
                    data: SignUpData {
                        nome_completo: &request.display_name,
                        role: request.role.as_str(),
                    },
                }),
        )
        .await?;
        Ok(())
    }
}

impl RestBackend {
    /// User of the current session, without asking the server.
    pub async fn cached_user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use enleve_shared::backend::AttendanceOrder;
    use enleve_shared::types::Channel;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const KEY: &str = "anon-key";

    fn attendance_row(id: i64, status: &str) -> Value {
        json!({
            "id": id,
            "canal": "whatsapp",
            "cliente_nome": "Maria",
            "cliente_contato": "+55 41 99999-0000",
            "status": status,
            "corretor_responsavel_id": null,
            "timestamp_fila": null,
            "relatorio_ia": null,
            "session_id": null,
            "created_at": "2026-01-01T10:00:00Z",
            "updated_at": "2026-01-01T10:00:00Z"
        })
    }

    async fn signed_in(server: &MockServer) -> (RestBackend, UserId) {
        let user = UserId::new();
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "jwt-123",
                "token_type": "bearer",
                "user": { "id": user.to_string(), "email": "ana@enleve.com" }
            })))
            .mount(server)
            .await;
        let backend = RestBackend::new(&server.uri(), KEY);
        backend
            .sign_in_with_password("ana@enleve.com", "segredo123")
            .await
            .unwrap();
        (backend, user)
    }

    #[test]
    fn query_params_follow_postgrest_syntax() {
        let query = AttendanceQuery::with_status(AttendanceStatus::EmEspera)
            .channel(Channel::WhatsApp)
            .order_by(AttendanceOrder::QueuedAt, SortOrder::Asc)
            .limit(5);
        let params = attendance_params(&query);
        assert!(params.contains(&("status", "eq.Em Espera".into())));
        assert!(params.contains(&("canal", "eq.whatsapp".into())));
        assert!(params.contains(&("order", "timestamp_fila.asc.nullslast".into())));
        assert!(params.contains(&("limit", "5".into())));
    }

    #[test]
    fn content_range_and_errors() {
        assert_eq!(content_range_total("0-9/42"), Some(42));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-9/*"), None);

        assert_eq!(
            error_message(r#"{"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(error_message(r#"{"error":"Unauthorized"}"#), "Unauthorized");
        assert_eq!(error_message("gateway down"), "gateway down");
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            BackendError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn requests_carry_key_and_bearer() {
        let server = MockServer::start().await;
        let (backend, _) = signed_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/atendimento"))
            .and(header("apikey", KEY))
            .and(header("authorization", "Bearer jwt-123"))
            .and(query_param("status", "eq.Automatizado"))
            .and(query_param("order", "created_at.desc.nullslast"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([attendance_row(1, "Automatizado")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rows = backend
            .list_attendances(
                &AttendanceQuery::with_status(AttendanceStatus::Automatizado)
                    .order_by(AttendanceOrder::CreatedAt, SortOrder::Desc),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name, "Maria");
    }

    #[tokio::test]
    async fn conditional_update_reports_lost_race() {
        let server = MockServer::start().await;
        let (backend, me) = signed_in(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/atendimento"))
            .and(query_param("id", "eq.7"))
            .and(query_param("status", "eq.Em Espera"))
            .and(header("prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let won = backend
            .update_attendance_if(
                AttendanceId(7),
                AttendanceStatus::EmEspera,
                &AttendancePatch::assign(me),
            )
            .await
            .unwrap();
        assert!(won.is_none());
    }

    #[tokio::test]
    async fn counts_come_from_content_range() {
        let server = MockServer::start().await;
        let backend = RestBackend::new(&server.uri(), KEY);

        Mock::given(method("HEAD"))
            .and(path("/rest/v1/atendimento"))
            .and(header("prefer", "count=exact"))
            .and(query_param("canal", "eq.instagram"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-range", "*/3"))
            .mount(&server)
            .await;

        let count = backend
            .count_attendances(
                &AttendanceQuery::with_status(AttendanceStatus::Automatizado)
                    .channel(Channel::Instagram),
            )
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn rotation_calls_the_procedure() {
        let server = MockServer::start().await;
        let (backend, me) = signed_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/rotacionar_fila"))
            .and(body_json(json!({ "corretor_id": me.to_string() })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend.rotate_queue(me).await.unwrap();
    }

    #[tokio::test]
    async fn upload_and_sign() {
        let server = MockServer::start().await;
        let (backend, me) = signed_in(&server).await;
        let object = format!("{me}/1700000000000-abc.png");

        Mock::given(method("POST"))
            .and(path(format!("/storage/v1/object/avatars/{object}")))
            .and(header("x-upsert", "true"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Key": "avatars/x"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/storage/v1/object/sign/avatars/{object}")))
            .and(body_json(json!({ "expiresIn": 3600 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedURL": format!("/object/sign/avatars/{object}?token=abc")
            })))
            .mount(&server)
            .await;

        backend
            .upload("avatars", &object, Bytes::from_static(b"png"), "image/png", true)
            .await
            .unwrap();
        let signed = backend
            .create_signed_url("avatars", &object, Duration::seconds(3600))
            .await
            .unwrap();
        assert!(signed.url.starts_with(&server.uri()));
        assert!(signed.url.ends_with("?token=abc"));
        assert!(!signed.is_expired());
    }

    #[tokio::test]
    async fn rejected_token_drops_session() {
        let server = MockServer::start().await;
        let (backend, _) = signed_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "expired"})))
            .expect(1)
            .mount(&server)
            .await;

        assert!(backend.current_user().await.unwrap().is_none());
        assert!(backend.cached_user().await.is_none());
        // No token left, so no second request.
        assert!(backend.current_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invite_surfaces_function_error() {
        let server = MockServer::start().await;
        let (backend, _) = signed_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/functions/v1/invite-user"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "Email inválido"})),
            )
            .mount(&server)
            .await;

        let err = backend
            .invite_user(&InviteRequest::new("x", Role::Corretor))
            .await
            .unwrap_err();
        match err {
            BackendError::Remote { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Email inválido");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_up_sends_broker_metadata() {
        let server = MockServer::start().await;
        let backend = RestBackend::new(&server.uri(), KEY);

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(body_json(json!({
                "email": "novo@enleve.com",
                "password": "12345678",
                "data": { "nome_completo": "Novo", "role": "corretor" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        backend
            .sign_up(&SignUp {
                email: "novo@enleve.com".into(),
                password: "12345678".into(),
                display_name: "Novo".into(),
                role: Role::Corretor,
            })
            .await
            .unwrap();
    }
}
