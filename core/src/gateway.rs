/// Remote data gateway: the three network operations the engine consumes
use crate::chat_types::{Conversation, Message, NewMessage, SentMessage};
use crate::config::Config;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Title the backend requires on every post
const SEND_TITLE: &str = "chat-message";

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Messages of one conversation. Implementations that cannot filter
    /// server-side must filter before returning.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn send_message(&self, message: NewMessage) -> Result<SentMessage>;

    /// Look up one user/conversation by id
    async fn find_user(&self, user_id: &str) -> Result<Conversation> {
        self.list_conversations()
            .await?
            .into_iter()
            .find(|c| c.id == user_id)
            .ok_or_else(|| ChatError::NotFound(format!("user {}", user_id)))
    }
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

pub struct HttpGateway {
    http: HttpClient,
    base: Url,
}

impl HttpGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ChatError::Config(format!("invalid base_url: {}", e)))?;
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let root = self.base.as_str().trim_end_matches('/');
        let joined = if root.ends_with("/api") {
            format!("{}/{}", root, path)
        } else {
            format!("{}/api/{}", root, path)
        };
        Url::parse(&joined).map_err(|e| ChatError::Config(format!("bad endpoint {}: {}", joined, e)))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl ChatGateway for HttpGateway {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let json = self.get_json("users").await?;
        Ok(parse_users(&json))
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let json = self.get_json("posts").await?;
        Ok(parse_posts(&json, conversation_id, Utc::now()))
    }

    async fn send_message(&self, message: NewMessage) -> Result<SentMessage> {
        let url = self.endpoint("posts")?;
        let body = SendBody {
            user_id: &message.conversation_id,
            title: SEND_TITLE,
            body: &message.text,
        };
        debug!("POST {} ({} chars)", url, message.text.len());
        let resp = self.http.post(url).json(&body).send().await?;
        let json = read_json(resp).await?;
        parse_sent(&json)
    }
}

// ─── Wire mapping ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SendBody<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct WireUser {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct WirePost {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(rename = "userId", deserialize_with = "string_or_number")]
    user_id: String,
    body: Option<String>,
    text: Option<String>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct WireSent {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(rename = "createdAt", default)]
    created_at: Option<DateTime<Utc>>,
}

/// Ids arrive as either JSON numbers or strings
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("id must be a string or number")),
    }
}

/// List payloads come as `{ "results": [...] }`, `{ "data": [...] }` or a bare array
fn result_items(json: &Value) -> &[Value] {
    json.as_array()
        .or_else(|| json.get("results").and_then(|v| v.as_array()))
        .or_else(|| json.get("data").and_then(|v| v.as_array()))
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

pub(crate) fn parse_users(json: &Value) -> Vec<Conversation> {
    result_items(json)
        .iter()
        .filter_map(|item| match WireUser::deserialize(item) {
            Ok(u) => Some(Conversation {
                id: u.id,
                name: u.name,
                avatar: u.avatar,
                phone: u.phone,
                email: u.email,
            }),
            Err(e) => {
                warn!("Skipping malformed user: {}", e);
                None
            }
        })
        .collect()
}

/// Keeps only posts of `conversation_id`; the backend does not filter
pub(crate) fn parse_posts(json: &Value, conversation_id: &str, now: DateTime<Utc>) -> Vec<Message> {
    result_items(json)
        .iter()
        .filter_map(|item| match WirePost::deserialize(item) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Skipping malformed post: {}", e);
                None
            }
        })
        .filter(|p| p.user_id == conversation_id)
        .map(|p| Message {
            id: p.id,
            conversation_id: p.user_id.clone(),
            sender_id: p.user_id,
            text: p.body.or(p.text).unwrap_or_default(),
            created_at: p.created_at.unwrap_or(now),
        })
        .collect()
}

pub(crate) fn parse_sent(json: &Value) -> Result<SentMessage> {
    let sent = WireSent::deserialize(json)?;
    Ok(SentMessage {
        server_id: sent.id,
        created_at: sent.created_at,
    })
}

/// Map a non-success status (and its `{"error": ...}` body) onto the taxonomy
pub(crate) fn status_error(status: StatusCode, body: &str) -> ChatError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status));
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChatError::Validation(detail),
        StatusCode::NOT_FOUND => ChatError::NotFound(detail),
        _ => ChatError::Network(detail),
    }
}
