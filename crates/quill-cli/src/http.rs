//! REST adapter for the comment API.
//!
//! ```text
//! GET    {base}/comments?postId={id} | ?slugPost={slug}
//! POST   {base}/comments            {"content", "postId" | "slugPost"}
//! DELETE {base}/comments/{id}
//! ```
//!
//! List responses are either a bare array or `{"items": [...]}`. Error
//! bodies contribute their `message` or `error` field.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::DateTime;
use quill_core::config::ApiConfig;
use quill_core::model::{CommentId, CommentRecord, SubjectKey};
use quill_core::remote::{CreatedComment, RemoteComments, RemoteError};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListPayload {
    Bare(Vec<WireComment>),
    Wrapped {
        #[serde(default)]
        items: Vec<WireComment>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireComment {
    id: Value,
    content: String,
    #[serde(default)]
    author: Option<WireAuthor>,
    #[serde(default)]
    author_name: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct WireAuthor {
    #[serde(default)]
    name: Option<String>,
}

impl WireComment {
    fn id(&self) -> Result<String, RemoteError> {
        match &self.id {
            Value::String(id) if !id.is_empty() => Ok(id.clone()),
            Value::Number(id) => Ok(id.to_string()),
            other => Err(RemoteError::Decode(format!("unusable comment id {other}"))),
        }
    }

    fn author_label(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|author| author.name.as_deref())
            .or(self.author_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn timestamp_ms(&self) -> Result<i64, RemoteError> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|ts| ts.timestamp_millis())
            .map_err(|err| {
                RemoteError::Decode(format!("bad createdAt {:?}: {err}", self.created_at))
            })
    }

    fn into_record(self) -> Result<CommentRecord, RemoteError> {
        Ok(CommentRecord::authoritative(
            self.id()?,
            self.author_label(),
            self.content.clone(),
            self.timestamp_ms()?,
        ))
    }
}

/// Query parameter selecting a subject's comments.
fn subject_query(subject: &SubjectKey) -> (&'static str, &str) {
    if let Some(slug) = subject.slug() {
        ("slugPost", slug)
    } else {
        ("postId", subject.post_id().unwrap_or(subject.as_str()))
    }
}

/// Body of a create request. Numeric post ids are sent as numbers.
fn create_body(subject: &SubjectKey, content: &str) -> Value {
    match subject_query(subject) {
        ("postId", id) => {
            let post_id = id.parse::<i64>().map_or_else(|_| json!(id), |n| json!(n));
            json!({ "content": content, "postId": post_id })
        }
        (_, slug) => json!({ "content": content, "slugPost": slug }),
    }
}

fn decode_list(payload: Value) -> Result<Vec<CommentRecord>, RemoteError> {
    let list = match serde_json::from_value::<ListPayload>(payload) {
        Ok(ListPayload::Bare(items) | ListPayload::Wrapped { items }) => items,
        Err(err) => return Err(RemoteError::Decode(err.to_string())),
    };
    list.into_iter().map(WireComment::into_record).collect()
}

fn decode_created(payload: Value) -> Result<CreatedComment, RemoteError> {
    let wire: WireComment =
        serde_json::from_value(payload).map_err(|err| RemoteError::Decode(err.to_string()))?;
    Ok(CreatedComment {
        id: CommentId::new(wire.id()?),
        author_label: wire.author_label().map(str::to_string),
        timestamp_ms: wire.timestamp_ms()?,
    })
}

fn status_message(status: u16, body: Option<&Value>) -> String {
    body.and_then(|body| body.get("message").or_else(|| body.get("error")))
        .and_then(Value::as_str)
        .map_or_else(|| format!("HTTP {status}"), str::to_string)
}

fn map_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_json::<Value>().ok();
            RemoteError::Status {
                status,
                message: status_message(status, body.as_ref()),
            }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

/// [`RemoteComments`] over HTTP.
#[derive(Debug)]
pub struct HttpRemote {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &ApiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("quill-cli/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn comments_url(&self) -> String {
        format!("{}/comments", self.base_url)
    }
}

impl RemoteComments for HttpRemote {
    fn list_comments(&self, subject: &SubjectKey) -> Result<Vec<CommentRecord>, RemoteError> {
        let (param, value) = subject_query(subject);
        debug!(%subject, "listing comments");
        let response = self
            .agent
            .get(&self.comments_url())
            .query(param, value)
            .call()
            .map_err(map_error)?;
        let payload = response
            .into_json::<Value>()
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        decode_list(payload)
    }

    fn create_comment(
        &self,
        subject: &SubjectKey,
        body: &str,
    ) -> Result<CreatedComment, RemoteError> {
        debug!(%subject, "creating comment");
        let response = self
            .agent
            .post(&self.comments_url())
            .send_json(create_body(subject, body))
            .map_err(map_error)?;
        let payload = response
            .into_json::<Value>()
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        decode_created(payload)
    }

    fn delete_comment(&self, id: &CommentId) -> Result<(), RemoteError> {
        debug!(%id, "deleting comment");
        // Success bodies are ignored; some servers send none.
        self.agent
            .delete(&format!("{}/{}", self.comments_url(), encode_segment(id.as_str())))
            .call()
            .map_err(map_error)?;
        Ok(())
    }
}

/// Percent-encode a path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
