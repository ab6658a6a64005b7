use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use utoipa::ToSchema;

/// The user name assigned to every caller that did not authenticate.
pub const ANONYMOUS: &str = "anonymous";

/// Readable tag that makes an entry visible to everybody.
pub const READABLE_PUBLIC: &str = "*";

/// Readable tag that makes an entry visible to any non-anonymous caller.
pub const READABLE_AUTHENTICATED: &str = "authenticated";

// --- Storage Namespaces ---

/// EntryKind
///
/// Selects the namespace an entry lives in. User data and the two kinds of
/// control records never share a namespace, so a caller-supplied key can not
/// collide with a token mapping or a role assignment whatever its spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    /// Ordinary caller-owned records.
    UserData,
    /// Maps an opaque secret token (the key) to a user identity.
    SecretTokenMapping,
    /// Maps a user identity (the key) to a role.
    RoleAssignment,
}

impl EntryKind {
    /// Stable column value used by the Postgres backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::UserData => "user",
            EntryKind::SecretTokenMapping => "secret_token",
            EntryKind::RoleAssignment => "role",
        }
    }
}

// --- Core Schemas ---

/// Entry
///
/// One versioned record stored under a key. `(key, created)` identifies it;
/// `owner` and `readable` are fixed at creation and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Entry {
    pub key: String,
    /// ISO-8601 UTC timestamp, the version discriminator within a key.
    pub created: String,
    pub readable: String,
    pub owner: String,
    #[ts(type = "unknown")]
    #[schema(value_type = Object)]
    pub data: Value,
    /// Optional correlation id grouping related entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub id: Option<String>,
}

/// Role
///
/// The caller's role, always re-derived per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Role {
    Anonymous,
    AuthenticatedUser,
    Admin,
    /// Any other role name found in a role assignment record.
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Anonymous => "anonymous",
            Role::AuthenticatedUser => "authenticatedUser",
            Role::Admin => "admin",
            Role::Custom(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "anonymous" => Role::Anonymous,
            "authenticatedUser" => Role::AuthenticatedUser,
            "admin" => Role::Admin,
            _ => Role::Custom(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity
///
/// The resolved `(user, role)` pair for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Identity {
    pub user: String,
    #[ts(type = "string")]
    #[schema(value_type = String)]
    pub role: Role,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user: ANONYMOUS.to_string(),
            role: Role::Anonymous,
        }
    }

    pub fn new(user: impl Into<String>, role: Role) -> Self {
        Self {
            user: user.into(),
            role,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user == ANONYMOUS
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// --- Store Query ---

/// EntryQuery
///
/// Range/equality lookup consumed by the store. `start`/`end` bound `created`
/// inclusively; results are always newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub key: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub correlation_id: Option<String>,
    pub limit: usize,
}

impl EntryQuery {
    pub fn new(key: impl Into<String>, limit: usize) -> Self {
        Self {
            key: key.into(),
            start: None,
            end: None,
            correlation_id: None,
            limit,
        }
    }

    /// Matches exactly one `(key, created)` pair.
    pub fn exact(key: impl Into<String>, created: impl Into<String>) -> Self {
        let created = created.into();
        Self {
            key: key.into(),
            start: Some(created.clone()),
            end: Some(created),
            correlation_id: None,
            limit: 1,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// True if `entry` satisfies every bound except the limit.
    pub fn matches(&self, entry: &Entry) -> bool {
        entry.key == self.key
            && self
                .start
                .as_deref()
                .is_none_or(|start| entry.created.as_str() >= start)
            && self
                .end
                .as_deref()
                .is_none_or(|end| entry.created.as_str() <= end)
            && self
                .correlation_id
                .as_deref()
                .is_none_or(|id| entry.id.as_deref() == Some(id))
    }
}

// --- Request Payloads ---

/// ListEntriesParams
///
/// Query string of `GET /`. `limit` stays a raw string so garbage falls back
/// to the default instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListEntriesParams {
    pub key: Option<String>,
    pub limit: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub id: Option<String>,
}

/// CreateEntryRequest
///
/// Body of `POST /`. Any `owner` sent by the client is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateEntryRequest {
    pub key: Option<String>,
    #[ts(optional)]
    pub readable: Option<String>,
    #[ts(type = "unknown")]
    #[schema(value_type = Object)]
    pub data: Option<Value>,
    #[ts(optional)]
    pub id: Option<String>,
}

/// DeleteEntryRequest
///
/// Body of `DELETE /`. Either `created` (single entry) or `id` (every entry
/// of the key carrying that correlation id) must be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DeleteEntryRequest {
    pub key: Option<String>,
    #[ts(optional)]
    pub created: Option<String>,
    #[ts(optional)]
    pub id: Option<String>,
}

// --- Response Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreatedResponse {
    pub message: String,
    pub item: Entry,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DeletedResponse {
    pub message: String,
    pub deleted: usize,
}

/// MessageResponse
///
/// Body shape of every error and of the preflight response.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}
