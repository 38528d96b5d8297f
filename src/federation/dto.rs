//! ActivityPub wire types
//!
//! Outbound documents are plain serde structs. Inbound activities are
//! decoded in two steps: `ActivityEnvelope` first, then `InboundActivity`
//! once the type tag is known.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ids::{ACTIVITY_STREAMS_CONTEXT, SECURITY_CONTEXT};

// =============================================================================
// Actor documents
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub shared_inbox: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl Image {
    pub fn new(url: &str) -> Self {
        Self {
            kind: "Image".to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub value: String,
}

/// Actor document served at `/u/{handle}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub preferred_username: String,
    pub name: String,
    pub summary: String,
    pub url: String,
    pub manually_approves_followers: bool,
    pub discoverable: bool,
    pub published: String,
    pub inbox: String,
    pub outbox: String,
    pub followers: String,
    pub following: String,
    pub endpoints: Endpoints,
    pub public_key: PublicKey,
    pub attachment: Vec<PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Image>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// The parts of a remote actor document we rely on
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteActor {
    pub id: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    pub inbox: String,
    #[serde(default)]
    pub endpoints: Option<RemoteEndpoints>,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoints {
    #[serde(default)]
    pub shared_inbox: Option<String>,
}

// =============================================================================
// Collections
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub total_items: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

impl OrderedCollection {
    pub fn summary(id: String, total_items: u64, first: Option<String>, last: Option<String>) -> Self {
        Self {
            context: ACTIVITY_STREAMS_CONTEXT.to_string(),
            id,
            kind: "OrderedCollection".to_string(),
            total_items,
            first,
            last,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub part_of: String,
    pub total_items: u64,
    pub ordered_items: Vec<Activity<Note>>,
}

// =============================================================================
// Outbound activities
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    #[serde(rename = "type")]
    pub kind: String,
    pub href: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub published: String,
    pub url: String,
    pub attributed_to: String,
    pub in_reply_to: Option<String>,
    pub content: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Mention>,
}

/// The Follow carried inside an Accept
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub object: String,
}

/// Generic outbound activity wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity<T> {
    #[serde(rename = "@context")]
    pub context: Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub object: T,
}

impl<T> Activity<T> {
    pub fn new(kind: &str, id: String, actor: String, object: T) -> Self {
        Self {
            context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: kind.to_string(),
            actor,
            published: None,
            to: Vec::new(),
            cc: Vec::new(),
            object,
        }
    }
}

/// `@context` used on actor documents
pub fn actor_context() -> Vec<String> {
    vec![
        ACTIVITY_STREAMS_CONTEXT.to_string(),
        SECURITY_CONTEXT.to_string(),
    ]
}

// =============================================================================
// Inbound activities
// =============================================================================

/// First decoding step: just enough to route and authorize
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "id_or_object")]
    pub actor: String,
}

/// Second decoding step, chosen by the envelope's type tag
#[derive(Debug, Clone, PartialEq)]
pub enum InboundActivity {
    Follow(InboundFollow),
    Undo(InboundUndo),
    CreateNote(InboundCreate),
    /// Anything we accept and ignore, with its type tag
    Other(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundFollow {
    pub id: String,
    #[serde(deserialize_with = "id_or_object")]
    pub actor: String,
    #[serde(deserialize_with = "id_or_object")]
    pub object: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundUndo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "id_or_object")]
    pub actor: String,
    pub object: UndoTarget,
}

/// The object of an Undo: usually the embedded activity, sometimes only its id
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UndoTarget {
    Embedded(EmbeddedActivity),
    Reference(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmbeddedActivity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "optional_id_or_object")]
    pub object: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundCreate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "id_or_object")]
    pub actor: String,
    pub object: InboundNote,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundNote {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "optional_id_or_object")]
    pub in_reply_to: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default)]
    pub tag: Vec<InboundTag>,
}

impl InboundNote {
    /// Every URL the note is addressed to or mentions
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .map(String::as_str)
            .chain(
                self.tag
                    .iter()
                    .filter(|t| t.kind == "Mention")
                    .filter_map(|t| t.href.as_deref()),
            )
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundTag {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl InboundActivity {
    /// Decode the full payload once the envelope has been read
    ///
    /// # Errors
    /// Returns the decoder message when the payload does not fit the shape
    /// its type tag promises.
    pub fn decode(envelope: &ActivityEnvelope, payload: Value) -> Result<Self, String> {
        match envelope.kind.as_str() {
            "Follow" => serde_json::from_value(payload)
                .map(InboundActivity::Follow)
                .map_err(|e| format!("malformed Follow: {e}")),
            "Undo" => serde_json::from_value(payload)
                .map(InboundActivity::Undo)
                .map_err(|e| format!("malformed Undo: {e}")),
            "Create" => {
                let object_kind = payload
                    .get("object")
                    .and_then(|o| o.get("type"))
                    .and_then(Value::as_str);
                if object_kind != Some("Note") {
                    return Ok(InboundActivity::Other("Create".to_string()));
                }
                serde_json::from_value(payload)
                    .map(InboundActivity::CreateNote)
                    .map_err(|e| format!("malformed Create: {e}"))
            }
            other => Ok(InboundActivity::Other(other.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdOrObject {
    Id(String),
    Object { id: String },
}

fn id_or_object<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdOrObject::deserialize(deserializer)? {
        IdOrObject::Id(id) | IdOrObject::Object { id } => id,
    })
}

fn optional_id_or_object<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<IdOrObject>::deserialize(deserializer)?.map(|value| match value {
            IdOrObject::Id(id) | IdOrObject::Object { id } => id,
        }),
    )
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(payload: Value) -> Result<InboundActivity, String> {
        let envelope: ActivityEnvelope = serde_json::from_value(payload.clone()).unwrap();
        InboundActivity::decode(&envelope, payload)
    }

    #[test]
    fn test_decodes_follow_with_object_as_url() {
        let activity = decode(json!({
            "id": "https://remote.example/follows/1",
            "type": "Follow",
            "actor": "https://remote.example/users/alice",
            "object": "https://parrot.example/u/blog"
        }))
        .unwrap();

        assert_eq!(
            activity,
            InboundActivity::Follow(InboundFollow {
                id: "https://remote.example/follows/1".to_string(),
                actor: "https://remote.example/users/alice".to_string(),
                object: "https://parrot.example/u/blog".to_string(),
            })
        );
    }

    #[test]
    fn test_decodes_undo_with_embedded_follow() {
        let activity = decode(json!({
            "id": "https://remote.example/undo/1",
            "type": "Undo",
            "actor": {"id": "https://remote.example/users/alice"},
            "object": {
                "id": "https://remote.example/follows/1",
                "type": "Follow",
                "actor": "https://remote.example/users/alice",
                "object": {"id": "https://parrot.example/u/blog"}
            }
        }))
        .unwrap();

        let InboundActivity::Undo(undo) = activity else {
            panic!("expected Undo");
        };
        assert_eq!(undo.actor, "https://remote.example/users/alice");
        let UndoTarget::Embedded(inner) = undo.object else {
            panic!("expected embedded object");
        };
        assert_eq!(inner.kind, "Follow");
        assert_eq!(inner.object.as_deref(), Some("https://parrot.example/u/blog"));
    }

    #[test]
    fn test_decodes_create_note_and_collects_recipients() {
        let activity = decode(json!({
            "id": "https://remote.example/notes/1/activity",
            "type": "Create",
            "actor": "https://remote.example/users/alice",
            "object": {
                "id": "https://remote.example/notes/1",
                "type": "Note",
                "content": "<p>hello</p>",
                "to": "https://parrot.example/u/birb",
                "tag": [
                    {"type": "Mention", "href": "https://parrot.example/u/birb", "name": "@birb"},
                    {"type": "Hashtag", "href": "https://remote.example/tags/x", "name": "#x"}
                ]
            }
        }))
        .unwrap();

        let InboundActivity::CreateNote(create) = activity else {
            panic!("expected CreateNote");
        };
        let recipients: Vec<&str> = create.object.recipients().collect();
        assert_eq!(
            recipients,
            vec!["https://parrot.example/u/birb", "https://parrot.example/u/birb"]
        );
    }

    #[test]
    fn test_create_of_non_note_is_other() {
        let activity = decode(json!({
            "type": "Create",
            "actor": "https://remote.example/users/alice",
            "object": {"id": "https://remote.example/q/1", "type": "Question"}
        }))
        .unwrap();
        assert_eq!(activity, InboundActivity::Other("Create".to_string()));
    }

    #[test]
    fn test_unknown_types_are_other() {
        let activity = decode(json!({
            "type": "Like",
            "actor": "https://remote.example/users/alice",
            "object": "https://parrot.example/u/blog/status/1"
        }))
        .unwrap();
        assert_eq!(activity, InboundActivity::Other("Like".to_string()));
    }

    #[test]
    fn test_malformed_follow_is_reported() {
        let error = decode(json!({
            "type": "Follow",
            "actor": "https://remote.example/users/alice"
        }))
        .unwrap_err();
        assert!(error.contains("malformed Follow"));
    }

    #[test]
    fn test_envelope_requires_actor() {
        let result = serde_json::from_value::<ActivityEnvelope>(json!({"type": "Follow"}));
        assert!(result.is_err());
    }
}
