use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;

pub type EventId = String;
pub type Timestamp = u64;

/// A relay event. `id` is the content hash of the event's commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: String,
    pub created_at: Timestamp,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn new(
        pubkey: impl Into<String>,
        created_at: Timestamp,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        let pubkey = pubkey.into();
        let content = content.into();
        let id = compute_event_id(&pubkey, created_at, kind, &tags, &content);
        Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        }
    }

    /// Recomputes the content hash and compares it with `id`.
    pub fn verify_id(&self) -> bool {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ) == self.id
    }

    fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

pub fn compute_event_id(
    pubkey: &str,
    created_at: Timestamp,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let commitment = json!([0, pubkey, created_at, kind, tags, content]);
    blake3::hash(commitment.to_string().as_bytes())
        .to_hex()
        .to_string()
}

/// Current Unix time in seconds.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// A query as sent to a relay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    /// Tag filters keyed by `#<name>`.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Relay-side matching. `since` and `until` are inclusive; `limit` is not
    /// considered here.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|prefix| event.id.starts_with(prefix.as_str())) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors
                .iter()
                .any(|prefix| event.pubkey.starts_with(prefix.as_str()))
            {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        for (key, wanted) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            if !event
                .tag_values(name)
                .any(|value| wanted.iter().any(|w| w == value))
            {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        true
    }
}

/// A caller-supplied filter: a [`Filter`] without `since`, `until` and
/// `limit`, which are owned by the pagination loop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl FetchFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = u16>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn authors<S: Into<String>>(authors: impl IntoIterator<Item = S>) -> Self {
        Self {
            authors: Some(authors.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn tag<S: Into<String>>(mut self, name: char, values: impl IntoIterator<Item = S>) -> Self {
        self.tags.insert(
            format!("#{name}"),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Builds one page's query: the range's lower bound is merged in, `until`
    /// and `limit` are set explicitly.
    pub fn to_page_filter(&self, range: &FetchRange, until: Timestamp, limit: usize) -> Filter {
        Filter {
            ids: self.ids.clone(),
            authors: self.authors.clone(),
            kinds: self.kinds.clone(),
            tags: self.tags.clone(),
            since: range.since,
            until: Some(until),
            limit: Some(limit),
        }
    }
}

/// Time bounds for a whole retrieval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
}

impl FetchRange {
    pub fn new(since: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        Self { since, until }
    }
}
