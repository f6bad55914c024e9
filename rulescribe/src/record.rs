//! Game record model.
//!
//! Two shapes live here. [`Payload`] is the untyped JSON object the model
//! produces; the generator, critic and validator work on payloads so that
//! type violations stay observable. [`GameRecord`] is the typed entity the
//! repository stores, built from a payload only after validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Untyped model output.
pub type Payload = Map<String, Value>;

/// Fields the model is asked to fill, in prompt order.
pub const GENERATED_FIELDS: [&str; 18] = [
    "slug",
    "title",
    "title_ja",
    "title_en",
    "summary",
    "rules_content",
    "description",
    "image_url",
    "min_players",
    "max_players",
    "play_time",
    "min_age",
    "published_year",
    "official_url",
    "bgg_url",
    "bga_url",
    "amazon_url",
    "structured_data",
];

/// Integer facets.
pub const INT_FIELDS: [&str; 5] = [
    "min_players",
    "max_players",
    "play_time",
    "min_age",
    "published_year",
];

/// Fields whose before/after values are written to the audit trail.
pub const AUDIT_FIELDS: [&str; 17] = [
    "slug",
    "title",
    "title_ja",
    "title_en",
    "summary",
    "description",
    "rules_content",
    "image_url",
    "min_players",
    "max_players",
    "play_time",
    "min_age",
    "published_year",
    "official_url",
    "bgg_url",
    "bga_url",
    "amazon_url",
];

/// The three link fields the resolution engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkField {
    #[serde(rename = "official_url")]
    Official,
    #[serde(rename = "amazon_url")]
    Amazon,
    #[serde(rename = "image_url")]
    Image,
}

impl LinkField {
    pub const ALL: [LinkField; 3] = [LinkField::Official, LinkField::Amazon, LinkField::Image];

    /// Column / JSON key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkField::Official => "official_url",
            LinkField::Amazon => "amazon_url",
            LinkField::Image => "image_url",
        }
    }
}

impl std::fmt::Display for LinkField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A game term explained for newcomers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub description: String,
}

/// A component or mechanic worth highlighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyElement {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

/// Structured extras shown next to the rules text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    #[serde(default)]
    pub key_elements: Vec<KeyElement>,
    #[serde(default)]
    pub mechanics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_player_count: Option<String>,
}

/// Canonical board game entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_ja: Option<String>,
    #[serde(default)]
    pub title_en: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules_content: Option<String>,

    #[serde(default)]
    pub min_players: Option<i64>,
    #[serde(default)]
    pub max_players: Option<i64>,
    #[serde(default)]
    pub play_time: Option<i64>,
    #[serde(default)]
    pub min_age: Option<i64>,
    #[serde(default)]
    pub published_year: Option<i64>,

    #[serde(default)]
    pub official_url: Option<String>,
    #[serde(default)]
    pub bgg_url: Option<String>,
    #[serde(default)]
    pub bga_url: Option<String>,
    #[serde(default)]
    pub amazon_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub structured_data: Option<StructuredData>,

    #[serde(default, deserialize_with = "deserialize_counter")]
    pub data_version: i64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_counter")]
    pub view_count: i64,
}

/// Stores hand back integer or UUID ids; keep both as strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Nullable integer columns default to zero.
fn deserialize_counter<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

fn text(payload: &Payload, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn integer(payload: &Payload, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}

impl GameRecord {
    /// Build a record from a validated payload, field by field.
    ///
    /// Unknown keys are ignored. A `structured_data` value that does not
    /// match the expected shape is dropped.
    pub fn from_payload(payload: &Payload) -> Self {
        let structured_data = payload
            .get("structured_data")
            .filter(|v| !v.is_null())
            .and_then(|v| match serde_json::from_value::<StructuredData>(v.clone()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed structured_data");
                    None
                }
            });

        let mut record = Self {
            id: None,
            slug: text(payload, "slug"),
            source_url: text(payload, "source_url"),
            title: text(payload, "title").unwrap_or_default(),
            title_ja: text(payload, "title_ja"),
            title_en: text(payload, "title_en"),
            summary: text(payload, "summary"),
            description: text(payload, "description"),
            rules_content: text(payload, "rules_content"),
            min_players: integer(payload, "min_players"),
            max_players: integer(payload, "max_players"),
            play_time: integer(payload, "play_time"),
            min_age: integer(payload, "min_age"),
            published_year: integer(payload, "published_year"),
            official_url: text(payload, "official_url"),
            bgg_url: text(payload, "bgg_url"),
            bga_url: text(payload, "bga_url"),
            amazon_url: text(payload, "amazon_url"),
            image_url: text(payload, "image_url"),
            structured_data,
            data_version: 0,
            updated_at: None,
            view_count: 0,
        };
        record.normalize_links();
        record
    }

    /// Fill gaps from the stored version of the same game.
    ///
    /// Precedence: identity and bookkeeping (`id`, `slug`, `source_url`,
    /// `view_count`, `data_version`, `updated_at`) always come from
    /// `existing`; every other field keeps its own value when present and
    /// falls back to `existing` otherwise.
    pub fn inherit_from(&mut self, existing: &GameRecord) {
        fn fill<T: Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
            if slot.is_none() {
                *slot = fallback.clone();
            }
        }

        self.id = existing.id.clone();
        if existing.slug.is_some() {
            self.slug = existing.slug.clone();
        }
        fill(&mut self.source_url, &existing.source_url);
        self.view_count = existing.view_count;
        self.data_version = existing.data_version;
        self.updated_at = existing.updated_at;

        if self.title.is_empty() {
            self.title = existing.title.clone();
        }
        fill(&mut self.title_ja, &existing.title_ja);
        fill(&mut self.title_en, &existing.title_en);
        fill(&mut self.summary, &existing.summary);
        fill(&mut self.description, &existing.description);
        fill(&mut self.rules_content, &existing.rules_content);
        fill(&mut self.min_players, &existing.min_players);
        fill(&mut self.max_players, &existing.max_players);
        fill(&mut self.play_time, &existing.play_time);
        fill(&mut self.min_age, &existing.min_age);
        fill(&mut self.published_year, &existing.published_year);
        fill(&mut self.official_url, &existing.official_url);
        fill(&mut self.bgg_url, &existing.bgg_url);
        fill(&mut self.bga_url, &existing.bga_url);
        fill(&mut self.amazon_url, &existing.amazon_url);
        fill(&mut self.image_url, &existing.image_url);
        fill(&mut self.structured_data, &existing.structured_data);
    }

    /// Current value of a tracked link.
    pub fn link(&self, field: LinkField) -> Option<&str> {
        match field {
            LinkField::Official => self.official_url.as_deref(),
            LinkField::Amazon => self.amazon_url.as_deref(),
            LinkField::Image => self.image_url.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }

    /// Overwrite a tracked link. Only link fields can be touched this way.
    pub fn set_link(&mut self, field: LinkField, value: Option<String>) {
        let slot = match field {
            LinkField::Official => &mut self.official_url,
            LinkField::Amazon => &mut self.amazon_url,
            LinkField::Image => &mut self.image_url,
        };
        *slot = value.filter(|s| !s.trim().is_empty());
    }

    /// Tracked links that are currently empty.
    pub fn missing_links(&self) -> Vec<LinkField> {
        LinkField::ALL
            .into_iter()
            .filter(|f| self.link(*f).is_none())
            .collect()
    }

    /// Empty link strings become `None` before anything is stored.
    pub fn normalize_links(&mut self) {
        for slot in [
            &mut self.official_url,
            &mut self.bgg_url,
            &mut self.bga_url,
            &mut self.amazon_url,
            &mut self.image_url,
            &mut self.source_url,
        ] {
            if slot.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *slot = None;
            }
        }
    }

    /// Lower-cased, de-duplicated title variants used for page matching.
    pub fn title_variants(&self) -> Vec<String> {
        let mut variants: Vec<String> = Vec::new();
        for title in [Some(&self.title), self.title_ja.as_ref(), self.title_en.as_ref()]
            .into_iter()
            .flatten()
        {
            let lowered = title.trim().to_lowercase();
            if !lowered.is_empty() && !variants.contains(&lowered) {
                variants.push(lowered);
            }
        }
        variants
    }

    /// One-line description used as generation context.
    pub fn context_line(&self) -> String {
        format!(
            "{} ({}): {}",
            self.title,
            self.title_ja.as_deref().unwrap_or("-"),
            self.summary.as_deref().unwrap_or("")
        )
    }

    /// JSON object view of the record, for diffs and prompts.
    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}
