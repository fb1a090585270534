use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// --- Geo Types ---

/// A catalog city. Loaded once from a static catalog; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct City {
    pub id: String,
    pub display_name: String,
    pub region_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

// --- Voting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Up,
    Down,
}

impl Polarity {
    pub fn from_upvote(is_upvote: bool) -> Self {
        if is_upvote {
            Polarity::Up
        } else {
            Polarity::Down
        }
    }

    pub fn is_upvote(self) -> bool {
        self == Polarity::Up
    }

    pub fn opposite(self) -> Self {
        match self {
            Polarity::Up => Polarity::Down,
            Polarity::Down => Polarity::Up,
        }
    }

    /// Counter field this polarity increments on posts and weekly stats.
    pub fn counter_field(self) -> &'static str {
        match self {
            Polarity::Up => "upvotes",
            Polarity::Down => "downvotes",
        }
    }
}

impl std::fmt::Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarity::Up => write!(f, "up"),
            Polarity::Down => write!(f, "down"),
        }
    }
}

/// One user's vote on one content item. At most one exists per
/// `(content_id, user_id)`, which is why the document id is derived from both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Vote {
    pub content_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_upvote: bool,
}

impl Vote {
    pub fn doc_id(content_id: &str, user_id: &str) -> String {
        format!("{content_id}_{user_id}")
    }
}

// --- Content ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub city_ids: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub downvotes: i64,
    #[serde(default)]
    pub upvotes_this_week: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub poll_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub city_id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub name: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub rsvps: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location_details: String,
    #[serde(default)]
    pub comment_count: i64,
}

/// A post or an event. Equality is by id only.
#[derive(Debug, Clone)]
pub enum ContentItem {
    Post(Post),
    Event(Event),
}

impl ContentItem {
    pub fn id(&self) -> &str {
        match self {
            ContentItem::Post(p) => &p.id,
            ContentItem::Event(e) => &e.id,
        }
    }

    pub fn author_id(&self) -> &str {
        match self {
            ContentItem::Post(p) => &p.author_id,
            ContentItem::Event(e) => &e.author_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            ContentItem::Post(p) => p.created_at,
            ContentItem::Event(e) => e.created_at,
        }
    }

    pub fn keywords(&self) -> &[String] {
        match self {
            ContentItem::Post(p) => &p.keywords,
            ContentItem::Event(e) => &e.keywords,
        }
    }

    /// City ids this item is reachable through.
    pub fn city_ids(&self) -> Vec<&str> {
        match self {
            ContentItem::Post(p) => p.city_ids.iter().map(String::as_str).collect(),
            ContentItem::Event(e) => vec![e.city_id.as_str()],
        }
    }

    /// The headline text shown for this item (post text or event name).
    pub fn display_text(&self) -> &str {
        match self {
            ContentItem::Post(p) => &p.text,
            ContentItem::Event(e) => &e.name,
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(self, ContentItem::Post(_))
    }
}

impl PartialEq for ContentItem {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ContentItem {}

// --- Weekly stats ---

/// Net votes for one content item within one ISO week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeeklyStat {
    pub id: String,
    pub content_id: String,
    pub week_key: String,
    pub week_start: DateTime<Utc>,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub downvotes: i64,
    #[serde(default)]
    pub city_ids: Vec<String>,
}

impl WeeklyStat {
    /// Deterministic id: one record per `(content_id, week_key)`.
    pub fn doc_id(content_id: &str, week_key: &str) -> String {
        format!("{content_id}_{week_key}")
    }
}

/// ISO week identifier for `at`, e.g. `2026-W42`, plus the Monday 00:00 UTC
/// that starts it.
pub fn iso_week(at: DateTime<Utc>) -> (String, DateTime<Utc>) {
    let week = at.iso_week();
    let key = format!("{}-W{:02}", week.year(), week.week());
    let days_from_monday = at.weekday().num_days_from_monday() as i64;
    let monday = at.date_naive() - Duration::days(days_from_monday);
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    (key, start)
}

// --- Comments ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Comment {
    pub id: String,
    pub content_id: String,
    pub author_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    /// Set when the first reply is written. Never cleared.
    #[serde(default)]
    pub has_children: bool,
}

// --- Polls ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PollOption {
    pub id: String,
    pub poll_id: String,
    pub text: String,
    #[serde(default)]
    pub vote_count: i64,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Poll {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub total_votes: i64,
    #[serde(default)]
    pub linked_content_id: Option<String>,
    /// Stored as separate documents; populated on fetch.
    #[serde(skip)]
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn option_mut(&mut self, option_id: &str) -> Option<&mut PollOption> {
        self.options.iter_mut().find(|o| o.id == option_id)
    }

    /// `sum(option.vote_count) == total_votes`
    pub fn is_consistent(&self) -> bool {
        self.options.iter().map(|o| o.vote_count).sum::<i64>() == self.total_votes
    }

    /// Share of the vote per option in `[0, 1]`, in option order.
    pub fn shares(&self) -> Vec<(&str, f64)> {
        self.options
            .iter()
            .map(|o| {
                let share = if self.total_votes > 0 {
                    o.vote_count as f64 / self.total_votes as f64
                } else {
                    0.0
                };
                (o.id.as_str(), share)
            })
            .collect()
    }
}

// --- Local engagement records ---

/// Key of a record in the on-device record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecordKey {
    Vote(String),
    PollChoice(String),
    Saved(String),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Vote(id) => write!(f, "vote:{id}"),
            RecordKey::PollChoice(id) => write!(f, "poll:{id}"),
            RecordKey::Saved(id) => write!(f, "saved:{id}"),
        }
    }
}

/// On-device engagement state, read on view load to show the user's own
/// votes and saves before remote confirmation arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalEngagementRecord {
    Vote {
        content_id: String,
        is_upvoted: bool,
        cast_at: DateTime<Utc>,
    },
    PollChoice {
        poll_id: String,
        option_id: String,
    },
    Saved {
        saved_id: String,
        is_post: bool,
    },
}

impl LocalEngagementRecord {
    pub fn key(&self) -> RecordKey {
        match self {
            LocalEngagementRecord::Vote { content_id, .. } => RecordKey::Vote(content_id.clone()),
            LocalEngagementRecord::PollChoice { poll_id, .. } => RecordKey::PollChoice(poll_id.clone()),
            LocalEngagementRecord::Saved { saved_id, .. } => RecordKey::Saved(saved_id.clone()),
        }
    }
}
