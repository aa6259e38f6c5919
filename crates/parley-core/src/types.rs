use std::fmt;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

/// Format used to derive a session id from its creation time.
pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Local>,
}

/// A turn stripped down to what the language model sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ContextMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// One conversation, as held in memory and as written to the session store.
///
/// Serialized field names match the on-disk collection format: `id`,
/// `timestamp`, `duration`, `messages` and `total_interactions`.
/// Records written by older tools, with naive ISO session timestamps and
/// `HH:MM:SS` message times, are read as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord")]
pub struct Session {
    pub id: String,
    /// When the session started.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Local>,
    /// Wall-clock seconds the session has been live, refreshed on every save.
    #[serde(default)]
    pub duration: f64,
    #[serde(rename = "messages", default)]
    pub turns: Vec<Turn>,
    /// Number of assistant turns appended.
    #[serde(rename = "total_interactions", default)]
    pub interaction_count: u32,
    /// Start of the current live stretch. `None` for records read from disk
    /// that have not been resumed.
    #[serde(skip)]
    live_since: Option<DateTime<Local>>,
    /// Duration accumulated before the current live stretch.
    #[serde(skip)]
    carried_secs: f64,
}

impl Session {
    /// Create an empty live session with the given id.
    pub fn new(id: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            duration: 0.0,
            turns: Vec::new(),
            interaction_count: 0,
            live_since: Some(now),
            carried_secs: 0.0,
        }
    }

    /// Derive the default session id for a creation time.
    pub fn id_for(now: DateTime<Local>) -> String {
        now.format(SESSION_ID_FORMAT).to_string()
    }

    /// Append a turn. Only assistant turns count as interactions.
    pub fn push_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
        at: DateTime<Local>,
    ) -> &Turn {
        if self.turns.is_empty() {
            self.created_at = at;
        }
        self.turns.push(Turn {
            role,
            content: content.into(),
            timestamp: at,
        });
        if role == Role::Assistant {
            self.interaction_count += 1;
        }
        &self.turns[self.turns.len() - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.live_since.is_some()
    }

    /// Mark a stored session as live again. Time already recorded in
    /// `duration` is kept and further elapsed time is added on top.
    pub fn resume(&mut self, now: DateTime<Local>) {
        self.carried_secs = self.duration;
        self.live_since = Some(now);
    }

    /// Seconds the session has been live as of `now`.
    pub fn elapsed_secs(&self, now: DateTime<Local>) -> f64 {
        match self.live_since {
            Some(since) => {
                let live = (now - since).num_milliseconds().max(0) as f64 / 1000.0;
                self.carried_secs + live
            }
            None => self.duration,
        }
    }

    /// Recompute `duration` from the live clock.
    pub fn refresh_duration(&mut self, now: DateTime<Local>) {
        self.duration = self.elapsed_secs(now);
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.turns.iter().filter(|t| t.role == role).count()
    }

    /// The last `window` turns in conversation order, without timestamps.
    pub fn context_window(&self, window: usize) -> Vec<ContextMessage> {
        let start = self.turns.len().saturating_sub(window);
        self.turns[start..].iter().map(ContextMessage::from).collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            started_at: self.created_at,
            message_count: self.turns.len(),
            interaction_count: self.interaction_count,
            duration_secs: self.duration,
        }
    }
}

/// Wire form of a session with timestamps still as text.
#[derive(Deserialize)]
struct SessionRecord {
    id: String,
    timestamp: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    messages: Vec<TurnRecord>,
    #[serde(default)]
    total_interactions: u32,
}

#[derive(Deserialize)]
struct TurnRecord {
    role: Role,
    content: String,
    timestamp: String,
}

impl TryFrom<SessionRecord> for Session {
    type Error = String;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        let created_at = parse_timestamp(&record.timestamp)
            .ok_or_else(|| format!("invalid session timestamp: {:?}", record.timestamp))?;
        let turns = record
            .messages
            .into_iter()
            .map(|m| -> Result<Turn, String> {
                let timestamp = parse_timestamp(&m.timestamp)
                    .or_else(|| parse_clock_time(&m.timestamp, created_at))
                    .ok_or_else(|| format!("invalid message timestamp: {:?}", m.timestamp))?;
                Ok(Turn {
                    role: m.role,
                    content: m.content,
                    timestamp,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Session {
            id: record.id,
            created_at,
            duration: record.duration,
            turns,
            interaction_count: record.total_interactions,
            live_since: None,
            carried_secs: 0.0,
        })
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO datetime taken as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(local_from_naive)
}

/// Parse a bare `HH:MM:SS` time on the day of `anchor`. A time later than
/// the anchor belongs to the day before.
fn parse_clock_time(raw: &str, anchor: DateTime<Local>) -> Option<DateTime<Local>> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f").ok()?;
    let date: NaiveDate = anchor.date_naive();
    let at = local_from_naive(date.and_time(time));
    if at > anchor {
        Some(at - Duration::days(1))
    } else {
        Some(at)
    }
}

fn local_from_naive(naive: NaiveDateTime) -> DateTime<Local> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {:?}", raw)))
}

/// Lightweight listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub message_count: usize,
    pub interaction_count: u32,
    pub duration_secs: f64,
}

impl SessionSummary {
    /// Short label such as `"Mar 04, 14:05 (6 msgs)"`.
    pub fn label(&self) -> String {
        format!(
            "{} ({} msgs)",
            self.started_at.format("%b %d, %H:%M"),
            self.message_count
        )
    }
}

/// Render seconds as `"Xm Ys"`.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}m {}s", total / 60, total % 60)
}

// =============================================================================
// Tests
// =============================================================================
