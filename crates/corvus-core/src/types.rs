use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A workspace/conversation identity: owns a system prompt, a user model,
/// skills, and an IPC namespace. Uniquely named; exactly one group (`main`)
/// carries elevated write privileges over the knowledge store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The privileged group name.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == "main"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel-qualified chat identifier, e.g. `tg:123456`, `wa:1234@s.whatsapp.net`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(channel: &str, native_id: &str) -> Self {
        Self(format!("{channel}:{native_id}"))
    }

    /// The channel prefix before the first `:`, e.g. `"tg"`.
    pub fn channel(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque container identifier assigned on spawn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue entry priority. Ordering is derived: `High < Normal < Low` so that
/// sorting a min-heap of `(Priority, enqueued_at)` yields high priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// The routing verdict emitted by the query router for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Inline,
    KnowledgeOnly,
    ContainerShort,
    ContainerFull,
}

impl Tier {
    /// Whether this tier requires a container acquisition.
    pub fn needs_container(&self) -> bool {
        matches!(self, Self::ContainerShort | Self::ContainerFull)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::KnowledgeOnly => write!(f, "knowledge_only"),
            Self::ContainerShort => write!(f, "container_short"),
            Self::ContainerFull => write!(f, "container_full"),
        }
    }
}

/// The dimension along which a knowledge document is scoped and decayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    UserModel,
    Procedural,
    Semantic,
    Episodic,
    Working,
}

impl MemoryLayer {
    /// Working-layer entries are session-scoped and never persisted across
    /// session boundaries.
    pub fn is_session_scoped(&self) -> bool {
        matches!(self, Self::Working)
    }

    /// Semantic-layer entries are visible regardless of which group/session
    /// is asking.
    pub fn is_globally_visible(&self) -> bool {
        matches!(self, Self::Semantic)
    }
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserModel => write!(f, "user_model"),
            Self::Procedural => write!(f, "procedural"),
            Self::Semantic => write!(f, "semantic"),
            Self::Episodic => write!(f, "episodic"),
            Self::Working => write!(f, "working"),
        }
    }
}

impl std::str::FromStr for MemoryLayer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_model" => Ok(Self::UserModel),
            "procedural" => Ok(Self::Procedural),
            "semantic" => Ok(Self::Semantic),
            "episodic" => Ok(Self::Episodic),
            "working" => Ok(Self::Working),
            other => Err(format!("unknown memory layer: {other}")),
        }
    }
}

/// Knowledge document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Learning,
    Principle,
    Retrospective,
    Decision,
    Thread,
    Trace,
    UserModel,
    Procedural,
    ConversationSummary,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Learning => "learning",
            Self::Principle => "principle",
            Self::Retrospective => "retrospective",
            Self::Decision => "decision",
            Self::Thread => "thread",
            Self::Trace => "trace",
            Self::UserModel => "user_model",
            Self::Procedural => "procedural",
            Self::ConversationSummary => "conversation_summary",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "learning" => Ok(Self::Learning),
            "principle" => Ok(Self::Principle),
            "retrospective" => Ok(Self::Retrospective),
            "decision" => Ok(Self::Decision),
            "thread" => Ok(Self::Thread),
            "trace" => Ok(Self::Trace),
            "user_model" => Ok(Self::UserModel),
            "procedural" => Ok(Self::Procedural),
            "conversation_summary" => Ok(Self::ConversationSummary),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// Who authored a knowledge document — governs what re-indexing may delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    Indexer,
    LearnApi,
    Manual,
}

impl fmt::Display for CreatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexer => write!(f, "indexer"),
            Self::LearnApi => write!(f, "learn_api"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for CreatedBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "indexer" => Ok(Self::Indexer),
            "learn_api" => Ok(Self::LearnApi),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown created_by: {other}")),
        }
    }
}

/// Per-request cost record attached to every orchestrator outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub tier: Tier,
    pub model: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_estimate: f64,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_high_first() {
        let mut v = vec![Priority::Low, Priority::High, Priority::Normal];
        v.sort();
        assert_eq!(v, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn chat_id_channel_prefix() {
        let id = ChatId::new("tg", "123456");
        assert_eq!(id.channel(), "tg");
        assert_eq!(id.as_str(), "tg:123456");
    }

    #[test]
    fn memory_layer_round_trips_through_display_and_from_str() {
        for layer in [
            MemoryLayer::UserModel,
            MemoryLayer::Procedural,
            MemoryLayer::Semantic,
            MemoryLayer::Episodic,
            MemoryLayer::Working,
        ] {
            let s = layer.to_string();
            assert_eq!(s.parse::<MemoryLayer>().unwrap(), layer);
        }
    }

    #[test]
    fn working_layer_is_session_scoped_others_are_not() {
        assert!(MemoryLayer::Working.is_session_scoped());
        assert!(!MemoryLayer::Semantic.is_session_scoped());
        assert!(MemoryLayer::Semantic.is_globally_visible());
    }

    #[test]
    fn group_main_is_main() {
        assert!(GroupId::main().is_main());
        assert!(!GroupId::new("side-project").is_main());
    }
}
