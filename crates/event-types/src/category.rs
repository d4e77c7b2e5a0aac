//! Record categories and the category ↔ topic name registry.

use crate::error::EventTypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of platform event a record describes.
///
/// Each category is published to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Message,
    Reaction,
    Member,
    Presence,
    Stream,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Message,
        Category::Reaction,
        Category::Member,
        Category::Presence,
        Category::Stream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Message => "message",
            Category::Reaction => "reaction",
            Category::Member => "member",
            Category::Presence => "presence",
            Category::Stream => "stream",
        }
    }

    /// Whether the consumer subscribes to this category's topic.
    ///
    /// Stream records are produced for other readers of the log; the
    /// consumer has no handler for them.
    pub fn is_consumed(&self) -> bool {
        !matches!(self, Category::Stream)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EventTypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Category::Message),
            "reaction" => Ok(Category::Reaction),
            "member" => Ok(Category::Member),
            "presence" => Ok(Category::Presence),
            "stream" => Ok(Category::Stream),
            other => Err(EventTypesError::UnknownCategory(other.to_string())),
        }
    }
}

/// Topic names per category.
///
/// The registry is the single place that maps a category to its topic and a
/// topic read from the log back to its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegistry {
    pub messages: String,
    pub reactions: String,
    pub members: String,
    pub presences: String,
    pub streams: String,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self {
            messages: "discord.messages".to_string(),
            reactions: "discord.reactions".to_string(),
            members: "discord.members".to_string(),
            presences: "discord.presences".to_string(),
            streams: "discord.streams".to_string(),
        }
    }
}

impl TopicRegistry {
    /// Topic name for a category.
    pub fn topic(&self, category: Category) -> &str {
        match category {
            Category::Message => &self.messages,
            Category::Reaction => &self.reactions,
            Category::Member => &self.members,
            Category::Presence => &self.presences,
            Category::Stream => &self.streams,
        }
    }

    /// Category of a topic, or `None` if the topic is not registered.
    pub fn category_of(&self, topic: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| self.topic(*category) == topic)
    }

    /// Topics the consumer subscribes to.
    pub fn consumed_topics(&self) -> Vec<String> {
        Category::ALL
            .into_iter()
            .filter(Category::is_consumed)
            .map(|category| self.topic(category).to_string())
            .collect()
    }

    /// Every topic, including producer-only ones. This is the set provisioned
    /// at startup.
    pub fn all_topics(&self) -> Vec<String> {
        Category::ALL
            .into_iter()
            .map(|category| self.topic(category).to_string())
            .collect()
    }
}
