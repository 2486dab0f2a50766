/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire-level contract with the hosted data service: entity names, filter and
//! ordering terms, and the tagged change events delivered by the realtime
//! feed. No I/O lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables exposed by the remote data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Profiles,
    Posts,
    Stories,
    StoryViews,
    StoryLikes,
    StoryComments,
    Comments,
    CommentLikes,
    Likes,
    Follows,
    Notifications,
    PinnedPosts,
}

impl Entity {
    pub fn table_name(&self) -> &'static str {
        match self {
            Entity::Profiles => "profiles",
            Entity::Posts => "posts",
            Entity::Stories => "stories",
            Entity::StoryViews => "story_views",
            Entity::StoryLikes => "story_likes",
            Entity::StoryComments => "story_comments",
            Entity::Comments => "comments",
            Entity::CommentLikes => "comment_likes",
            Entity::Likes => "likes",
            Entity::Follows => "follows",
            Entity::Notifications => "notifications",
            Entity::PinnedPosts => "pinned_posts",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        match name {
            "profiles" => Some(Entity::Profiles),
            "posts" => Some(Entity::Posts),
            "stories" => Some(Entity::Stories),
            "story_views" => Some(Entity::StoryViews),
            "story_likes" => Some(Entity::StoryLikes),
            "story_comments" => Some(Entity::StoryComments),
            "comments" => Some(Entity::Comments),
            "comment_likes" => Some(Entity::CommentLikes),
            "likes" => Some(Entity::Likes),
            "follows" => Some(Entity::Follows),
            "notifications" => Some(Entity::Notifications),
            "pinned_posts" => Some(Entity::PinnedPosts),
            _ => None,
        }
    }
}

/// Row predicates understood by the service. Values are JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    Gt(String, Value),
    Lt(String, Value),
    Ilike(String, String),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::In(c, _)
            | Filter::IsNull(c)
            | Filter::NotNull(c)
            | Filter::Gt(c, _)
            | Filter::Lt(c, _)
            | Filter::Ilike(c, _) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Inserted,
    Updated,
    Deleted,
}

/// One row-level delta from the realtime feed. `record` carries the new row
/// for inserts/updates and the old row (or its key columns) for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub entity: Entity,
    pub record: Value,
}

impl ChangeEvent {
    pub fn new(action: ChangeAction, entity: Entity, record: Value) -> Self {
        Self {
            action,
            entity,
            record,
        }
    }

    /// Convenience accessor for a string column of the carried record.
    pub fn field(&self, column: &str) -> Option<&str> {
        self.record.get(column).and_then(|v| v.as_str())
    }
}

/// The authenticated platform user, as reported by the identity endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub metadata: Value,
}
