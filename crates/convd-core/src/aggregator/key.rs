use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task_db::OwnerId;

/// Identifies one stream of related inbound files.
///
/// Each variant is its own domain, so a chat burst and an album of the same owner
/// never share a collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionKey {
    /// Loose files sent one after another.
    Chat { owner: OwnerId },
    /// Files the messaging platform grouped into one album.
    Album { owner: OwnerId, group_id: String },
    /// A batch whose size the user declared up front.
    Manual { owner: OwnerId },
}

impl CollectionKey {
    pub fn owner(&self) -> OwnerId {
        match self {
            CollectionKey::Chat { owner }
            | CollectionKey::Album { owner, .. }
            | CollectionKey::Manual { owner } => *owner,
        }
    }

    pub fn is_album(&self) -> bool {
        matches!(self, CollectionKey::Album { .. })
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, CollectionKey::Manual { .. })
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Chat { owner } => write!(f, "chat:{owner}"),
            CollectionKey::Album { owner, group_id } => write!(f, "album:{owner}:{group_id}"),
            CollectionKey::Manual { owner } => write!(f, "manual:{owner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_of_different_kinds_never_collide() {
        let chat = CollectionKey::Chat { owner: 1 };
        let manual = CollectionKey::Manual { owner: 1 };
        assert_ne!(chat, manual);
        assert_eq!(chat.owner(), manual.owner());
        assert_eq!(chat.to_string(), "chat:1");
    }

    #[test]
    fn key_json_shape() {
        let key = CollectionKey::Album {
            owner: 9,
            group_id: "abc".into(),
        };
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"kind":"album","owner":9,"group_id":"abc"}"#);
        assert_eq!(serde_json::from_str::<CollectionKey>(&json).unwrap(), key);
    }
}
