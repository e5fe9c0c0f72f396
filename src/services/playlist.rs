//! Named playlists of audio keys

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistNode {
    pub key: String,
    /// Play cap in milliseconds, 0 to play to completion
    pub duration_ms: u64,
}

impl PlaylistNode {
    pub fn new(key: &str, duration_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            duration_ms,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaylistRegistry {
    playlists: DashMap<String, Vec<PlaylistNode>>,
}

impl PlaylistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a playlist
    pub fn create(&self, name: &str, nodes: Vec<PlaylistNode>) {
        self.playlists.insert(name.to_string(), nodes);
    }

    pub fn append(&self, name: &str, node: PlaylistNode) {
        self.playlists.entry(name.to_string()).or_default().push(node);
    }

    pub fn prepend(&self, name: &str, node: PlaylistNode) {
        self.playlists.entry(name.to_string()).or_default().insert(0, node);
    }

    pub fn get(&self, name: &str) -> Option<Vec<PlaylistNode>> {
        self.playlists.get(name).map(|p| p.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.playlists.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.playlists.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.playlists.iter().map(|p| p.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_playlist() {
        let playlists = PlaylistRegistry::new();
        playlists.append("intro", PlaylistNode::new("greeting", 0));
        playlists.append("intro", PlaylistNode::new("click", 100));
        playlists.prepend("intro", PlaylistNode::new("ringback", 2000));

        let nodes = playlists.get("intro").unwrap();
        let keys: Vec<&str> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["ringback", "greeting", "click"]);
        assert_eq!(nodes[0].duration_ms, 2000);
    }

    #[test]
    fn test_replace_and_remove() {
        let playlists = PlaylistRegistry::new();
        playlists.create("a", vec![PlaylistNode::new("x", 0)]);
        playlists.create("a", vec![PlaylistNode::new("y", 0)]);
        playlists.create("b", Vec::new());

        assert_eq!(playlists.get("a").unwrap(), vec![PlaylistNode::new("y", 0)]);
        assert_eq!(playlists.names(), vec!["a", "b"]);
        assert!(playlists.remove("b"));
        assert!(!playlists.contains("b"));
        assert_eq!(playlists.len(), 1);
    }
}
