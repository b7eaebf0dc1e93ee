use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Key in [`PredefinedTopics`] whose entries apply to every client.
pub const ANY_CLIENT: &str = "*";

/// Per-handler knobs, built by the embedding process (usually from its own
/// config file) and shared by every handler it spawns.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Require an AUTH exchange between CONNECT and the upstream dial-through.
    pub auth_enabled: bool,
    /// Spacing between retransmissions of an unacknowledged message.
    pub retry_delay: Duration,
    /// Retransmissions after the initial send before a transaction fails.
    pub retry_count: u16,
    /// Bound on the whole CONNECT exchange. The broker only watches
    /// liveness once the session is up, so until then the gateway has to
    /// bound a half-open CONNECT itself.
    pub connect_timeout: Duration,
    /// Gateway id reported in GWINFO answers to SEARCHGW.
    pub gateway_id: u8,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            retry_delay: Duration::from_secs(5),
            retry_count: 4,
            connect_timeout: Duration::from_secs(10),
            gateway_id: 1,
        }
    }
}

/// Topic ids agreed out of band, `client id -> (topic id -> topic name)`.
///
/// Entries under [`ANY_CLIENT`] apply to every client; a client's own
/// entries shadow them. The handler flattens the relevant slices into its
/// topic registry, once at startup for the wildcard part and again when
/// CONNECT reveals the client id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredefinedTopics(pub HashMap<String, HashMap<u16, String>>);

impl PredefinedTopics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one mapping; `client_id` may be [`ANY_CLIENT`].
    pub fn insert(&mut self, client_id: impl Into<String>, topic_id: u16, topic: impl Into<String>) {
        self.0
            .entry(client_id.into())
            .or_default()
            .insert(topic_id, topic.into());
    }

    /// The id→name slice visible to `client_id`, wildcard entries included
    /// and shadowed by the client's own.
    #[must_use]
    pub(crate) fn flatten(&self, client_id: Option<&str>) -> HashMap<u16, String> {
        let mut flat = self.0.get(ANY_CLIENT).cloned().unwrap_or_default();
        if let Some(client_id) = client_id {
            if let Some(own) = self.0.get(client_id) {
                for (id, topic) in own {
                    flat.insert(*id, topic.clone());
                }
            }
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_entries_shadow_wildcard() {
        let mut topics = PredefinedTopics::new();
        topics.insert(ANY_CLIENT, 1, "common/one");
        topics.insert(ANY_CLIENT, 2, "common/two");
        topics.insert("test-client", 1, "own/one");

        let flat = topics.flatten(Some("test-client"));
        assert_eq!(flat[&1], "own/one");
        assert_eq!(flat[&2], "common/two");

        let anon = topics.flatten(None);
        assert_eq!(anon[&1], "common/one");
    }

    #[test]
    fn deserializes_from_json_map() {
        let json = r#"{"*": {"123": "test/topic"}, "test-client": {"7": "own/topic"}}"#;
        let topics: PredefinedTopics = serde_json::from_str(json).unwrap();
        assert_eq!(topics.flatten(Some("test-client"))[&123], "test/topic");
        assert_eq!(topics.flatten(Some("test-client"))[&7], "own/topic");
    }

    #[test]
    fn defaults_are_production_shaped() {
        let cfg = HandlerConfig::default();
        assert!(!cfg.auth_enabled);
        assert!(cfg.retry_count > 0);
        assert!(cfg.connect_timeout > cfg.retry_delay);
    }
}
