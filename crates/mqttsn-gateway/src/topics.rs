//! The per-client topic registry: the mutable registered-id table plus the
//! read-only predefined view, with the resolution helpers the handler and
//! transactions share.

use crate::config::PredefinedTopics;
use crate::error::{GatewayError, Result};
use mqttsn_protocol::message::TopicRef;
use mqttsn_protocol::topic::{decode_short_topic, encode_short_topic, is_short_topic};
use mqttsn_protocol::types::{MAX_TOPIC_ID, MIN_TOPIC_ID};
use mqttsn_protocol::TopicIdType;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// How a broker-side delivery should reference its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryRef {
    Predefined(u16),
    Registered(u16),
    Short(u16),
    /// No usable id yet; REGISTER `0` (a fresh id) first.
    Unregistered,
}

struct Inner {
    predefined_by_id: HashMap<u16, String>,
    predefined_by_name: HashMap<String, u16>,
    registered_by_id: HashMap<u16, String>,
    registered_by_name: HashMap<String, u16>,
    next_topic_id: u16,
}

/// Registered topics are a session-long bijection between live ids and live
/// names; predefined topics are immutable once the client id is bound.
pub(crate) struct TopicRegistry {
    config: PredefinedTopics,
    inner: RwLock<Inner>,
}

impl TopicRegistry {
    pub(crate) fn new(config: PredefinedTopics) -> Self {
        // Until CONNECT reveals the client id only wildcard entries apply;
        // that is all the pre-connect QoS -1 path may use anyway.
        let predefined_by_id = config.flatten(None);
        let predefined_by_name = invert(&predefined_by_id);
        Self {
            config,
            inner: RwLock::new(Inner {
                predefined_by_id,
                predefined_by_name,
                registered_by_id: HashMap::new(),
                registered_by_name: HashMap::new(),
                next_topic_id: MIN_TOPIC_ID,
            }),
        }
    }

    /// Installs the client-specific predefined view once CONNECT names the
    /// client.
    pub(crate) fn bind_client(&self, client_id: &str) {
        let by_id = self.config.flatten(Some(client_id));
        let mut inner = self.inner.write();
        inner.predefined_by_name = invert(&by_id);
        inner.predefined_by_id = by_id;
    }

    /// Allocates a fresh id for `name` and installs the mapping, replacing
    /// any previous id the name held. Client REGISTER path.
    pub(crate) fn register(&self, name: &str) -> u16 {
        let mut inner = self.inner.write();
        let id = inner.allocate_id();
        inner.install(id, name.to_owned());
        id
    }

    /// The registered id for `name` if it already has one, else a fresh
    /// registration. Repeat SUBSCRIBEs keep their original id this way.
    pub(crate) fn reuse_or_register(&self, name: &str) -> u16 {
        let mut inner = self.inner.write();
        if let Some(id) = inner.registered_by_name.get(name) {
            return *id;
        }
        let id = inner.allocate_id();
        inner.install(id, name.to_owned());
        id
    }

    /// Allocates an id without installing it; a gateway REGISTER commits it
    /// later via [`TopicRegistry::store`] once the client REGACKs.
    pub(crate) fn allocate_id(&self) -> u16 {
        self.inner.write().allocate_id()
    }

    /// Commits an id↔name mapping (REGACK-accepted gateway REGISTER).
    pub(crate) fn store(&self, id: u16, name: &str) {
        self.inner.write().install(id, name.to_owned());
    }

    pub(crate) fn registered_name(&self, id: u16) -> Option<String> {
        self.inner.read().registered_by_id.get(&id).cloned()
    }

    pub(crate) fn predefined_name(&self, id: u16) -> Option<String> {
        self.inner.read().predefined_by_id.get(&id).cloned()
    }

    /// Topic name for an inbound PUBLISH's (type, id) pair.
    pub(crate) fn resolve_publish(&self, id_type: TopicIdType, topic_id: u16) -> Result<String> {
        let resolved = match id_type {
            TopicIdType::Normal => self.registered_name(topic_id),
            TopicIdType::Predefined => self.predefined_name(topic_id),
            TopicIdType::Short => Some(decode_short_topic(topic_id)),
        };
        resolved.ok_or(GatewayError::UnknownTopic(topic_id))
    }

    /// Topic name for a SUBSCRIBE/UNSUBSCRIBE topic reference.
    pub(crate) fn resolve_filter(&self, topic: &TopicRef) -> Result<String> {
        match topic {
            TopicRef::Name(name) => Ok(name.clone()),
            TopicRef::Predefined(id) => {
                self.predefined_name(*id).ok_or(GatewayError::UnknownTopic(*id))
            }
            TopicRef::Short(id) => Ok(decode_short_topic(*id)),
        }
    }

    /// Picks the id a broker-side delivery on `name` should use, in the
    /// order predefined, already-registered, short, fresh REGISTER.
    pub(crate) fn delivery_ref(&self, name: &str) -> DeliveryRef {
        let inner = self.inner.read();
        if let Some(id) = inner.predefined_by_name.get(name) {
            return DeliveryRef::Predefined(*id);
        }
        if let Some(id) = inner.registered_by_name.get(name) {
            return DeliveryRef::Registered(*id);
        }
        if is_short_topic(name) {
            return DeliveryRef::Short(encode_short_topic(name));
        }
        DeliveryRef::Unregistered
    }
}

impl Inner {
    fn allocate_id(&mut self) -> u16 {
        // Ids are plentiful relative to session lifetimes; walk past any
        // still-live ones instead of tracking frees.
        loop {
            let id = self.next_topic_id;
            self.next_topic_id = if id >= MAX_TOPIC_ID { MIN_TOPIC_ID } else { id + 1 };
            if !self.registered_by_id.contains_key(&id) {
                return id;
            }
        }
    }

    fn install(&mut self, id: u16, name: String) {
        if let Some(old_id) = self.registered_by_name.remove(&name) {
            self.registered_by_id.remove(&old_id);
            debug!(topic = %name, old_id, new_id = id, "re-registered topic");
        }
        if let Some(old_name) = self.registered_by_id.remove(&id) {
            self.registered_by_name.remove(&old_name);
        }
        self.registered_by_id.insert(id, name.clone());
        self.registered_by_name.insert(name, id);
    }
}

fn invert(by_id: &HashMap<u16, String>) -> HashMap<String, u16> {
    by_id.iter().map(|(id, name)| (name.clone(), *id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ANY_CLIENT;

    fn registry_with(entries: &[(&str, u16, &str)]) -> TopicRegistry {
        let mut predefined = PredefinedTopics::new();
        for (client, id, topic) in entries {
            predefined.insert(*client, *id, *topic);
        }
        TopicRegistry::new(predefined)
    }

    #[test]
    fn register_allocates_distinct_ids() {
        let registry = registry_with(&[]);
        let a = registry.register("topic/a");
        let b = registry.register("topic/b");
        assert_ne!(a, b);
        assert_eq!(registry.registered_name(a).unwrap(), "topic/a");
        assert_eq!(registry.registered_name(b).unwrap(), "topic/b");
    }

    #[test]
    fn re_register_replaces_the_old_id() {
        let registry = registry_with(&[]);
        let old = registry.register("topic/a");
        let new = registry.register("topic/a");
        assert_ne!(old, new);
        assert!(registry.registered_name(old).is_none());
        assert_eq!(registry.registered_name(new).unwrap(), "topic/a");
        // Bijection: the name resolves back to exactly the new id.
        assert_eq!(registry.delivery_ref("topic/a"), DeliveryRef::Registered(new));
    }

    #[test]
    fn predefined_only_wildcard_before_bind() {
        let registry = registry_with(&[(ANY_CLIENT, 1, "shared"), ("test-client", 2, "own")]);
        assert_eq!(registry.predefined_name(1).unwrap(), "shared");
        assert!(registry.predefined_name(2).is_none());

        registry.bind_client("test-client");
        assert_eq!(registry.predefined_name(2).unwrap(), "own");
    }

    #[test]
    fn delivery_ref_prefers_predefined() {
        let registry = registry_with(&[(ANY_CLIENT, 9, "test/topic")]);
        let registered = registry.register("test/topic");
        // Predefined wins even though the name is also registered.
        assert_eq!(registry.delivery_ref("test/topic"), DeliveryRef::Predefined(9));
        assert_eq!(registry.registered_name(registered).unwrap(), "test/topic");
    }

    #[test]
    fn delivery_ref_falls_back_to_short_then_register() {
        let registry = registry_with(&[]);
        assert_eq!(
            registry.delivery_ref("ab"),
            DeliveryRef::Short(encode_short_topic("ab"))
        );
        assert_eq!(registry.delivery_ref("test/topic"), DeliveryRef::Unregistered);
    }

    #[test]
    fn resolve_publish_covers_all_namespaces() {
        let registry = registry_with(&[(ANY_CLIENT, 3, "pre/defined")]);
        let id = registry.register("reg/istered");

        assert_eq!(
            registry
                .resolve_publish(TopicIdType::Normal, id)
                .unwrap(),
            "reg/istered"
        );
        assert_eq!(
            registry
                .resolve_publish(TopicIdType::Predefined, 3)
                .unwrap(),
            "pre/defined"
        );
        assert_eq!(
            registry
                .resolve_publish(TopicIdType::Short, encode_short_topic("ab"))
                .unwrap(),
            "ab"
        );
        assert!(registry.resolve_publish(TopicIdType::Normal, 9999).is_err());
    }
}
