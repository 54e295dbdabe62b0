use crate::constants::{BROADCAST_ID, DEFAULT_CHAT_PREFIX, DEFAULT_PAIRING_PREFIX};

/// Topic namespaces. A topic is always `<prefix><identity-uri>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPrefixes {
    pub pairing: String,
    pub chat: String,
}

impl Default for TopicPrefixes {
    fn default() -> Self {
        Self {
            pairing: DEFAULT_PAIRING_PREFIX.to_string(),
            chat: DEFAULT_CHAT_PREFIX.to_string(),
        }
    }
}

impl TopicPrefixes {
    pub fn pairing_topic(&self, uri: &str) -> String {
        format!("{}{}", self.pairing, uri)
    }

    pub fn chat_topic(&self, uri: &str) -> String {
        format!("{}{}", self.chat, uri)
    }

    pub fn is_pairing(&self, topic: &str) -> bool {
        topic.starts_with(&self.pairing)
    }

    pub fn is_chat(&self, topic: &str) -> bool {
        topic.starts_with(&self.chat)
    }

    /// The topics a persona listens on once it is active: its pairing topic,
    /// its chat topic and the broadcast chat topic.
    pub fn persona_topics(&self, uri: &str) -> Vec<String> {
        vec![
            self.pairing_topic(uri),
            self.chat_topic(uri),
            self.chat_topic(BROADCAST_ID),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_topics() {
        let prefixes = TopicPrefixes {
            pairing: "p/".to_string(),
            chat: "c/".to_string(),
        };
        assert_eq!(
            prefixes.persona_topics("A-uri"),
            vec!["p/A-uri", "c/A-uri", "c/ALL"]
        );
        assert!(prefixes.is_pairing("p/A-uri"));
        assert!(!prefixes.is_chat("p/A-uri"));
    }
}
