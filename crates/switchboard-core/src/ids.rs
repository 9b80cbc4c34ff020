use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an id produced elsewhere (model output, settings, remote peers).
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(MessageId, "msg");
branded_id!(ToolCallId, "call");
branded_id!(AssistantId, "asst");
branded_id!(ResponseId, "resp");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
        assert!(AssistantId::new().as_str().starts_with("asst_"));
        assert!(ResponseId::new().as_str().starts_with("resp_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = AssistantId::from_raw("multi-agent-orchestrator");
        assert_eq!(id.as_str(), "multi-agent-orchestrator");
        assert_eq!(id.to_string(), "multi-agent-orchestrator");
    }

    #[test]
    fn serializes_transparently() {
        let id = ToolCallId::from_raw("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""t1""#);
        let parsed: ToolCallId = serde_json::from_str(r#""t1""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<MessageId> = (0..100).map(|_| MessageId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
