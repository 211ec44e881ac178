//! Platform identifiers
//!
//! Snowflakes are 64-bit integers on the platform but travel as decimal
//! strings, both on the wire and inside the persisted squad state.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

snowflake!(
    /// A guild (server)
    GuildId
);
snowflake!(
    /// Any channel: text, voice, category or thread
    ChannelId
);
snowflake!(
    /// A message inside a channel
    MessageId
);
snowflake!(
    /// A user account
    UserId
);
snowflake!(
    /// A permission role
    RoleId
);

impl UserId {
    /// Mention markup for message text
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl ChannelId {
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}
