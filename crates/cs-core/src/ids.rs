//! Newtype identifiers for the domain entities.
//!
//! Kept as thin wrappers over `Uuid` (rather than bare `Uuid` everywhere) so
//! the compiler catches a `TicketId` passed where a `SessionId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(GameId);
id_type!(ServerId);
id_type!(IssueTypeId);
id_type!(UserId);
id_type!(TicketId);
id_type!(SessionId);
id_type!(MessageId);
id_type!(TicketMessageId);
id_type!(QuickReplyId);
id_type!(QuickReplyCategoryId);
