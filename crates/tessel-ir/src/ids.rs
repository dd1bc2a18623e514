//! Typed identifiers
//!
//! Every entity the compiler and runtime exchange is addressed by a typed
//! string id. Ids are immutable once minted and compare by value.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Unique identifier for a relation
    RelationId
}

string_id! {
    /// Unique identifier for a field (qualified as `relation.field`)
    FieldId
}

string_id! {
    /// Unique identifier for a subset (qualified as `relation.subset`)
    SubsetId
}

string_id! {
    /// Unique identifier for a global cell
    GlobalId
}

string_id! {
    /// Unique identifier for a kernel or helper function
    FunctionId
}

string_id! {
    /// Unique identifier for an emitted task
    TaskId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_equality() {
        let a: RelationId = "cells".into();
        let b = RelationId("cells".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "cells");
    }
}
