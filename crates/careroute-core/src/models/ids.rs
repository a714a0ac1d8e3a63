//! Server-assigned row identifiers.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Pathway (medical specialty lane) id.
    PathwayId
);
id_type!(
    /// Doctor or coordinator id.
    ProviderId
);
id_type!(PatientId);
id_type!(CaseId);
id_type!(VisitId);
id_type!(
    /// Id of a (state, pathway) pair that providers can be eligible for.
    CareProvidingStateId
);
id_type!(AssignmentId);
id_type!(QueueItemId);
