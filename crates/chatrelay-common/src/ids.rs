use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

id_newtype!(OrgId);
id_newtype!(AccountId);
id_newtype!(ContactId);
id_newtype!(MessageId);
id_newtype!(SessionId);
id_newtype!(KeywordRuleId);
id_newtype!(FlowId);
id_newtype!(FlowStepId);
id_newtype!(TransferId);
id_newtype!(CampaignId);
id_newtype!(RecipientId);
id_newtype!(WebhookId);
id_newtype!(DeliveryId);
id_newtype!(UserId);
id_newtype!(RoleId);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn roundtrips_through_display_and_from_str() {
        let id = OrgId::new();
        let parsed = OrgId::from_str(&id.to_string()).expect("valid uuid");
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_newtypes_do_not_mix_at_compile_time() {
        let org = OrgId::new();
        let account = AccountId::new();
        assert_ne!(org.0, Uuid::nil());
        assert_ne!(account.0, Uuid::nil());
    }
}
