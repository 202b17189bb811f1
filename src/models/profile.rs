// Profile Database Model
// Local mirror of the external auth identity; only the plan attribute and
// display data live here. Credentials never touch this service.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::profiles;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Profile {
    pub id: Uuid,
    pub plan: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription plan. Pro is the unlimited override: creations and saves are
/// never metered for pro users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
        }
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, Plan::Pro)
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

impl Profile {
    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::profiles::dsl;

        dsl::profiles
            .find(profile_id)
            .first::<Self>(conn)
            .await
            .optional()
    }

    /// Create the profile row for a verified identity if it does not exist
    /// yet. Idempotent; concurrent callers coalesce on the primary key.
    pub async fn ensure_exists(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
    ) -> Result<(), diesel::result::Error> {
        use crate::schema::profiles::dsl;

        diesel::insert_into(dsl::profiles)
            .values(dsl::id.eq(profile_id))
            .on_conflict(dsl::id)
            .do_nothing()
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Resolve the plan for a user. Unknown plan strings and missing rows
    /// both resolve to Free: metering applies unless the profile says
    /// otherwise.
    pub async fn plan_for(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
    ) -> Result<Plan, diesel::result::Error> {
        use crate::schema::profiles::dsl;

        let plan: Option<String> = dsl::profiles
            .find(profile_id)
            .select(dsl::plan)
            .first::<String>(conn)
            .await
            .optional()?;

        Ok(plan
            .and_then(|p| p.parse::<Plan>().ok())
            .unwrap_or(Plan::Free))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parsing() {
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert!("platinum".parse::<Plan>().is_err());

        assert!(Plan::Pro.is_pro());
        assert!(!Plan::Free.is_pro());
    }
}
