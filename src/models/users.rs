use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, ValidationError};

pub const MAX_USERNAME_LEN: usize = 32;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Freshman,
    Sophomore,
    Junior,
    Senior,
    Graduate,
}

impl Level {
    const THRESHOLDS: [(i64, Level); 5] = [
        (5000, Level::Graduate),
        (2000, Level::Senior),
        (750, Level::Junior),
        (250, Level::Sophomore),
        (0, Level::Freshman),
    ];

    pub fn from_lifetime_credits(lifetime_credits: i64) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(min, _)| lifetime_credits >= *min)
            .map(|(_, level)| *level)
            .unwrap_or(Level::Freshman)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Level::Freshman => "Freshman",
            Level::Sophomore => "Sophomore",
            Level::Junior => "Junior",
            Level::Senior => "Senior",
            Level::Graduate => "Graduate",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Campus,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Campus => "campus",
            Visibility::Private => "private",
        }
    }
}

impl TryFrom<String> for Visibility {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "public" => Ok(Visibility::Public),
            "campus" => Ok(Visibility::Campus),
            "private" => Ok(Visibility::Private),
            _ => Err(UnknownVariant {
                kind: "visibility",
                value,
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub credits: i64,
    pub lifetime_credits: i64,
    pub login_streak: i32,
    pub last_login_date: Option<NaiveDate>,
    pub verified: bool,
    pub referral_code: String,
    pub push_token: Option<String>,
    pub push_enabled: bool,
    #[sqlx(try_from = "String")]
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn level(&self) -> Level {
        Level::from_lifetime_credits(self.lifetime_credits)
    }

    pub fn can_receive_push(&self) -> bool {
        self.push_enabled && self.push_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub referral_code: Option<String>,
}

impl NewUser {
    pub fn validate(&self, allowed_domains: &[String]) -> Result<(), ValidationError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ValidationError::Empty("username"));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ValidationError::TooLong("username", MAX_USERNAME_LEN));
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidUsername(username.to_string()));
        }

        let email = self.email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(ValidationError::Empty("email"));
        }
        let domain = match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => domain,
            _ => return Err(ValidationError::InvalidEmail(email)),
        };
        if !allowed_domains.is_empty()
            && !allowed_domains
                .iter()
                .any(|suffix| domain_matches(domain, suffix))
        {
            return Err(ValidationError::EmailDomain(domain.to_string()));
        }

        Ok(())
    }
}

/// `suffix` matches the domain itself or any subdomain of it, never a bare
/// trailing substring: `.edu` accepts `stride.edu` but not `fakeedu.com` or
/// `evil.fakeedu`.
fn domain_matches(domain: &str, suffix: &str) -> bool {
    let bare = suffix.trim_start_matches('.').to_ascii_lowercase();
    if bare.is_empty() {
        return false;
    }
    domain == bare || domain.ends_with(&format!(".{}", bare))
}

/// Row-level values for a user about to be inserted.
#[derive(Clone, Debug)]
pub struct NewUserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub referral_code: String,
    pub signup_date: NaiveDate,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Preferences {
    pub push_token: Option<String>,
    pub push_enabled: Option<bool>,
    pub visibility: Option<Visibility>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub credits: i64,
    pub level: Level,
    pub login_streak: i32,
    pub verified: bool,
    pub visibility: Visibility,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            credits: user.credits,
            level: user.level(),
            login_streak: user.login_streak,
            verified: user.verified,
            visibility: user.visibility,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginOutcome {
    pub user: User,
    pub streak: i32,
    pub bonus: Option<super::transactions::LedgerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec![".edu".to_string()]
    }

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            referral_code: None,
        }
    }

    #[test]
    fn level_follows_lifetime_credits() {
        assert_eq!(Level::from_lifetime_credits(0), Level::Freshman);
        assert_eq!(Level::from_lifetime_credits(249), Level::Freshman);
        assert_eq!(Level::from_lifetime_credits(250), Level::Sophomore);
        assert_eq!(Level::from_lifetime_credits(1999), Level::Junior);
        assert_eq!(Level::from_lifetime_credits(2000), Level::Senior);
        assert_eq!(Level::from_lifetime_credits(80_000), Level::Graduate);
    }

    #[test]
    fn accepts_campus_email() {
        assert!(new_user("ada@cs.mit.edu", "ada_l").validate(&domains()).is_ok());
    }

    #[test]
    fn rejects_empty_username() {
        assert_eq!(
            new_user("ada@mit.edu", "  ").validate(&domains()),
            Err(ValidationError::Empty("username"))
        );
    }

    #[test]
    fn rejects_foreign_domain() {
        assert_eq!(
            new_user("ada@gmail.com", "ada").validate(&domains()),
            Err(ValidationError::EmailDomain("gmail.com".to_string()))
        );
        assert!(new_user("ada@gmail.com", "ada").validate(&[]).is_ok());
    }

    #[test]
    fn rejects_domains_that_only_end_in_the_suffix_letters() {
        assert_eq!(
            new_user("mallory@evil.fakeedu", "mallory").validate(&domains()),
            Err(ValidationError::EmailDomain("evil.fakeedu".to_string()))
        );
        assert!(new_user("mallory@fakeedu.com", "mallory")
            .validate(&domains())
            .is_err());
        assert!(new_user("mallory@edu", "mallory").validate(&domains()).is_err());
        assert!(new_user("ada@stride.edu", "ada").validate(&domains()).is_ok());
    }

    #[test]
    fn rejects_malformed_email() {
        assert!(matches!(
            new_user("not-an-email", "ada").validate(&domains()),
            Err(ValidationError::InvalidEmail(_))
        ));
    }
}
