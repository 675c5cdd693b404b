use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HcError, Result};

/// Saved credentials for one client identity, keyed by client id.
pub type CredentialMap = BTreeMap<String, TokenPair>;

/// OAuth token pair held by the authorization engine.
///
/// `access_token == None` means a refresh (or full re-authorization) must
/// happen before any API call.
///
/// # Example
/// ```
/// use homeconnect::auth::TokenPair;
/// use chrono::{Duration, Utc};
///
/// let pair = TokenPair {
///     refresh_token: "refresh".to_string(),
///     access_token: Some("access".to_string()),
///     access_expires_at: Utc::now() + Duration::hours(24),
///     scopes: vec!["Monitor".to_string()],
/// };
/// assert!(pair.is_access_valid(Utc::now()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub access_expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenPair {
    /// An access token exists and `now` is before its expiry.
    pub fn is_access_valid(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && now < self.access_expires_at
    }
}

/// Successful grant payload from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Convert into a [`TokenPair`] stamped relative to `now`.
    ///
    /// Refresh responses may omit the refresh token, in which case
    /// `previous_refresh` is carried forward.
    pub fn into_pair(
        self,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair> {
        let refresh_token = match (self.refresh_token, previous_refresh) {
            (Some(token), _) => token,
            (None, Some(previous)) => previous.to_string(),
            (None, None) => {
                return Err(HcError::Protocol(
                    "token response without refresh_token".to_string(),
                ))
            }
        };
        if self.expires_in <= 0 {
            return Err(HcError::Protocol(format!(
                "token response with non-positive expires_in {}",
                self.expires_in
            )));
        }
        let access_expires_at = Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                HcError::Protocol(format!(
                    "token response with out-of-range expires_in {}",
                    self.expires_in
                ))
            })?;
        Ok(TokenPair {
            refresh_token,
            access_token: Some(self.access_token),
            access_expires_at,
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: "access".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in: 86_400,
            scope: Some("IdentifyAppliance Monitor".to_string()),
            token_type: Some("Bearer".to_string()),
        }
    }

    #[test]
    fn into_pair_stamps_expiry_from_now() {
        let now = Utc::now();
        let pair = response(Some("r1")).into_pair(None, now).unwrap();
        assert_eq!(pair.access_expires_at, now + Duration::seconds(86_400));
        assert_eq!(pair.refresh_token, "r1");
        assert_eq!(pair.scopes, vec!["IdentifyAppliance", "Monitor"]);
    }

    #[test]
    fn into_pair_carries_previous_refresh_token_forward() {
        let pair = response(None).into_pair(Some("old"), Utc::now()).unwrap();
        assert_eq!(pair.refresh_token, "old");
    }

    #[test]
    fn into_pair_without_any_refresh_token_is_a_protocol_violation() {
        let result = response(None).into_pair(None, Utc::now());
        assert!(matches!(result, Err(HcError::Protocol(_))));
    }

    #[test]
    fn successive_grants_strictly_increase_expiry() {
        let start = Utc::now();
        let mut last = None;
        for step in 0..5 {
            let now = start + Duration::seconds(step * 90);
            let pair = response(Some("r")).into_pair(None, now).unwrap();
            if let Some(previous) = last {
                assert!(pair.access_expires_at > previous);
            }
            last = Some(pair.access_expires_at);
        }
    }

    #[test]
    fn out_of_range_lifetime_is_a_protocol_violation() {
        let mut huge = response(Some("r"));
        huge.expires_in = i64::MAX;
        assert!(matches!(
            huge.into_pair(None, Utc::now()),
            Err(HcError::Protocol(_))
        ));

        let mut near_limit = response(Some("r"));
        near_limit.expires_in = 10_000_000_000_000;
        assert!(matches!(
            near_limit.into_pair(None, Utc::now()),
            Err(HcError::Protocol(_))
        ));
    }

    #[test]
    fn expired_or_missing_access_is_not_valid() {
        let now = Utc::now();
        let mut pair = response(Some("r")).into_pair(None, now).unwrap();
        assert!(pair.is_access_valid(now));
        assert!(!pair.is_access_valid(now + Duration::seconds(86_400)));
        pair.access_token = None;
        assert!(!pair.is_access_valid(now));
    }
}
