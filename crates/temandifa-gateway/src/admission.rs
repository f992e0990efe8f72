//! Request admission.
//!
//! Every API request is counted against the public limit for its client
//! address. Protected requests then need a valid access token, and the
//! resource-intensive ones are also counted against the authenticated limit
//! for the token's user.

use std::sync::Arc;

use temandifa_auth::{AccessTokenClaims, TokenService};
use temandifa_resilience::{CallerKey, RateDecision, SlidingWindowLimiter};

use crate::error::{GatewayError, GatewayResult};

/// A caller that passed admission.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub user_id: String,
    pub claims: AccessTokenClaims,
    /// Decision of the last limiter applied, for response headers.
    pub rate: RateDecision,
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[derive(Clone)]
pub struct Admission {
    public: SlidingWindowLimiter,
    authenticated: SlidingWindowLimiter,
    tokens: Arc<TokenService>,
}

impl Admission {
    pub fn new(
        public: SlidingWindowLimiter,
        authenticated: SlidingWindowLimiter,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            public,
            authenticated,
            tokens,
        }
    }

    /// Admit an anonymous request by client address.
    pub async fn admit_public(&self, client_ip: &str) -> GatewayResult<RateDecision> {
        let decision = self.public.admit(&CallerKey::Ip(client_ip.to_string())).await;
        if !decision.allowed {
            return Err(GatewayError::rate_limited(self.public.scope(), &decision));
        }
        Ok(decision)
    }

    /// Admit a protected request: public limit, then token validation.
    pub async fn admit_user(
        &self,
        client_ip: &str,
        authorization: Option<&str>,
    ) -> GatewayResult<Admitted> {
        let rate = self.admit_public(client_ip).await?;
        let token = bearer_token(authorization).ok_or(GatewayError::MissingCredentials)?;
        let claims = self.tokens.validate_access(token).await?;
        Ok(Admitted {
            user_id: claims.sub.clone(),
            claims,
            rate,
        })
    }

    /// Admit a protected inference request: [`admit_user`](Self::admit_user)
    /// plus the per-user authenticated limit.
    pub async fn admit_inference(
        &self,
        client_ip: &str,
        authorization: Option<&str>,
    ) -> GatewayResult<Admitted> {
        let mut admitted = self.admit_user(client_ip, authorization).await?;
        let decision = self
            .authenticated
            .admit(&CallerKey::User(admitted.user_id.clone()))
            .await;
        if !decision.allowed {
            return Err(GatewayError::rate_limited(self.authenticated.scope(), &decision));
        }
        admitted.rate = decision;
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(Some("bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
