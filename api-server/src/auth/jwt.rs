//! User-session JWTs. Adapted from the teacher's `UserJwtClaims`/
//! `HostJwtClaims` pair, collapsed to the single claims shape this system
//! needs: the C6 gateway's `?token=` query param and any authenticated
//! HTTP route only ever need to know which user is attached to a request.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub exp: usize,
}

fn jwt_secret() -> String {
    std::env::var("ORCHESTRATOR_JWT_SECRET").unwrap_or_else(|_| "dev-jwt-secret-change-me".to_string())
}

fn validation() -> Validation {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation
}

pub fn issue_user_jwt(user_uuid: &str, ttl_hours: i64) -> Result<(String, usize), String> {
    let exp = (Utc::now() + Duration::hours(ttl_hours)).timestamp() as usize;
    let claims = UserClaims {
        sub: user_uuid.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret().as_bytes()),
    )
    .map(|token| (token, exp))
    .map_err(|err| format!("failed to sign user JWT: {err}"))
}

pub fn verify_user_jwt(token: &str) -> Result<UserClaims, String> {
    decode::<UserClaims>(token, &DecodingKey::from_secret(jwt_secret().as_bytes()), &validation())
        .map(|decoded| decoded.claims)
        .map_err(|err| format!("invalid user JWT: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        std::env::remove_var("ORCHESTRATOR_JWT_SECRET");
        let (token, _exp) = issue_user_jwt("user-1", 1).unwrap();
        let claims = verify_user_jwt(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn expired_token_is_rejected() {
        std::env::remove_var("ORCHESTRATOR_JWT_SECRET");
        let (token, _exp) = issue_user_jwt("user-1", -1).unwrap();
        assert!(verify_user_jwt(&token).is_err());
    }
}
