use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

/// Verify an HS256 bearer token and return its claims. Any decode or
/// signature failure collapses to `Unauthorized`; callers must also check
/// the subject matches the identity the connection asserts.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn round_trips_a_valid_token() {
        let secret = "test-secret";
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let verified = verify_token(secret, &token).unwrap();
        assert_eq!(verified.sub, claims.sub);
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        assert!(matches!(
            verify_token("test-secret", &token),
            Err(AppError::Unauthorized)
        ));
    }
}
