//! Bearer tokens, password hashing and identity resolution.

use crate::database::UserDb;
use crate::error::{ApiError, StoreError};
use crate::model::Role;
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Role at issuing time. Informational only, see [`resolve_identity`].
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<u64, ApiError> {
        self.sub
            .parse()
            .map_err(|_| ApiError::unauthorized("Invalid token"))
    }
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        TokenService {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: u64, role: Role) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::Internal(format!("token encoding: {}", err)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    Ok(bcrypt::hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    Ok(bcrypt::verify(password, hash)?)
}

/// Verified claims of the `Authorization: Bearer` header.
///
/// Extraction fails with 401 when the header is missing, malformed,
/// expired or signed with another secret.
#[derive(Debug)]
pub struct Bearer(Claims);

impl Bearer {
    pub fn claims(&self) -> &Claims {
        &self.0
    }

    pub fn into_claims(self) -> Claims {
        self.0
    }

    fn extract(req: &HttpRequest) -> Result<Self, ApiError> {
        let tokens = req
            .app_data::<web::Data<TokenService>>()
            .ok_or_else(|| ApiError::Internal("token service not configured".to_owned()))?;
        let value = req
            .headers()
            .get(header::AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("No token provided"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid token"))?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("No token provided"))?;
        Ok(Bearer(tokens.verify(token)?))
    }
}

impl FromRequest for Bearer {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Bearer::extract(req))
    }
}

/// The acting user as currently stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: u64,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(ApiError::Forbidden(
                "Access denied. Admins only.".to_owned(),
            )),
        }
    }
}

/// Looks up the user named by `claims`.
///
/// The role comes from the stored user, never from the token, so demoted
/// users lose their privileges before their tokens expire.
pub fn resolve_identity<D>(db: &D, claims: &Claims) -> Result<Option<Identity>, ApiError>
where
    D: UserDb<Error = StoreError>,
{
    let id = claims.user_id()?;
    Ok(db.get_user(id)?.map(|user| Identity {
        id,
        username: user.username,
        role: user.role,
    }))
}
