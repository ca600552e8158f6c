//! Connection authentication and role derivation
//!
//! A party's role on an appointment is always derived from stored ownership.
//! Nothing the client sends can choose it.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::{Booking, BookingStore, PartyDirectory, StoreError};
use crate::protocol::Role;

/// Authenticated identity of a connecting party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub booking_id: Uuid,
    pub party_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("booking not found")]
    BookingNotFound,

    #[error("not authorized for this booking")]
    NotParticipant,

    #[error("invalid user profile")]
    MissingProfile,

    #[error("failed to issue token: {0}")]
    Issue(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves an access token to the party it was issued to
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Uuid, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: Uuid,
    exp: i64,
}

/// HS256 access tokens carrying a `user_id` claim
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issue a token for local runs and tests
    pub fn issue(&self, party_id: Uuid, ttl: chrono::Duration) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: party_id,
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.user_id)
            .map_err(|e| {
                tracing::debug!("Token rejected: {}", e);
                AuthError::InvalidToken
            })
    }
}

/// Role of `party_id` on `booking`, if it is a participant
///
/// Mentor ownership is checked first through the party's mentor profile,
/// since bookings reference mentors by profile id.
pub fn derive_role(booking: &Booking, party_id: Uuid, mentor_profile_id: Option<Uuid>) -> Option<Role> {
    if mentor_profile_id == Some(booking.mentor_id) {
        Some(Role::Mentor)
    } else if booking.user_id == party_id {
        Some(Role::User)
    } else {
        None
    }
}

/// Authenticates connection attempts against stored appointments
pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    bookings: Arc<dyn BookingStore>,
    directory: Arc<dyn PartyDirectory>,
}

impl Authenticator {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        bookings: Arc<dyn BookingStore>,
        directory: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self {
            verifier,
            bookings,
            directory,
        }
    }

    /// Resolve a token to its party id without touching any booking
    pub async fn verify_token(&self, token: &str) -> Result<Uuid, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.verifier.verify(token).await
    }

    /// Verify the token and derive the party's role on the booking
    pub async fn authenticate(&self, token: &str, booking_id: Uuid) -> Result<AuthContext, AuthError> {
        let party_id = self.verify_token(token).await?;

        let booking = self
            .bookings
            .booking(booking_id)
            .await?
            .ok_or(AuthError::BookingNotFound)?;

        let mentor_profile = self.directory.mentor_profile_id(party_id).await?;
        let role = derive_role(&booking, party_id, mentor_profile).ok_or_else(|| {
            tracing::warn!(%party_id, %booking_id, "Party is not a participant of booking");
            AuthError::NotParticipant
        })?;

        let display_name = self
            .directory
            .display_name(party_id)
            .await?
            .filter(|name| !name.is_empty())
            .ok_or(AuthError::MissingProfile)?;

        tracing::info!(%party_id, %booking_id, %role, "Connection authenticated");

        Ok(AuthContext {
            booking_id,
            party_id,
            display_name,
            role,
        })
    }
}
