use crate::error::{ApiError, StoreError};
use crate::vote::{VoteDirection, VoteOutcome, VoteTally};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// What clients get to see of a user.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: u64, user: User) -> Self {
        UserProfile {
            id,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// The editable part of a movie, also accepted as request body by the admin
/// endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieDetails {
    pub title: String,
    pub description: String,
    pub genre: BTreeSet<String>,
    pub director: String,
    pub release_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_rating: Option<f32>,
    #[serde(default)]
    pub stars: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl MovieDetails {
    pub fn validate(&self) -> Result<(), ApiError> {
        let required = [
            ("title", &self.title),
            ("description", &self.description),
            ("director", &self.director),
        ];
        for (field, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(ApiError::Validation(format!("{} is required", field)));
            }
        }
        if self.genre.iter().all(|genre| genre.trim().is_empty()) {
            return Err(ApiError::validation("at least one genre is required"));
        }
        Ok(())
    }
}

/// A movie document. Reviews are embedded and stored with it as one unit.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: u64,
    #[serde(flatten)]
    pub details: MovieDetails,
    #[serde(default)]
    pub reviews: Vec<Review>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movie {
    pub fn new(id: u64, details: MovieDetails) -> Self {
        let now = Utc::now();
        Movie {
            id,
            details,
            reviews: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn review_index(&self, review_id: u64) -> Result<usize, StoreError> {
        self.reviews
            .iter()
            .position(|review| review.id == review_id)
            .ok_or(StoreError::ReviewNotFound {
                movie_id: self.id,
                review_id,
            })
    }

    pub fn review(&self, review_id: u64) -> Result<&Review, StoreError> {
        let index = self.review_index(review_id)?;
        Ok(&self.reviews[index])
    }

    pub fn review_mut(&mut self, review_id: u64) -> Result<&mut Review, StoreError> {
        let index = self.review_index(review_id)?;
        Ok(&mut self.reviews[index])
    }
}

/// Author and text of a review that has not been stored yet.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub user_id: u64,
    pub username: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: u64,
    pub username: String,
    pub user_id: u64,
    pub content: String,
    #[serde(flatten)]
    votes: VoteTally,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn new(id: u64, draft: ReviewDraft) -> Self {
        Review {
            id,
            username: draft.username,
            user_id: draft.user_id,
            content: draft.content,
            votes: VoteTally::new(),
            created_at: Utc::now(),
        }
    }

    pub fn votes(&self) -> &VoteTally {
        &self.votes
    }

    pub fn vote(&mut self, user_id: u64, direction: VoteDirection) -> VoteOutcome {
        self.votes.apply(user_id, direction)
    }
}
