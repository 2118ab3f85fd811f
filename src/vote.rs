//! Like/dislike bookkeeping for a single review.
//!
//! A [`VoteTally`] keeps the two voter sets together with their counters.
//! [`VoteTally::apply`] is the only way to change any of them, so the
//! counters always equal the set sizes and no user is ever in both sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Like,
    Dislike,
}

impl VoteDirection {
    #[cfg(test)]
    pub fn opposite(self) -> Self {
        match self {
            VoteDirection::Like => VoteDirection::Dislike,
            VoteDirection::Dislike => VoteDirection::Like,
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteDirection::Like => f.write_str("like"),
            VoteDirection::Dislike => f.write_str("dislike"),
        }
    }
}

/// What a call to [`VoteTally::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The user was not voting in this direction and now is.
    Added,
    /// The user repeated their vote, which retracts it.
    Removed,
    /// The user's opposite vote was retracted and replaced.
    Switched,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawTally")]
pub struct VoteTally {
    likes: u64,
    dislikes: u64,
    liked_by: BTreeSet<u64>,
    disliked_by: BTreeSet<u64>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn likes(&self) -> u64 {
        self.likes
    }

    pub fn dislikes(&self) -> u64 {
        self.dislikes
    }

    #[cfg(test)]
    pub fn liked_by(&self) -> &BTreeSet<u64> {
        &self.liked_by
    }

    #[cfg(test)]
    pub fn disliked_by(&self) -> &BTreeSet<u64> {
        &self.disliked_by
    }

    #[cfg(test)]
    pub fn vote_of(&self, user_id: u64) -> Option<VoteDirection> {
        if self.liked_by.contains(&user_id) {
            Some(VoteDirection::Like)
        } else if self.disliked_by.contains(&user_id) {
            Some(VoteDirection::Dislike)
        } else {
            None
        }
    }

    /// Toggles `user_id`'s vote in `direction`.
    ///
    /// Repeating a vote removes it; voting the other way first retracts the
    /// previous vote. Sets and counters always move together.
    pub fn apply(&mut self, user_id: u64, direction: VoteDirection) -> VoteOutcome {
        let (own, own_count, other, other_count) = match direction {
            VoteDirection::Like => (
                &mut self.liked_by,
                &mut self.likes,
                &mut self.disliked_by,
                &mut self.dislikes,
            ),
            VoteDirection::Dislike => (
                &mut self.disliked_by,
                &mut self.dislikes,
                &mut self.liked_by,
                &mut self.likes,
            ),
        };

        if own.remove(&user_id) {
            *own_count -= 1;
            return VoteOutcome::Removed;
        }

        own.insert(user_id);
        *own_count += 1;
        if other.remove(&user_id) {
            *other_count -= 1;
            VoteOutcome::Switched
        } else {
            VoteOutcome::Added
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTally {
    likes: u64,
    dislikes: u64,
    liked_by: BTreeSet<u64>,
    disliked_by: BTreeSet<u64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TallyError {
    CountMismatch,
    Overlap(u64),
}

impl fmt::Display for TallyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TallyError::CountMismatch => f.write_str("vote counters do not match voter sets"),
            TallyError::Overlap(user) => write!(f, "user {} both likes and dislikes", user),
        }
    }
}

impl TryFrom<RawTally> for VoteTally {
    type Error = TallyError;

    fn try_from(raw: RawTally) -> Result<Self, Self::Error> {
        if raw.likes != raw.liked_by.len() as u64 || raw.dislikes != raw.disliked_by.len() as u64
        {
            return Err(TallyError::CountMismatch);
        }
        if let Some(user) = raw.liked_by.intersection(&raw.disliked_by).next() {
            return Err(TallyError::Overlap(*user));
        }
        Ok(VoteTally {
            likes: raw.likes,
            dislikes: raw.dislikes,
            liked_by: raw.liked_by,
            disliked_by: raw.disliked_by,
        })
    }
}
