use crate::error::StoreError;
use crate::fts_tree::{FTSExt, FTSTree};
use crate::model::*;
use crate::vote::{VoteDirection, VoteTally};
use chrono::Utc;
use log::{debug, error};
use rand::Rng;
use sled::transaction::{abort, TransactionError, Transactional};
use std::collections::BTreeSet;
use std::convert::TryInto;

// Big-endian so that tree iteration follows id order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64, StoreError> {
    id.as_ref()
        .try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::Corrupt("id"))
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

pub trait UserDb {
    type Error;
    /// Returns `None` if the username or email is already taken.
    fn add_user(&self, user: &User) -> Result<Option<u64>, Self::Error>;
    fn get_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<(u64, User)>, Self::Error>;
    /// Overwrites an existing user record; username and email must be unchanged.
    fn update_user(&self, id: u64, user: &User) -> Result<bool, Self::Error>;
    fn users(&self) -> Result<Vec<(u64, User)>, Self::Error>;
    /// Drops the record together with its username and email entries.
    fn remove_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
}

pub trait MovieDb {
    type Error;
    fn add_movie(&self, details: MovieDetails) -> Result<Movie, Self::Error>;
    fn get_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
    fn movies(&self) -> Result<Vec<Movie>, Self::Error>;
    fn random_movie(&self) -> Result<Option<Movie>, Self::Error>;
    /// Read-modify-write of one movie document.
    ///
    /// `f` may run several times: whenever the stored document changed
    /// between reading and writing, the write is dropped and `f` is applied
    /// again to the fresh document.
    fn update_movie<F, R>(&self, id: u64, f: F) -> Result<(Movie, R), Self::Error>
    where
        F: FnMut(&mut Movie) -> Result<R, Self::Error>;
    fn replace_movie_details(&self, id: u64, details: MovieDetails) -> Result<Movie, Self::Error>;
    fn remove_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
    /// Ranked title-index hits first, then any other movie whose title
    /// contains `query`, ignoring case.
    fn search_movies(&self, query: &str) -> Result<Vec<Movie>, Self::Error>;
    fn genres(&self) -> Result<BTreeSet<String>, Self::Error>;
    fn movies_by_genre(&self, genre: &str) -> Result<Vec<Movie>, Self::Error>;
}

/// The reviews embedded in a movie document, in posting order.
pub trait ReviewDb {
    type Error;
    fn append_review(&self, movie_id: u64, draft: ReviewDraft) -> Result<Review, Self::Error>;
    fn find_review(&self, movie_id: u64, review_id: u64) -> Result<Review, Self::Error>;
    fn reviews(&self, movie_id: u64) -> Result<Vec<Review>, Self::Error>;
    fn vote_review(
        &self,
        movie_id: u64,
        review_id: u64,
        user_id: u64,
        direction: VoteDirection,
    ) -> Result<VoteTally, Self::Error>;
}

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"users_username";
const USERS_EMAIL: &[u8] = b"users_email";
const MOVIES: &[u8] = b"movies";
const MOVIE_TITLES: &[u8] = b"movie_titles";

const MAX_WRITE_ATTEMPTS: usize = 16;

fn titles(db: &sled::Db) -> Result<FTSTree, StoreError> {
    Ok(db.open_fts(MOVIE_TITLES)?)
}

fn reindex_title(db: &sled::Db, id: u64, old: &str, new: &str) -> Result<(), StoreError> {
    let titles = titles(db)?;
    titles.remove(id, old)?;
    titles.insert(id, new)
}

impl UserDb for sled::Db {
    type Error = StoreError;

    fn add_user(&self, user: &User) -> Result<Option<u64>, StoreError> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users_email = self.open_tree(USERS_EMAIL)?;
        let id = self.generate_id()?;
        let key = serialize_id(id);
        let record = bincode::serialize(user)?;
        let email = email_key(&user.email);
        let result = (&users, &users_username, &users_email).transaction(
            |(users, users_username, users_email)| {
                if users_username
                    .insert(user.username.as_bytes(), &key[..])?
                    .is_some()
                    || users_email.insert(email.as_bytes(), &key[..])?.is_some()
                {
                    return abort(());
                }
                users.insert(&key[..], &record[..])?;
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(Some(id)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn get_user(&self, id: u64) -> Result<Option<User>, StoreError> {
        let users = self.open_tree(USERS)?;
        match users.get(serialize_id(id))? {
            Some(record) => Ok(Some(bincode::deserialize(&record)?)),
            None => Ok(None),
        }
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<(u64, User)>, StoreError> {
        let users_email = self.open_tree(USERS_EMAIL)?;
        match users_email.get(email_key(email))? {
            Some(id) => {
                let id = deserialize_id(id)?;
                let user = self
                    .get_user(id)?
                    .ok_or(StoreError::Corrupt("users_email"))?;
                Ok(Some((id, user)))
            }
            None => Ok(None),
        }
    }

    fn update_user(&self, id: u64, user: &User) -> Result<bool, StoreError> {
        let users = self.open_tree(USERS)?;
        let key = serialize_id(id);
        if !users.contains_key(key)? {
            return Ok(false);
        }
        users.insert(key, bincode::serialize(user)?)?;
        Ok(true)
    }

    fn users(&self) -> Result<Vec<(u64, User)>, StoreError> {
        let users = self.open_tree(USERS)?;
        users
            .iter()
            .map(|entry| -> Result<(u64, User), StoreError> {
                let (id, record) = entry?;
                Ok((deserialize_id(id)?, bincode::deserialize(&record)?))
            })
            .collect()
    }

    fn remove_user(&self, id: u64) -> Result<Option<User>, StoreError> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users_email = self.open_tree(USERS_EMAIL)?;
        let key = serialize_id(id);
        let removed = (&users, &users_username, &users_email).transaction(
            |(users, users_username, users_email)| {
                let record = match users.remove(&key[..])? {
                    Some(record) => record,
                    None => return Ok(None),
                };
                let user: User = match bincode::deserialize(&record) {
                    Ok(user) => user,
                    Err(e) => return abort(StoreError::from(e)),
                };
                users_username.remove(user.username.as_bytes())?;
                users_email.remove(email_key(&user.email).as_bytes())?;
                Ok(Some(user))
            },
        )?;
        Ok(removed)
    }
}

impl MovieDb for sled::Db {
    type Error = StoreError;

    fn add_movie(&self, details: MovieDetails) -> Result<Movie, StoreError> {
        let movies = self.open_tree(MOVIES)?;
        let id = self.generate_id()?;
        let movie = Movie::new(id, details);
        movies.insert(serialize_id(id), serde_json::to_vec(&movie)?)?;
        titles(self)?.insert(id, &movie.details.title)?;
        Ok(movie)
    }

    fn get_movie(&self, id: u64) -> Result<Option<Movie>, StoreError> {
        let movies = self.open_tree(MOVIES)?;
        match movies.get(serialize_id(id))? {
            Some(document) => Ok(Some(serde_json::from_slice(&document)?)),
            None => Ok(None),
        }
    }

    fn movies(&self) -> Result<Vec<Movie>, StoreError> {
        let movies = self.open_tree(MOVIES)?;
        movies
            .iter()
            .values()
            .map(|document| -> Result<Movie, StoreError> {
                Ok(serde_json::from_slice(&document?)?)
            })
            .collect()
    }

    fn random_movie(&self) -> Result<Option<Movie>, StoreError> {
        let movies = self.open_tree(MOVIES)?;
        let count = movies.len();
        if count == 0 {
            return Ok(None);
        }
        let index = rand::rng().random_range(0..count);
        match movies.iter().values().nth(index) {
            Some(document) => Ok(Some(serde_json::from_slice(&document?)?)),
            // the catalog shrank since it was counted
            None => Ok(None),
        }
    }

    fn update_movie<F, R>(&self, id: u64, mut f: F) -> Result<(Movie, R), StoreError>
    where
        F: FnMut(&mut Movie) -> Result<R, StoreError>,
    {
        let movies = self.open_tree(MOVIES)?;
        let key = serialize_id(id);
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = movies.get(key)?.ok_or(StoreError::MovieNotFound(id))?;
            let mut movie: Movie = serde_json::from_slice(&current)?;
            let ret = f(&mut movie)?;
            movie.version += 1;
            movie.updated_at = Utc::now();
            let document = serde_json::to_vec(&movie)?;
            match movies.compare_and_swap(key, Some(&current), Some(document))? {
                Ok(()) => return Ok((movie, ret)),
                Err(_) => debug!(
                    "movie {} changed during write attempt {}, retrying",
                    id, attempt
                ),
            }
        }
        Err(StoreError::Conflict(id))
    }

    fn replace_movie_details(&self, id: u64, details: MovieDetails) -> Result<Movie, StoreError> {
        let (movie, old_title) = self.update_movie(id, |movie| {
            Ok(std::mem::replace(&mut movie.details, details.clone()).title)
        })?;
        if old_title != movie.details.title {
            // The document is already committed. A stale index entry only
            // costs ranking: search still matches the stored title.
            if let Err(err) = reindex_title(self, id, &old_title, &movie.details.title) {
                error!(
                    "title index for movie {} not updated ({:?} -> {:?}): {}",
                    id, old_title, movie.details.title, err
                );
            }
        }
        Ok(movie)
    }

    fn remove_movie(&self, id: u64) -> Result<Option<Movie>, StoreError> {
        let movies = self.open_tree(MOVIES)?;
        match movies.remove(serialize_id(id))? {
            Some(document) => {
                let movie: Movie = serde_json::from_slice(&document)?;
                titles(self)?.remove(id, &movie.details.title)?;
                Ok(Some(movie))
            }
            None => Ok(None),
        }
    }

    fn search_movies(&self, query: &str) -> Result<Vec<Movie>, StoreError> {
        let mut found = Vec::new();
        let mut ranked = BTreeSet::new();
        for (id, score) in titles(self)?.query(query)? {
            if let Some(movie) = self.get_movie(id)? {
                debug!("search {:?}: movie {} scored {}", query, id, score);
                ranked.insert(id);
                found.push(movie);
            }
        }
        let needle = query.trim().to_lowercase();
        if !needle.is_empty() {
            found.extend(self.movies()?.into_iter().filter(|movie| {
                !ranked.contains(&movie.id) && movie.details.title.to_lowercase().contains(&needle)
            }));
        }
        Ok(found)
    }

    fn genres(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .movies()?
            .into_iter()
            .flat_map(|movie| movie.details.genre)
            .collect())
    }

    fn movies_by_genre(&self, genre: &str) -> Result<Vec<Movie>, StoreError> {
        Ok(self
            .movies()?
            .into_iter()
            .filter(|movie| movie.details.genre.contains(genre))
            .collect())
    }
}

impl ReviewDb for sled::Db {
    type Error = StoreError;

    fn append_review(&self, movie_id: u64, draft: ReviewDraft) -> Result<Review, StoreError> {
        let review = Review::new(self.generate_id()?, draft);
        self.update_movie(movie_id, |movie| {
            movie.reviews.push(review.clone());
            Ok(())
        })?;
        Ok(review)
    }

    fn find_review(&self, movie_id: u64, review_id: u64) -> Result<Review, StoreError> {
        let movie = self
            .get_movie(movie_id)?
            .ok_or(StoreError::MovieNotFound(movie_id))?;
        Ok(movie.review(review_id)?.clone())
    }

    fn reviews(&self, movie_id: u64) -> Result<Vec<Review>, StoreError> {
        Ok(self
            .get_movie(movie_id)?
            .ok_or(StoreError::MovieNotFound(movie_id))?
            .reviews)
    }

    fn vote_review(
        &self,
        movie_id: u64,
        review_id: u64,
        user_id: u64,
        direction: VoteDirection,
    ) -> Result<VoteTally, StoreError> {
        let (_, tally) = self.update_movie(movie_id, |movie| {
            let review = movie.review_mut(review_id)?;
            let outcome = review.vote(user_id, direction);
            debug!(
                "user {} {} on review {}: {:?}, now {} likes and {} dislikes",
                user_id,
                direction,
                review_id,
                outcome,
                review.votes().likes(),
                review.votes().dislikes()
            );
            Ok(review.votes().clone())
        })?;
        Ok(tally)
    }
}
