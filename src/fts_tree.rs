//! A BM25 full-text index kept in sled trees.
//!
//! Documents are addressed by `u64` id. Three trees back one index:
//! `<name>_tokens` maps a token to its document frequency and a token id,
//! `<name>_frequency` maps `token id ++ document id` to the term count, and
//! `<name>_doclen` maps a document id to its length in tokens (the empty key
//! holds the total over all documents).

use crate::error::StoreError;
use sled::transaction::{abort, ConflictableTransactionError, Transactional};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::convert::TryInto;
use unic_ucd_category::GeneralCategory;

pub fn tokens_iter(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c| !is_token_charcter(c)).filter(|t| !t.is_empty())
}

pub fn is_token_charcter(c: char) -> bool {
    let category = GeneralCategory::of(c);
    category.is_number() || category.is_letter() || category == GeneralCategory::PrivateUse
}

const FTS_FREQUENCY_POSTFIX: &[u8] = b"_frequency";
const FTS_TOKENS_POSTFIX: &[u8] = b"_tokens";
const FTS_DOCLEN_POSTIFX: &[u8] = b"_doclen";

// Counts every document once, so its frequency is the corpus size.
const ALL_DOCUMENTS: &str = "";
const TOTAL_LENGTH: &[u8] = &[];

const K1: f32 = 1.2;
const B: f32 = 0.75;

pub struct FTSTree {
    frequency: sled::Tree,
    tokens: sled::Tree,
    doclen: sled::Tree,
}

pub trait FTSExt {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree>;
}

impl FTSExt for sled::Db {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree> {
        let name_ref = name.as_ref();

        let mut frequency_name = name_ref.to_vec();
        frequency_name.extend_from_slice(FTS_FREQUENCY_POSTFIX);
        let frequency = self.open_tree(frequency_name)?;

        let mut tokens_name = name_ref.to_vec();
        tokens_name.extend_from_slice(FTS_TOKENS_POSTFIX);
        let tokens = self.open_tree(tokens_name)?;

        let mut doclen_name = name_ref.to_vec();
        doclen_name.extend_from_slice(FTS_DOCLEN_POSTIFX);
        let doclen = self.open_tree(doclen_name)?;

        Ok(FTSTree {
            frequency,
            tokens,
            doclen,
        })
    }
}

fn count_tokens(value: &str) -> (HashMap<String, u32>, u32) {
    let mut token_counts: HashMap<String, u32> = HashMap::new();
    let mut total_count = 0u32;
    for token in tokens_iter(value) {
        *token_counts.entry(token.to_lowercase()).or_insert(0) += 1;
        total_count += 1;
    }
    (token_counts, total_count)
}

fn decode_u32(bytes: &[u8]) -> Option<u32> {
    bytes.try_into().ok().map(u32::from_le_bytes)
}

fn decode_token(bytes: &[u8]) -> Option<(u32, u64)> {
    if bytes.len() != 12 {
        return None;
    }
    let documents = decode_u32(&bytes[0..4])?;
    let id = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
    Some((documents, id))
}

fn encode_token(documents: u32, id: u64) -> Vec<u8> {
    let mut entry = documents.to_le_bytes().to_vec();
    entry.extend_from_slice(&id.to_le_bytes());
    entry
}

fn posting_key(token_id: u64, document: &[u8]) -> Vec<u8> {
    let mut key = token_id.to_be_bytes().to_vec();
    key.extend_from_slice(document);
    key
}

fn corrupt() -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Corrupt("full-text index"))
}

impl FTSTree {
    /// Indexes `value` under `id`. The id must not be indexed already.
    pub fn insert(&self, id: u64, value: &str) -> Result<(), StoreError> {
        let key = id.to_be_bytes();
        let (mut token_counts, total_count) = count_tokens(value);
        token_counts.insert(ALL_DOCUMENTS.to_owned(), 1);
        (&self.frequency, &self.tokens, &self.doclen).transaction(
            |(frequency, tokens, doclen)| {
                if doclen
                    .insert(&key[..], &total_count.to_le_bytes()[..])?
                    .is_some()
                {
                    return abort(StoreError::Corrupt("full-text index already holds document"));
                }
                let old_total = match doclen.get(TOTAL_LENGTH)? {
                    Some(total) => decode_u32(&total).ok_or_else(corrupt)?,
                    None => 0,
                };
                doclen.insert(TOTAL_LENGTH, &(old_total + total_count).to_le_bytes()[..])?;
                for (token, count) in token_counts.iter() {
                    let (documents, token_id) = match tokens.get(token.as_bytes())? {
                        Some(entry) => decode_token(&entry).ok_or_else(corrupt)?,
                        None => (0, tokens.generate_id()?),
                    };
                    frequency.insert(posting_key(token_id, &key), &count.to_le_bytes()[..])?;
                    tokens.insert(token.as_bytes(), encode_token(documents + 1, token_id))?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Drops `id` from the index. `value` must be the text it was indexed
    /// with. Unknown ids are ignored.
    pub fn remove(&self, id: u64, value: &str) -> Result<(), StoreError> {
        let key = id.to_be_bytes();
        let (mut token_counts, total_count) = count_tokens(value);
        token_counts.insert(ALL_DOCUMENTS.to_owned(), 1);
        (&self.frequency, &self.tokens, &self.doclen).transaction(
            |(frequency, tokens, doclen)| {
                let old_count = match doclen.remove(&key[..])? {
                    Some(count) => count,
                    None => return Ok(()),
                };
                if decode_u32(&old_count) != Some(total_count) {
                    return abort(StoreError::Corrupt(
                        "value does not match indexed document",
                    ));
                }
                let old_total = match doclen.get(TOTAL_LENGTH)? {
                    Some(total) => decode_u32(&total).ok_or_else(corrupt)?,
                    None => 0,
                };
                doclen.insert(
                    TOTAL_LENGTH,
                    &old_total.saturating_sub(total_count).to_le_bytes()[..],
                )?;
                for token in token_counts.keys() {
                    let (documents, token_id) = match tokens.get(token.as_bytes())? {
                        Some(entry) => decode_token(&entry).ok_or_else(corrupt)?,
                        None => return Err(corrupt()),
                    };
                    if frequency.remove(posting_key(token_id, &key))?.is_none() {
                        return Err(corrupt());
                    }
                    if documents <= 1 {
                        tokens.remove(token.as_bytes())?;
                    } else {
                        tokens.insert(token.as_bytes(), encode_token(documents - 1, token_id))?;
                    }
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Ranks the indexed documents against `value`, best match first.
    pub fn query(&self, value: &str) -> Result<Vec<(u64, f32)>, StoreError> {
        let (token_counts, _) = count_tokens(value);
        let mut scores: HashMap<u64, f32> = HashMap::new();

        let num_documents = match self.tokens.get(ALL_DOCUMENTS)? {
            Some(entry) => decode_token(&entry)
                .ok_or(StoreError::Corrupt("full-text index"))?
                .0,
            None => 0,
        };
        if num_documents == 0 {
            return Ok(Vec::new());
        }
        let total_dl = match self.doclen.get(TOTAL_LENGTH)? {
            Some(total) => decode_u32(&total).ok_or(StoreError::Corrupt("full-text index"))?,
            None => 0,
        };
        let avgdl = (total_dl as f32 / num_documents as f32).max(1.0);

        for (token, count) in token_counts {
            let entry = match self.tokens.get(token.as_bytes())? {
                Some(entry) => entry,
                None => continue,
            };
            let (documents, token_id) =
                decode_token(&entry).ok_or(StoreError::Corrupt("full-text index"))?;
            let idf = ((num_documents as f32 - documents as f32 + 0.5)
                / (documents as f32 + 0.5)
                + 1.0)
                .ln();
            for posting in self.frequency.scan_prefix(token_id.to_be_bytes()) {
                let (posting_key, frequency_data) = posting?;
                let document = &posting_key[8..];
                let id = document
                    .try_into()
                    .map(u64::from_be_bytes)
                    .map_err(|_| StoreError::Corrupt("full-text index"))?;
                let frequency = decode_u32(&frequency_data)
                    .ok_or(StoreError::Corrupt("full-text index"))? as f32;
                let dl = self
                    .doclen
                    .get(document)?
                    .and_then(|dl| decode_u32(&dl))
                    .unwrap_or(0) as f32;
                let bm25 = idf * frequency * (K1 + 1.0)
                    / (frequency + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(id).or_insert(0.0) += bm25 * count as f32;
            }
        }

        let mut ranked: Vec<(u64, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(ranked)
    }
}
