//! Memory Manager: per-room short-term ring, a global rules index with
//! hybrid vector/keyword retrieval, and an optional long-term store behind
//! an interface.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::autodm::model::{MemoryEntry, MemoryEntryType, PlayerModel};

#[derive(Debug, Clone)]
pub enum MemoryError {
    EmbeddingFailed(String),
    StoreFailed(String),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::EmbeddingFailed(msg) => write!(f, "embedding failed: {}", msg),
            MemoryError::StoreFailed(msg) => write!(f, "long-term store failed: {}", msg),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Computes a fixed-dimension embedding for a chunk of text. An external
/// collaborator per the Out-of-scope boundary; the crate never calls a
/// concrete embedding API.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Durable storage for entries spilled out of the short-term ring. An
/// external collaborator; the crate ships no concrete disk/DB backend.
#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn save(&self, room_id: &str, entry: MemoryEntry) -> Result<(), MemoryError>;
    async fn search_by_embedding(&self, room_id: &str, query: &[f32], top_k: usize) -> Vec<MemoryEntry>;
}

/// Cosine similarity over equal-length float vectors. Mismatched lengths or
/// a zero-norm vector return 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Keyword overlap fallback used when no embedder is configured: distinct
/// query tokens that appear in the entry's content, normalized by token
/// count.
fn keyword_overlap_score(query: &str, content: &str) -> f32 {
    let query_tokens: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: std::collections::HashSet<String> = tokenize(content).into_iter().collect();
    let matches = query_tokens.intersection(&content_tokens).count();
    matches as f32 / query_tokens.len() as f32
}

/// Split `text` into overlapping word windows of `chunk_size` words with
/// `overlap` words shared between consecutive chunks.
pub fn chunk_document(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= chunk_size {
        return vec![words.join(" ")];
    }
    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    chunks
}

const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHUNK_OVERLAP: usize = 50;

struct RoomMemory {
    ring: VecDeque<MemoryEntry>,
}

/// Owns the short-term rings (one per room), the global rules index, and
/// the optional embedder/long-term-store collaborators.
pub struct MemoryManager {
    short_term_capacity: usize,
    rooms: Mutex<HashMap<String, RoomMemory>>,
    rules_index: Mutex<Vec<MemoryEntry>>,
    game_summaries: Mutex<HashMap<String, String>>,
    player_models: Mutex<HashMap<String, HashMap<String, PlayerModel>>>,
    embedder: Option<Arc<dyn Embedder>>,
    long_term_store: Option<Arc<dyn LongTermStore>>,
}

impl MemoryManager {
    pub fn new(short_term_capacity: usize) -> Self {
        Self {
            short_term_capacity,
            rooms: Mutex::new(HashMap::new()),
            rules_index: Mutex::new(Vec::new()),
            game_summaries: Mutex::new(HashMap::new()),
            player_models: Mutex::new(HashMap::new()),
            embedder: None,
            long_term_store: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term_store = Some(store);
        self
    }

    /// Append `entry` to `room_id`'s ring. When the embedder is configured
    /// and the entry carries no embedding, computes one (best-effort:
    /// failures log and continue with an empty embedding). When the ring
    /// overflows by one, the evicted entry is best-effort spilled to the
    /// long-term store.
    pub async fn store(&self, room_id: &str, mut entry: MemoryEntry) {
        if let Some(embedder) = &self.embedder {
            if entry.embedding.is_empty() {
                match embedder.embed(&entry.content).await {
                    Ok(vector) => entry.embedding = vector,
                    Err(e) => log::warn!("embedding failed for memory entry {}: {}", entry.id, e),
                }
            }
        }

        let evicted = {
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(room_id.to_string()).or_insert_with(|| RoomMemory { ring: VecDeque::new() });
            room.ring.push_back(entry);
            if room.ring.len() > self.short_term_capacity {
                room.ring.pop_front()
            } else {
                None
            }
        };

        if let (Some(evicted), Some(store)) = (evicted, &self.long_term_store) {
            let store = store.clone();
            let room_id = room_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = store.save(&room_id, evicted).await {
                    log::error!("long-term memory spill failed for room {}: {}", room_id, e);
                }
            });
        }
    }

    pub async fn short_term_len(&self, room_id: &str) -> usize {
        self.rooms.lock().await.get(room_id).map_or(0, |r| r.ring.len())
    }

    /// Merge short-term (recency-decayed), long-term (embedding search), and
    /// rules-index results, sorted by score descending and truncated to
    /// `top_k`. Ties break by insertion order within the merge.
    pub async fn retrieve_relevant(&self, room_id: &str, query: &str, top_k: usize) -> Vec<MemoryEntry> {
        let mut merged: Vec<MemoryEntry> = Vec::new();

        {
            let rooms = self.rooms.lock().await;
            if let Some(room) = rooms.get(room_id) {
                let newest_first: Vec<&MemoryEntry> = room.ring.iter().rev().collect();
                for (position, entry) in newest_first.into_iter().enumerate() {
                    let score = (1.0 - 0.1 * position as f32).max(0.0);
                    let mut scored = entry.clone();
                    scored.score = Some(score);
                    merged.push(scored);
                }
            }
        }

        if let (Some(embedder), Some(store)) = (&self.embedder, &self.long_term_store) {
            if let Ok(query_embedding) = embedder.embed(query).await {
                let long_term = store.search_by_embedding(room_id, &query_embedding, top_k).await;
                merged.extend(long_term);
            }
        }

        merged.extend(self.search_rules(query, top_k).await);

        merged.sort_by(|a, b| {
            b.score.unwrap_or(0.0).partial_cmp(&a.score.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(top_k);
        merged
    }

    /// Cosine similarity against query embedding when an embedder is
    /// configured; otherwise keyword overlap. Zero-score entries are
    /// excluded.
    pub async fn search_rules(&self, query: &str, top_k: usize) -> Vec<MemoryEntry> {
        let index = self.rules_index.lock().await;
        let mut scored: Vec<MemoryEntry> = if let Some(embedder) = &self.embedder {
            match embedder.embed(query).await {
                Ok(query_embedding) => index
                    .iter()
                    .map(|entry| {
                        let mut e = entry.clone();
                        e.score = Some(cosine_similarity(&query_embedding, &entry.embedding));
                        e
                    })
                    .collect(),
                Err(_) => index
                    .iter()
                    .map(|entry| {
                        let mut e = entry.clone();
                        e.score = Some(keyword_overlap_score(query, &entry.content));
                        e
                    })
                    .collect(),
            }
        } else {
            index
                .iter()
                .map(|entry| {
                    let mut e = entry.clone();
                    e.score = Some(keyword_overlap_score(query, &entry.content));
                    e
                })
                .collect()
        };

        scored.retain(|e| e.score.unwrap_or(0.0) > 0.0);
        scored.sort_by(|a, b| b.score.unwrap().partial_cmp(&a.score.unwrap()).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Chunk each document into overlapping word windows, embed each chunk
    /// (best-effort), and add to the rules index.
    pub async fn ingest_rules(&self, documents: Vec<(String, String)>) {
        for (source, text) in documents {
            let chunks = chunk_document(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
            for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
                let mut entry = MemoryEntry::new(MemoryEntryType::Rule, chunk.clone())
                    .with_metadata("source", source.clone())
                    .with_metadata("chunk_idx", chunk_idx.to_string());
                if let Some(embedder) = &self.embedder {
                    match embedder.embed(&chunk).await {
                        Ok(vector) => entry = entry.with_embedding(vector),
                        Err(e) => log::warn!("embedding failed for rule chunk from {}: {}", source, e),
                    }
                }
                self.rules_index.lock().await.push(entry);
            }
        }
    }

    /// Overwrites the room's current game summary. One summary per room;
    /// the Summarizer replaces it each time it recaps.
    pub async fn save_game_summary(&self, room_id: &str, summary: String) {
        self.game_summaries.lock().await.insert(room_id.to_string(), summary);
    }

    pub async fn get_game_summary(&self, room_id: &str) -> Option<String> {
        self.game_summaries.lock().await.get(room_id).cloned()
    }

    /// Upserts `model` by `user_id` within the room. The PlayerModeler calls
    /// this once per modeled player per run, replacing that player's prior
    /// model.
    pub async fn save_player_model(&self, room_id: &str, model: PlayerModel) {
        let mut models = self.player_models.lock().await;
        models.entry(room_id.to_string()).or_default().insert(model.user_id.clone(), model);
    }

    pub async fn get_player_models(&self, room_id: &str) -> Vec<PlayerModel> {
        self.player_models.lock().await.get(room_id).map(|m| m.values().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_handles_length_mismatch_and_zero_norm() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn chunking_respects_default_window_and_overlap() {
        let text = (0..1000).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk_document(&text, 500, 50);
        // ceil((1000 - 50) / 450) = 3
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= 500);
        }
    }

    #[test]
    fn short_document_yields_a_single_chunk() {
        let text = "a b c d e";
        let chunks = chunk_document(text, 500, 50);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn keyword_search_with_no_matching_tokens_returns_zero() {
        assert_eq!(keyword_overlap_score("ghost votes", "completely unrelated content"), 0.0);
    }

    #[tokio::test]
    async fn ring_evicts_fifo_at_capacity() {
        let manager = MemoryManager::new(3);
        for letter in ["A", "B", "C", "D"] {
            manager.store("R1", MemoryEntry::new(MemoryEntryType::Event, letter)).await;
        }
        assert_eq!(manager.short_term_len("R1").await, 3);
        let remaining: Vec<String> = {
            let rooms = manager.rooms.lock().await;
            rooms.get("R1").unwrap().ring.iter().map(|e| e.content.clone()).collect()
        };
        assert_eq!(remaining, vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn keyword_rules_search_excludes_zero_score_entries() {
        let manager = MemoryManager::new(10);
        manager
            .ingest_rules(vec![("corpus".to_string(), "a ghost may still cast a vote after death".to_string())])
            .await;
        let results = manager.search_rules("unrelated query about nothing", 5).await;
        assert!(results.is_empty());

        let results = manager.search_rules("ghost vote rules", 5).await;
        assert_eq!(results.len(), 1);
    }
}
