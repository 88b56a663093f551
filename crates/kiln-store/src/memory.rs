//! In-memory coordination store.

use async_trait::async_trait;
use kiln_core::Result;
use kiln_core::ports::CoordinationStore;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct State {
    values: HashMap<String, Entry>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
}

/// Coordination store held in process memory.
///
/// Shared between every builder of a single worker. Expired values are
/// dropped lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_range(score: f64, min: f64, max: f64) -> bool {
    score >= min && score <= max
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        match state.values.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.state.write().await.values.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if state.values.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.values.remove(key);
        state.sorted_sets.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn sorted_set_add(&self, set: &str, member: &str, score: f64) -> Result<()> {
        self.state
            .write()
            .await
            .sorted_sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        set: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let Some(members) = state.sorted_sets.get(set) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<(&String, f64)> = members
            .iter()
            .filter(|(_, score)| in_range(**score, min, max))
            .map(|(member, score)| (member, *score))
            .collect();
        matching.sort_by(|(ma, sa), (mb, sb)| sa.total_cmp(sb).then_with(|| ma.cmp(mb)));

        Ok(matching
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn sorted_set_remove_range_by_score(
        &self,
        set: &str,
        min: f64,
        max: f64,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(members) = state.sorted_sets.get_mut(set) else {
            return Ok(0);
        };
        let before = members.len();
        members.retain(|_, score| !in_range(*score, min, max));
        Ok((before - members.len()) as u64)
    }

    async fn sorted_set_count(&self, set: &str, min: f64, max: f64) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .sorted_sets
            .get(set)
            .map(|members| members.values().filter(|s| in_range(**s, min, max)).count() as u64)
            .unwrap_or(0))
    }

    async fn list_push(&self, list: &str, value: &[u8]) -> Result<()> {
        self.state
            .write()
            .await
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_vec());
        Ok(())
    }

    async fn list_pop(&self, list: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .write()
            .await
            .lists
            .get_mut(list)
            .and_then(VecDeque::pop_front))
    }

    async fn list_length(&self, list: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .await
            .lists
            .get(list)
            .map(VecDeque::len)
            .unwrap_or(0))
    }
}
