//! # Vote Aggregation
//!
//! Keeps a local `{upvotes, downvotes, user_vote}` view per post and applies
//! votes optimistically before the backend confirms them.
//!
//! Policies:
//! - a failed remote mutation reverts the optimistic delta;
//! - at most one mutation is in flight per post; a second cast while one is
//!   outstanding is rejected before touching the backend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{SessionUser, Vote, VoteType};
use crate::traits::ForumStore;

/// Local counters for one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<VoteType>,
}

impl VoteTally {
    /// Counts vote rows; `user` picks out the caller's own row.
    pub fn from_rows(rows: &[Vote], user: Option<Uuid>) -> Self {
        let upvotes = rows.iter().filter(|v| v.vote_type == VoteType::Up).count() as i64;
        let downvotes = rows.len() as i64 - upvotes;
        let user_vote = user.and_then(|id| rows.iter().find(|v| v.user_id == id).map(|v| v.vote_type));
        Self { upvotes, downvotes, user_vote }
    }

    /// Net score shown next to the arrows.
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }

    fn apply(&mut self, t: &Transition) {
        self.upvotes += t.up_delta;
        self.downvotes += t.down_delta;
        self.user_vote = t.next;
    }

    fn revert(&mut self, t: &Transition) {
        self.upvotes -= t.up_delta;
        self.downvotes -= t.down_delta;
        self.user_vote = t.previous;
    }
}

/// The backend mutation that realises a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Insert(VoteType),
    Update(VoteType),
    Delete,
}

/// Effect of requesting a vote given the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<VoteType>,
    pub next: Option<VoteType>,
    pub up_delta: i64,
    pub down_delta: i64,
    pub op: RemoteOp,
}

fn delta(vote: VoteType, amount: i64) -> (i64, i64) {
    match vote {
        VoteType::Up => (amount, 0),
        VoteType::Down => (0, amount),
    }
}

/// Repeating the current vote retracts it; the opposite vote flips it.
pub fn transition(current: Option<VoteType>, requested: VoteType) -> Transition {
    let (up_delta, down_delta, next, op) = match current {
        None => {
            let (u, d) = delta(requested, 1);
            (u, d, Some(requested), RemoteOp::Insert(requested))
        }
        Some(existing) if existing == requested => {
            let (u, d) = delta(requested, -1);
            (u, d, None, RemoteOp::Delete)
        }
        Some(existing) => {
            let (ru, rd) = delta(existing, -1);
            let (au, ad) = delta(requested, 1);
            (ru + au, rd + ad, Some(requested), RemoteOp::Update(requested))
        }
    };
    Transition { previous: current, next, up_delta, down_delta, op }
}

#[derive(Debug, Default)]
struct AggregatorState {
    tally: VoteTally,
    /// Whose vote `tally.user_vote` is.
    owner: Option<Uuid>,
    in_flight: bool,
}

/// Vote state of one post.
pub struct VoteAggregator {
    post_id: Uuid,
    store: Arc<dyn ForumStore>,
    state: Mutex<AggregatorState>,
}

impl VoteAggregator {
    pub fn new(post_id: Uuid, store: Arc<dyn ForumStore>) -> Self {
        Self { post_id, store, state: Mutex::new(AggregatorState::default()) }
    }

    pub fn post_id(&self) -> Uuid {
        self.post_id
    }

    pub async fn tally(&self) -> VoteTally {
        self.state.lock().await.tally
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.in_flight
    }

    /// Recounts all rows. A failed fetch keeps the previous counters.
    pub async fn load_votes(&self) -> VoteTally {
        match self.store.list_votes(self.post_id).await {
            Ok(rows) => {
                let counted = VoteTally::from_rows(&rows, None);
                let mut state = self.state.lock().await;
                state.tally.upvotes = counted.upvotes;
                state.tally.downvotes = counted.downvotes;
                state.tally
            }
            Err(err) => {
                log::warn!("could not load votes for post {}: {:#}", self.post_id, err);
                self.tally().await
            }
        }
    }

    /// Loads the caller's own vote. No row means no vote yet.
    pub async fn load_user_vote(&self, user_id: Uuid) -> VoteTally {
        if let Err(err) = self.fetch_user_vote(user_id).await {
            log::warn!("could not load vote of {} on post {}: {:#}", user_id, self.post_id, err);
        }
        self.tally().await
    }

    async fn fetch_user_vote(&self, user_id: Uuid) -> anyhow::Result<()> {
        let row = self.store.get_vote(self.post_id, user_id).await?;
        let mut state = self.state.lock().await;
        // A cast in flight already owns the state; it settles on its own.
        if !state.in_flight {
            state.tally.user_vote = row.map(|v| v.vote_type);
            state.owner = Some(user_id);
        }
        Ok(())
    }

    /// Reloads counters and the viewer's vote, as done each time the post is shown.
    pub async fn mount(&self, viewer: Option<Uuid>) -> VoteTally {
        self.load_votes().await;
        match viewer {
            Some(user_id) => self.load_user_vote(user_id).await,
            None => {
                let mut state = self.state.lock().await;
                if !state.in_flight {
                    state.tally.user_vote = None;
                    state.owner = None;
                }
                state.tally
            }
        }
    }

    /// Applies the vote locally, then pushes it to the backend.
    ///
    /// The remote part runs on its own task so an abandoned request cannot
    /// leave the post locked.
    pub async fn cast_vote(
        self: &Arc<Self>,
        user: Option<&SessionUser>,
        requested: VoteType,
    ) -> Result<VoteTally> {
        let user_id = user
            .map(|u| u.id)
            .ok_or_else(|| AppError::Unauthorized("Please log in to vote".to_string()))?;

        // The last mount may have been for someone else.
        let owned = self.state.lock().await.owner == Some(user_id);
        if !owned {
            self.fetch_user_vote(user_id).await?;
        }

        let step = {
            let mut state = self.state.lock().await;
            if state.in_flight {
                return Err(AppError::Conflict("a vote on this post is still being saved".to_string()));
            }
            if state.owner != Some(user_id) {
                return Err(AppError::Conflict("vote state changed, please try again".to_string()));
            }
            let step = transition(state.tally.user_vote, requested);
            state.tally.apply(&step);
            state.in_flight = true;
            step
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.settle(user_id, step).await })
            .await
            .map_err(|e| AppError::Internal(format!("vote task failed: {e}")))?
    }

    async fn settle(&self, user_id: Uuid, step: Transition) -> Result<VoteTally> {
        let outcome = self.push(user_id, step.op).await;

        let mut state = self.state.lock().await;
        state.in_flight = false;
        match outcome {
            Ok(()) => Ok(state.tally),
            Err(err) => {
                log::warn!("vote {:?} on post {} failed, reverting: {:#}", step.op, self.post_id, err);
                state.tally.revert(&step);
                Err(AppError::Remote(format!("{err:#}")))
            }
        }
    }

    async fn push(&self, user_id: Uuid, op: RemoteOp) -> anyhow::Result<()> {
        let post_id = self.post_id;
        match op {
            RemoteOp::Insert(vote_type) => {
                self.store.insert_vote(Vote { post_id, user_id, vote_type }).await
            }
            RemoteOp::Update(vote_type) => {
                self.store.update_vote(Vote { post_id, user_id, vote_type }).await
            }
            RemoteOp::Delete => self.store.delete_vote(post_id, user_id).await,
        }
    }
}

/// One aggregator per post for the lifetime of the client.
pub struct VoteRegistry {
    store: Arc<dyn ForumStore>,
    aggregators: DashMap<Uuid, Arc<VoteAggregator>>,
}

impl VoteRegistry {
    pub fn new(store: Arc<dyn ForumStore>) -> Self {
        Self { store, aggregators: DashMap::new() }
    }

    pub fn aggregator(&self, post_id: Uuid) -> Arc<VoteAggregator> {
        self.aggregators
            .entry(post_id)
            .or_insert_with(|| Arc::new(VoteAggregator::new(post_id, self.store.clone())))
            .clone()
    }

    /// Called once the post itself is gone.
    pub fn forget(&self, post_id: Uuid) {
        self.aggregators.remove(&post_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockForumStore;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    type Rows = Arc<StdMutex<HashMap<(Uuid, Uuid), VoteType>>>;

    /// A mock whose vote methods behave like a table keyed by (post, user).
    fn vote_table(rows: Rows) -> MockForumStore {
        let mut store = MockForumStore::new();

        let r = rows.clone();
        store.expect_list_votes().returning(move |post_id| {
            Ok(r.lock()
                .unwrap()
                .iter()
                .filter(|((p, _), _)| *p == post_id)
                .map(|((p, u), t)| Vote { post_id: *p, user_id: *u, vote_type: *t })
                .collect())
        });
        let r = rows.clone();
        store.expect_get_vote().returning(move |post_id, user_id| {
            Ok(r.lock()
                .unwrap()
                .get(&(post_id, user_id))
                .map(|t| Vote { post_id, user_id, vote_type: *t }))
        });
        let r = rows.clone();
        store.expect_insert_vote().returning(move |vote| {
            let mut rows = r.lock().unwrap();
            anyhow::ensure!(!rows.contains_key(&(vote.post_id, vote.user_id)), "duplicate vote");
            rows.insert((vote.post_id, vote.user_id), vote.vote_type);
            Ok(())
        });
        let r = rows.clone();
        store.expect_update_vote().returning(move |vote| {
            r.lock().unwrap().insert((vote.post_id, vote.user_id), vote.vote_type);
            Ok(())
        });
        let r = rows;
        store.expect_delete_vote().returning(move |post_id, user_id| {
            r.lock().unwrap().remove(&(post_id, user_id));
            Ok(())
        });
        store
    }

    fn user(id: Uuid) -> SessionUser {
        SessionUser { id, email: None, profile: None }
    }

    #[test]
    fn test_transition_table() {
        use VoteType::{Down, Up};
        let cases = [
            (None, Up, 1, 0, Some(Up), RemoteOp::Insert(Up)),
            (None, Down, 0, 1, Some(Down), RemoteOp::Insert(Down)),
            (Some(Up), Up, -1, 0, None, RemoteOp::Delete),
            (Some(Down), Down, 0, -1, None, RemoteOp::Delete),
            (Some(Up), Down, -1, 1, Some(Down), RemoteOp::Update(Down)),
            (Some(Down), Up, 1, -1, Some(Up), RemoteOp::Update(Up)),
        ];
        for (current, requested, up, down, next, op) in cases {
            let t = transition(current, requested);
            assert_eq!((t.up_delta, t.down_delta, t.next, t.op), (up, down, next, op));
        }
    }

    #[tokio::test]
    async fn test_empty_post_starts_at_zero() {
        let store = vote_table(Rows::default());
        let agg = VoteAggregator::new(Uuid::now_v7(), Arc::new(store));
        let tally = agg.mount(Some(Uuid::now_v7())).await;
        assert_eq!(tally, VoteTally { upvotes: 0, downvotes: 0, user_vote: None });
    }

    #[tokio::test]
    async fn test_up_up_down_scenario() {
        let store = vote_table(Rows::default());
        let agg = Arc::new(VoteAggregator::new(Uuid::now_v7(), Arc::new(store)));
        let a = user(Uuid::now_v7());
        let baseline = agg.mount(Some(a.id)).await.score();

        let t = agg.cast_vote(Some(&a), VoteType::Up).await.unwrap();
        assert_eq!(t.score(), baseline + 1);

        let t = agg.cast_vote(Some(&a), VoteType::Up).await.unwrap();
        assert_eq!(t.score(), baseline);
        assert_eq!(t.user_vote, None);

        let t = agg.cast_vote(Some(&a), VoteType::Down).await.unwrap();
        assert_eq!(t.score(), baseline - 1);
        assert_eq!(t.user_vote, Some(VoteType::Down));
    }

    #[tokio::test]
    async fn test_every_short_sequence_matches_reload() {
        // All sequences of up to five casts by one user.
        for len in 1..=5u32 {
            for bits in 0..(1u32 << len) {
                let seq: Vec<VoteType> = (0..len)
                    .map(|i| if bits & (1 << i) == 0 { VoteType::Up } else { VoteType::Down })
                    .collect();

                let rows = Rows::default();
                let post = Uuid::now_v7();
                let other = Uuid::now_v7();
                rows.lock().unwrap().insert((post, other), VoteType::Up);

                let agg = Arc::new(VoteAggregator::new(post, Arc::new(vote_table(rows.clone()))));
                let me = user(Uuid::now_v7());
                agg.mount(Some(me.id)).await;

                let mut last = None;
                for vote in &seq {
                    last = agg.cast_vote(Some(&me), *vote).await.unwrap().user_vote;
                }

                // A trailing run of identical casts toggles: odd length keeps
                // the vote, even length retracts it.
                let final_vote = seq[seq.len() - 1];
                let run = seq.iter().rev().take_while(|v| **v == final_vote).count();
                let expected = if run % 2 == 0 { None } else { Some(final_vote) };
                assert_eq!(last, expected, "sequence {seq:?}");

                let local = agg.tally().await.score();
                let reloaded = VoteAggregator::new(post, Arc::new(vote_table(rows)));
                assert_eq!(local, reloaded.load_votes().await.score(), "sequence {seq:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_anonymous_cast_is_rejected_without_remote_call() {
        let mut store = MockForumStore::new();
        store.expect_insert_vote().never();
        store.expect_update_vote().never();
        store.expect_delete_vote().never();
        let agg = Arc::new(VoteAggregator::new(Uuid::now_v7(), Arc::new(store)));

        let err = agg.cast_vote(None, VoteType::Up).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(agg.tally().await, VoteTally::default());
    }

    #[tokio::test]
    async fn test_failed_mutation_reverts_optimistic_delta() {
        let mut store = MockForumStore::new();
        store.expect_list_votes().returning(|post_id| {
            Ok(vec![Vote { post_id, user_id: Uuid::now_v7(), vote_type: VoteType::Down }])
        });
        store.expect_get_vote().returning(|_, _| Ok(None));
        store
            .expect_insert_vote()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("network unreachable")));
        let agg = Arc::new(VoteAggregator::new(Uuid::now_v7(), Arc::new(store)));
        let me = user(Uuid::now_v7());
        let before = agg.mount(Some(me.id)).await;

        let err = agg.cast_vote(Some(&me), VoteType::Up).await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
        assert_eq!(agg.tally().await, before);
        assert!(!agg.is_busy().await);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_counts() {
        let mut store = MockForumStore::new();
        let mut first = true;
        store.expect_list_votes().returning(move |post_id| {
            if std::mem::take(&mut first) {
                Ok(vec![Vote { post_id, user_id: Uuid::now_v7(), vote_type: VoteType::Up }])
            } else {
                Err(anyhow::anyhow!("timeout"))
            }
        });
        let agg = VoteAggregator::new(Uuid::now_v7(), Arc::new(store));
        assert_eq!(agg.load_votes().await.upvotes, 1);
        assert_eq!(agg.load_votes().await.upvotes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cast_while_in_flight_is_rejected() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Arc::new(StdMutex::new(release_rx));
        let mut store = MockForumStore::new();
        store.expect_get_vote().returning(|_, _| Ok(None));
        store.expect_insert_vote().times(1).returning(move |_| {
            // Block the vote task until the test lets it finish.
            let _ = release_rx.lock().unwrap().recv();
            Ok(())
        });
        let agg = Arc::new(VoteAggregator::new(Uuid::now_v7(), Arc::new(store)));
        let me = user(Uuid::now_v7());

        let first = {
            let agg = agg.clone();
            let me = me.clone();
            tokio::spawn(async move { agg.cast_vote(Some(&me), VoteType::Up).await })
        };
        while !agg.is_busy().await {
            tokio::task::yield_now().await;
        }

        let err = agg.cast_vote(Some(&me), VoteType::Down).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        release_tx.send(()).unwrap();
        let tally = first.await.unwrap().unwrap();
        assert_eq!(tally.user_vote, Some(VoteType::Up));
    }

    #[test]
    fn test_registry_reuses_aggregators() {
        let registry = VoteRegistry::new(Arc::new(MockForumStore::new()));
        let post = Uuid::now_v7();
        let a = registry.aggregator(post);
        let b = registry.aggregator(post);
        assert!(Arc::ptr_eq(&a, &b));
        registry.forget(post);
        assert!(!Arc::ptr_eq(&a, &registry.aggregator(post)));
    }

    #[tokio::test]
    async fn test_cast_by_another_user_uses_their_own_vote() {
        let rows = Rows::default();
        let post = Uuid::now_v7();
        let registry = VoteRegistry::new(Arc::new(vote_table(rows.clone())));
        let (a, b) = (user(Uuid::now_v7()), user(Uuid::now_v7()));

        // A views the post and upvotes it, then B votes from a page rendered for A.
        let agg = registry.aggregator(post);
        agg.mount(Some(a.id)).await;
        agg.cast_vote(Some(&a), VoteType::Up).await.unwrap();

        let t = agg.cast_vote(Some(&b), VoteType::Up).await.unwrap();
        assert_eq!(t, VoteTally { upvotes: 2, downvotes: 0, user_vote: Some(VoteType::Up) });
        assert_eq!(rows.lock().unwrap().get(&(post, b.id)), Some(&VoteType::Up));

        let reloaded = VoteAggregator::new(post, Arc::new(vote_table(rows)));
        assert_eq!(t.score(), reloaded.load_votes().await.score());
    }

    #[tokio::test]
    async fn test_switching_user_flips_their_existing_vote() {
        let rows = Rows::default();
        let post = Uuid::now_v7();
        let (a, b) = (user(Uuid::now_v7()), user(Uuid::now_v7()));
        rows.lock().unwrap().insert((post, a.id), VoteType::Up);
        rows.lock().unwrap().insert((post, b.id), VoteType::Down);

        let agg = Arc::new(VoteAggregator::new(post, Arc::new(vote_table(rows.clone()))));
        agg.mount(Some(a.id)).await;

        let t = agg.cast_vote(Some(&b), VoteType::Up).await.unwrap();
        assert_eq!(t, VoteTally { upvotes: 2, downvotes: 0, user_vote: Some(VoteType::Up) });
        assert_eq!(rows.lock().unwrap().get(&(post, b.id)), Some(&VoteType::Up));
        assert_eq!(rows.lock().unwrap().get(&(post, a.id)), Some(&VoteType::Up));
    }

    #[tokio::test]
    async fn test_failed_owner_lookup_aborts_cast() {
        let mut store = MockForumStore::new();
        store.expect_get_vote().returning(|_, _| Err(anyhow::anyhow!("timeout")));
        store.expect_insert_vote().never();
        store.expect_update_vote().never();
        store.expect_delete_vote().never();
        let agg = Arc::new(VoteAggregator::new(Uuid::now_v7(), Arc::new(store)));

        let err = agg.cast_vote(Some(&user(Uuid::now_v7())), VoteType::Up).await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
        assert_eq!(agg.tally().await, VoteTally::default());
    }
}
