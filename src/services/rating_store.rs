use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, EngineResult},
    models::{DuplicatePolicy, ItemId, Rating, RatingScale, UserId},
};

static NO_ITEMS: BTreeSet<ItemId> = BTreeSet::new();
static NO_USERS: BTreeSet<UserId> = BTreeSet::new();

/// Observed ratings plus the per-user and per-item views over them.
///
/// Values are validated against the store's [`RatingScale`] on the way in.
/// Users and items can also be registered without any observation, which is
/// how unrated catalog items become recommendation candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "StoreRecord", try_from = "StoreRecord")]
pub struct RatingStore {
    scale: RatingScale,
    policy: DuplicatePolicy,
    ratings: Vec<Rating>,
    /// Number of submissions folded into each stored rating
    submissions: Vec<u32>,
    slots: HashMap<(UserId, ItemId), usize>,
    by_user: BTreeMap<UserId, BTreeSet<ItemId>>,
    by_item: BTreeMap<ItemId, BTreeSet<UserId>>,
    users: BTreeSet<UserId>,
    items: BTreeSet<ItemId>,
}

impl Default for RatingStore {
    fn default() -> Self {
        Self::new(RatingScale::default())
    }
}

impl RatingStore {
    /// Creates an empty store keeping every submission
    pub fn new(scale: RatingScale) -> Self {
        Self::with_policy(scale, DuplicatePolicy::default())
    }

    pub fn with_policy(scale: RatingScale, policy: DuplicatePolicy) -> Self {
        Self {
            scale,
            policy,
            ratings: Vec::new(),
            submissions: Vec::new(),
            slots: HashMap::new(),
            by_user: BTreeMap::new(),
            by_item: BTreeMap::new(),
            users: BTreeSet::new(),
            items: BTreeSet::new(),
        }
    }

    /// Records a rating, failing if the value lies outside the scale
    pub fn add(&mut self, user_id: UserId, item_id: ItemId, value: f64) -> EngineResult<()> {
        self.scale.check(value)?;
        self.insert(Rating::new(user_id, item_id, value));
        Ok(())
    }

    /// Records a batch of ratings. Nothing is stored unless every value is valid.
    pub fn add_all(&mut self, ratings: &[Rating]) -> EngineResult<usize> {
        for rating in ratings {
            self.scale.check(rating.value)?;
        }
        for rating in ratings {
            self.insert(*rating);
        }
        Ok(ratings.len())
    }

    /// Registers a user with no observations
    pub fn add_user(&mut self, user_id: UserId) {
        self.users.insert(user_id);
    }

    /// Registers an item with no observations
    pub fn add_item(&mut self, item_id: ItemId) {
        self.items.insert(item_id);
    }

    fn insert(&mut self, rating: Rating) {
        let Rating {
            user_id, item_id, ..
        } = rating;
        self.users.insert(user_id);
        self.items.insert(item_id);
        self.by_user.entry(user_id).or_default().insert(item_id);
        self.by_item.entry(item_id).or_default().insert(user_id);

        match (self.policy, self.slots.get(&(user_id, item_id)).copied()) {
            (DuplicatePolicy::KeepLatest, Some(slot)) => {
                self.ratings[slot].value = rating.value;
                self.submissions[slot] += 1;
            }
            (DuplicatePolicy::Average, Some(slot)) => {
                let seen = f64::from(self.submissions[slot]);
                let stored = &mut self.ratings[slot];
                stored.value = (stored.value * seen + rating.value) / (seen + 1.0);
                self.submissions[slot] += 1;
            }
            _ => {
                self.slots.insert((user_id, item_id), self.ratings.len());
                self.ratings.push(rating);
                self.submissions.push(1);
            }
        }
    }

    /// Items rated by `user_id`; empty when the user is unknown
    pub fn rated_items(&self, user_id: UserId) -> &BTreeSet<ItemId> {
        self.by_user.get(&user_id).unwrap_or(&NO_ITEMS)
    }

    /// Users who rated `item_id`; empty when the item is unknown
    pub fn raters(&self, item_id: ItemId) -> &BTreeSet<UserId> {
        self.by_item.get(&item_id).unwrap_or(&NO_USERS)
    }

    pub fn all_users(&self) -> &BTreeSet<UserId> {
        &self.users
    }

    pub fn all_items(&self) -> &BTreeSet<ItemId> {
        &self.items
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    /// Stored observations in ingestion order
    pub fn observations(&self) -> &[Rating] {
        &self.ratings
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn scale(&self) -> RatingScale {
        self.scale
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Average of the stored values
    pub fn mean(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let total: f64 = self.ratings.iter().map(|r| r.value).sum();
        Some(total / self.ratings.len() as f64)
    }

    /// Partitions the observations into `(train, test)` after a seeded shuffle.
    ///
    /// `fraction` is the share that goes to the test half, rounded up. Both
    /// halves keep the full set of known users and items so that ids stay
    /// resolvable on either side.
    pub fn split(&self, fraction: f64, seed: u64) -> EngineResult<(RatingStore, RatingStore)> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(EngineError::InvalidConfig(format!(
                "test fraction must be in [0, 1), got {fraction}"
            )));
        }

        let mut order: Vec<usize> = (0..self.ratings.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let test_len = (self.ratings.len() as f64 * fraction).ceil() as usize;
        let mut train = self.empty_like();
        let mut test = self.empty_like();

        for (position, &index) in order.iter().enumerate() {
            let target = if position < test_len {
                &mut test
            } else {
                &mut train
            };
            target.insert(self.ratings[index]);
        }

        Ok((train, test))
    }

    fn empty_like(&self) -> Self {
        let mut store = Self::with_policy(self.scale, self.policy);
        store.users = self.users.clone();
        store.items = self.items.clone();
        store
    }
}

/// Serialized form of a [`RatingStore`]
#[derive(Serialize, Deserialize)]
struct StoreRecord {
    scale: RatingScale,
    policy: DuplicatePolicy,
    ratings: Vec<Rating>,
    /// Parallel to `ratings`; absent means one submission each
    #[serde(default)]
    submissions: Vec<u32>,
    users: Vec<UserId>,
    items: Vec<ItemId>,
}

impl From<RatingStore> for StoreRecord {
    fn from(store: RatingStore) -> Self {
        Self {
            scale: store.scale,
            policy: store.policy,
            ratings: store.ratings,
            submissions: store.submissions,
            users: store.users.into_iter().collect(),
            items: store.items.into_iter().collect(),
        }
    }
}

impl TryFrom<StoreRecord> for RatingStore {
    type Error = EngineError;

    fn try_from(record: StoreRecord) -> Result<Self, Self::Error> {
        let scale = RatingScale::new(record.scale.min, record.scale.max)?;
        let mut store = RatingStore::with_policy(scale, record.policy);
        store.add_all(&record.ratings)?;

        if !record.submissions.is_empty() {
            if record.submissions.len() != store.ratings.len() {
                return Err(EngineError::InvalidSnapshot(format!(
                    "{} submission counts for {} stored ratings",
                    record.submissions.len(),
                    store.ratings.len()
                )));
            }
            if record.submissions.contains(&0) {
                return Err(EngineError::InvalidSnapshot(
                    "submission count of zero".to_string(),
                ));
            }
            store.submissions = record.submissions;
        }

        store.users.extend(record.users);
        store.items.extend(record.items);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> RatingStore {
        let mut store = RatingStore::default();
        store.add(1, 10, 5.0).unwrap();
        store.add(1, 20, 1.0).unwrap();
        store.add(2, 10, 4.0).unwrap();
        store
    }

    #[test]
    fn test_add_rejects_out_of_range() {
        let mut store = RatingStore::default();
        let result = store.add(1, 10, 6.0);
        assert!(matches!(result, Err(EngineError::RatingOutOfRange { .. })));
        assert!(store.is_empty());
        assert!(store.all_users().is_empty());
    }

    #[test]
    fn test_rated_items_and_raters() {
        let store = sample_store();
        assert_eq!(
            store.rated_items(1).iter().copied().collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert_eq!(
            store.raters(10).iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(store.rated_items(99).is_empty());
        assert!(store.raters(99).is_empty());
    }

    #[test]
    fn test_all_users_and_items() {
        let mut store = sample_store();
        store.add_item(30);
        store.add_user(3);

        assert_eq!(store.all_users().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(
            store.all_items().iter().copied().collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        assert_eq!(store.len(), 3);
        assert!(store.rated_items(3).is_empty());
    }

    #[test]
    fn test_add_all_is_atomic() {
        let mut store = RatingStore::default();
        let batch = [Rating::new(1, 10, 3.0), Rating::new(1, 20, 9.0)];
        assert!(store.add_all(&batch).is_err());
        assert!(store.is_empty());

        let batch = [Rating::new(1, 10, 3.0), Rating::new(1, 20, 4.0)];
        assert_eq!(store.add_all(&batch).unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_policies() {
        let scale = RatingScale::default();

        let mut keep_all = RatingStore::with_policy(scale, DuplicatePolicy::KeepAll);
        keep_all.add(1, 10, 2.0).unwrap();
        keep_all.add(1, 10, 4.0).unwrap();
        assert_eq!(keep_all.len(), 2);

        let mut latest = RatingStore::with_policy(scale, DuplicatePolicy::KeepLatest);
        latest.add(1, 10, 2.0).unwrap();
        latest.add(1, 10, 4.0).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest.observations()[0].value, 4.0);

        let mut average = RatingStore::with_policy(scale, DuplicatePolicy::Average);
        average.add(1, 10, 2.0).unwrap();
        average.add(1, 10, 4.0).unwrap();
        average.add(1, 10, 3.0).unwrap();
        assert_eq!(average.len(), 1);
        assert!((average.observations()[0].value - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean() {
        assert_eq!(RatingStore::default().mean(), None);
        let store = sample_store();
        assert!((store.mean().unwrap() - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_split_sizes_and_universe() {
        let mut store = RatingStore::default();
        for user in 0..10 {
            for item in 0..10 {
                store.add(user, item, 0.5 + ((user + item) % 10) as f64 * 0.5).unwrap();
            }
        }
        store.add_item(500);

        let (train, test) = store.split(0.2, 42).unwrap();
        assert_eq!(test.len(), 20);
        assert_eq!(train.len(), 80);
        assert_eq!(train.all_items(), store.all_items());
        assert_eq!(test.all_users(), store.all_users());
        assert_eq!(train.scale(), store.scale());
    }

    #[test]
    fn test_split_rounds_test_share_up() {
        let store = sample_store();
        let (train, test) = store.split(0.2, 42).unwrap();
        assert_eq!(test.len(), 1);
        assert_eq!(train.len(), 2);
    }

    #[test]
    fn test_split_is_deterministic() {
        let mut store = RatingStore::default();
        for i in 0..50u32 {
            store.add(i % 7, i, 1.0 + (i % 4) as f64).unwrap();
        }

        let (train_a, test_a) = store.split(0.3, 7).unwrap();
        let (train_b, test_b) = store.split(0.3, 7).unwrap();
        assert_eq!(train_a.observations(), train_b.observations());
        assert_eq!(test_a.observations(), test_b.observations());

        let (_, test_c) = store.split(0.3, 8).unwrap();
        assert_ne!(test_a.observations(), test_c.observations());
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let store = sample_store();
        assert!(matches!(
            store.split(1.0, 42),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(store.split(-0.1, 42).is_err());
        assert!(store.split(f64::NAN, 42).is_err());

        let (train, test) = store.split(0.0, 42).unwrap();
        assert_eq!(train.len(), 3);
        assert!(test.is_empty());
    }

    #[test]
    fn test_serde_preserves_registered_ids() {
        let mut store = sample_store();
        store.add_item(30);

        let json = serde_json::to_string(&store).unwrap();
        let restored: RatingStore = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.observations(), store.observations());
        assert_eq!(restored.all_items(), store.all_items());
        assert_eq!(restored.rated_items(1), store.rated_items(1));
    }

    #[test]
    fn test_average_keeps_weight_across_serde() {
        let mut store =
            RatingStore::with_policy(RatingScale::default(), DuplicatePolicy::Average);
        store.add(1, 10, 2.0).unwrap();
        store.add(1, 10, 4.0).unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let mut restored: RatingStore = serde_json::from_str(&json).unwrap();

        store.add(1, 10, 5.0).unwrap();
        restored.add(1, 10, 5.0).unwrap();
        assert_eq!(restored.len(), 1);
        assert!((restored.observations()[0].value - 11.0 / 3.0).abs() < 1e-12);
        assert_eq!(restored.observations(), store.observations());
    }

    #[test]
    fn test_deserialize_rejects_mismatched_submission_counts() {
        let json = r#"{
            "scale": {"min": 0.5, "max": 5.0},
            "policy": "average",
            "ratings": [{"user_id": 1, "item_id": 2, "value": 3.0}],
            "submissions": [2, 1],
            "users": [],
            "items": []
        }"#;
        assert!(serde_json::from_str::<RatingStore>(json).is_err());

        let json = json.replace("[2, 1]", "[0]");
        assert!(serde_json::from_str::<RatingStore>(&json).is_err());
    }

    #[test]
    fn test_deserialize_rejects_out_of_scale_rating() {
        let json = r#"{
            "scale": {"min": 0.5, "max": 5.0},
            "policy": "keep_all",
            "ratings": [{"user_id": 1, "item_id": 2, "value": 9.0}],
            "users": [],
            "items": []
        }"#;
        assert!(serde_json::from_str::<RatingStore>(json).is_err());
    }
}
