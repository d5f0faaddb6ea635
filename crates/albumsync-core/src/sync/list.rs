use crate::models::Challenge;

/// In-memory challenge list. Ids are unique; order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeList {
    items: Vec<Challenge>,
}

impl ChallengeList {
    pub fn new(items: Vec<Challenge>) -> Self {
        let mut list = Self::default();
        list.replace(items);
        list
    }

    pub fn as_slice(&self) -> &[Challenge] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Challenge> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Replace an existing challenge in place, or append a new one.
    pub fn upsert(&mut self, challenge: Challenge) {
        match self.items.iter_mut().find(|c| c.id == challenge.id) {
            Some(existing) => *existing = challenge,
            None => self.items.push(challenge),
        }
    }

    /// Remove by id. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|c| c.id != id);
        self.items.len() != before
    }

    /// Wholesale replacement. A payload repeating an id keeps the first position
    /// and the last value.
    pub fn replace(&mut self, items: Vec<Challenge>) {
        self.items.clear();
        for challenge in items {
            self.upsert(challenge);
        }
    }

    pub fn to_vec(&self) -> Vec<Challenge> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &ChallengeList) -> Vec<&str> {
        list.as_slice().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_created_event_appends_new_challenge() {
        let mut list = ChallengeList::new(vec![
            Challenge::new("c1", "Best sunset"),
            Challenge::new("c2", "Group photo"),
        ]);

        list.upsert(Challenge::new("c3", "Silly hat"));

        assert_eq!(ids(&list), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_upsert_existing_replaces_in_place() {
        let mut list = ChallengeList::new(vec![
            Challenge::new("c1", "Best sunset"),
            Challenge::new("c2", "Group photo"),
        ]);

        list.upsert(Challenge::new("c1", "Best sunrise"));

        assert_eq!(ids(&list), vec!["c1", "c2"]);
        assert_eq!(list.get("c1").map(|c| c.title.as_str()), Some("Best sunrise"));
    }

    #[test]
    fn test_remove() {
        let mut list = ChallengeList::new(vec![Challenge::new("c1", "A"), Challenge::new("c2", "B")]);

        assert!(list.remove("c1"));
        assert!(!list.remove("missing"));
        assert_eq!(ids(&list), vec!["c2"]);
    }

    #[test]
    fn test_replace_is_exact_and_deduplicates() {
        let mut list = ChallengeList::new(vec![Challenge::new("old", "Gone")]);

        list.replace(vec![
            Challenge::new("a", "First"),
            Challenge::new("b", "Second"),
            Challenge::new("a", "First again"),
        ]);

        assert_eq!(ids(&list), vec!["a", "b"]);
        assert_eq!(list.get("a").map(|c| c.title.as_str()), Some("First again"));
        assert!(list.get("old").is_none());
    }
}
