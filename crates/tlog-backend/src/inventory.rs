use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tlog_types::{RecordState, RecordStatus, Token};

/// Tokens by status, for one record state.
pub type StatusMap = BTreeMap<RecordStatus, Vec<Token>>;

/// In-memory status inventory.
///
/// Derived from the latest record index of every tree and rebuilt on
/// startup. Within a status, tokens keep the order they were added in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub unvetted: StatusMap,
    pub vetted: StatusMap,
}

impl Inventory {
    fn map(&self, state: RecordState) -> &StatusMap {
        match state {
            RecordState::Unvetted => &self.unvetted,
            RecordState::Vetted => &self.vetted,
        }
    }

    fn map_mut(&mut self, state: RecordState) -> &mut StatusMap {
        match state {
            RecordState::Unvetted => &mut self.unvetted,
            RecordState::Vetted => &mut self.vetted,
        }
    }

    /// Record `token` under `status`, replacing any earlier status it had in
    /// `state`.
    pub fn set(&mut self, state: RecordState, token: Token, status: RecordStatus) {
        self.remove(state, &token);
        self.map_mut(state).entry(status).or_default().push(token);
    }

    pub fn remove(&mut self, state: RecordState, token: &Token) -> Option<RecordStatus> {
        let map = self.map_mut(state);
        let status = map
            .iter()
            .find(|(_, tokens)| tokens.contains(token))
            .map(|(status, _)| *status)?;
        if let Some(tokens) = map.get_mut(&status) {
            tokens.retain(|t| t != token);
            if tokens.is_empty() {
                map.remove(&status);
            }
        }
        Some(status)
    }

    pub fn status(&self, state: RecordState, token: &Token) -> Option<RecordStatus> {
        self.map(state)
            .iter()
            .find(|(_, tokens)| tokens.contains(token))
            .map(|(status, _)| *status)
    }

    pub fn contains(&self, state: RecordState, token: &Token) -> bool {
        self.status(state, token).is_some()
    }

    pub fn tokens(&self, state: RecordState, status: RecordStatus) -> &[Token] {
        self.map(state).get(&status).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.unvetted
            .values()
            .chain(self.vetted.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_types::TreeId;

    fn token(n: i64) -> Token {
        Token::from_tree_id(TreeId(n))
    }

    #[test]
    fn set_moves_between_statuses() {
        let mut inv = Inventory::default();
        inv.set(RecordState::Unvetted, token(1), RecordStatus::NotReviewed);
        inv.set(RecordState::Unvetted, token(2), RecordStatus::NotReviewed);
        inv.set(RecordState::Unvetted, token(1), RecordStatus::UnreviewedChanges);

        assert_eq!(
            inv.tokens(RecordState::Unvetted, RecordStatus::NotReviewed),
            &[token(2)]
        );
        assert_eq!(
            inv.status(RecordState::Unvetted, &token(1)),
            Some(RecordStatus::UnreviewedChanges)
        );
        assert_eq!(inv.len(), 2);
    }

    #[test]
    fn states_are_independent() {
        let mut inv = Inventory::default();
        inv.set(RecordState::Vetted, token(1), RecordStatus::Public);
        assert!(!inv.contains(RecordState::Unvetted, &token(1)));
        assert!(inv.contains(RecordState::Vetted, &token(1)));
    }

    #[test]
    fn remove_drops_empty_status() {
        let mut inv = Inventory::default();
        inv.set(RecordState::Unvetted, token(1), RecordStatus::NotReviewed);
        assert_eq!(
            inv.remove(RecordState::Unvetted, &token(1)),
            Some(RecordStatus::NotReviewed)
        );
        assert!(inv.unvetted.is_empty());
        assert!(inv.is_empty());
        assert_eq!(inv.remove(RecordState::Unvetted, &token(1)), None);
    }
}
