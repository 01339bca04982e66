use crate::bracket::BracketState;
use crate::types::{Entrant, MatchId, SlotRef};

/// Moves `winner` of `from` into the next round of the same bracket.
///
/// Returns the slot written, or `None` when there is nothing downstream or
/// the target side already holds an entrant. Never touches `from` itself.
pub fn advance(state: &mut BracketState, from: MatchId, winner: &Entrant) -> Option<SlotRef> {
  let Some((target, side)) = state.topology().winner_slot(from) else {
    tracing::debug!(match_id = from, "no downstream match to advance into");
    return None;
  };
  if state.fill_side(target, side, winner) {
    tracing::info!(from, target, side = %side, "advanced winner");
    Some(SlotRef { match_id: target, side })
  } else {
    tracing::debug!(from, target, side = %side, "target side already filled; skipping advance");
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Match, Side};

  fn bracket() -> BracketState {
    BracketState::new(vec![
      Match::new(1, "R8"),
      Match::new(2, "R8"),
      Match::new(3, "R8"),
      Match::new(4, "R8"),
      Match::new(5, "SEMIFINAL"),
      Match::new(6, "SEMIFINAL"),
      Match::new(7, "FINAL"),
    ])
  }

  #[test]
  fn test_advance_halves_position() {
    let mut state = bracket();
    let slot = advance(&mut state, 3, &Entrant::Pairing(30));
    assert_eq!(slot, Some(SlotRef { match_id: 6, side: Side::A }));
    let slot = advance(&mut state, 4, &Entrant::Pairing(40));
    assert_eq!(slot, Some(SlotRef { match_id: 6, side: Side::B }));
  }

  #[test]
  fn test_advance_is_idempotent() {
    let mut state = bracket();
    let winner = Entrant::participants([7, 8]).unwrap();
    assert!(advance(&mut state, 1, &winner).is_some());
    assert_eq!(advance(&mut state, 1, &winner), None);
    assert_eq!(advance(&mut state, 1, &Entrant::Pairing(99)), None);
    assert_eq!(state.get(5).and_then(|m| m.side(Side::A)), Some(&winner));
  }

  #[test]
  fn test_advance_from_last_round_is_noop() {
    let mut state = bracket();
    assert_eq!(advance(&mut state, 7, &Entrant::Pairing(1)), None);
    assert_eq!(advance(&mut state, 42, &Entrant::Pairing(1)), None);
    assert!(!state.is_dirty());
  }
}
