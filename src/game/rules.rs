//! Figure conflict resolution for rock-paper-scissors-lizard-spock

use crate::ws::protocol::Figure;

impl Figure {
    /// Whether this figure is beaten by `other`.
    ///
    /// Each figure loses to exactly two others:
    /// paper → scissors, lizard; rock → paper, spock;
    /// scissors → rock, spock; lizard → scissors, rock;
    /// spock → paper, lizard.
    pub fn loses_to(self, other: Figure) -> bool {
        use Figure::*;
        matches!(
            (self, other),
            (Paper, Scissors)
                | (Paper, Lizard)
                | (Rock, Paper)
                | (Rock, Spock)
                | (Scissors, Rock)
                | (Scissors, Spock)
                | (Lizard, Scissors)
                | (Lizard, Rock)
                | (Spock, Paper)
                | (Spock, Lizard)
        )
    }
}

/// Returns true if `current` survives the round against `opponent`.
///
/// Note the asymmetry on ties: both sides survive when the figures match,
/// so `resolve(a, b)` is not the negation of `resolve(b, a)`.
pub fn resolve(current: Figure, opponent: Figure) -> bool {
    !current.loses_to(opponent)
}
