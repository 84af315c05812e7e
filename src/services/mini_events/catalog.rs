//! Static catalog of mini-events.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::effects::{
    Effect, SabotageKind, ScoreTarget, StealAmount, StealSource, SwapMode,
};

/// Moment of the party at which an event may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventTiming {
    /// Before the first song of a round.
    PreRound,
    /// Between two songs of the same round.
    MidRound,
    /// After the last song of a round.
    PostRound,
    /// Once the queue is exhausted, before the finale.
    PreFinale,
}

/// One entry of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    /// Stable identifier, persisted with fired events.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// One-line description shown to players.
    pub description: &'static str,
    /// Moment of the party the event is checked at.
    pub timing: EventTiming,
    /// Probability of firing at normal frequency.
    pub base_probability: f64,
    /// What the event does when resolved.
    pub effect: Effect,
}

static CATALOG: &[EventDefinition] = &[
    EventDefinition {
        id: "double_down",
        name: "Double Down",
        description: "A random player's score is doubled.",
        timing: EventTiming::MidRound,
        base_probability: 0.10,
        effect: Effect::ScoreMultiplier {
            target: ScoreTarget::Random,
            multiplier: 2.0,
        },
    },
    EventDefinition {
        id: "underdog_boost",
        name: "Underdog Boost",
        description: "Last place gets a 1.5x boost.",
        timing: EventTiming::PreRound,
        base_probability: 0.15,
        effect: Effect::ScoreMultiplier {
            target: ScoreTarget::Loser,
            multiplier: 1.5,
        },
    },
    EventDefinition {
        id: "crown_tax",
        name: "Crown Tax",
        description: "The leader pays 10% of their score to last place.",
        timing: EventTiming::PostRound,
        base_probability: 0.12,
        effect: Effect::StealPoints {
            from: StealSource::Leader,
            amount: StealAmount::Percentage(10.0),
        },
    },
    EventDefinition {
        id: "pickpocket",
        name: "Pickpocket",
        description: "A random player loses 3 points to last place.",
        timing: EventTiming::MidRound,
        base_probability: 0.08,
        effect: Effect::StealPoints {
            from: StealSource::Random,
            amount: StealAmount::Fixed(3.0),
        },
    },
    EventDefinition {
        id: "great_swap",
        name: "The Great Swap",
        description: "First and last place trade scores.",
        timing: EventTiming::PostRound,
        base_probability: 0.05,
        effect: Effect::SwapScores {
            mode: SwapMode::TopBottom,
        },
    },
    EventDefinition {
        id: "neighbor_swap",
        name: "Neighbor Swap",
        description: "Two neighbours in the ranking trade scores.",
        timing: EventTiming::MidRound,
        base_probability: 0.07,
        effect: Effect::SwapScores {
            mode: SwapMode::Adjacent,
        },
    },
    EventDefinition {
        id: "chaos_swap",
        name: "Chaos Swap",
        description: "Two random players trade scores.",
        timing: EventTiming::PreFinale,
        base_probability: 0.10,
        effect: Effect::SwapScores {
            mode: SwapMode::RandomPair,
        },
    },
    EventDefinition {
        id: "double_or_nothing",
        name: "Double or Nothing",
        description: "Great songs double up, weak songs lose everything.",
        timing: EventTiming::MidRound,
        base_probability: 0.10,
        effect: Effect::DoubleOrNothing,
    },
    EventDefinition {
        id: "safety_net",
        name: "Safety Net",
        description: "Last place cannot lose points this round.",
        timing: EventTiming::PreRound,
        base_probability: 0.12,
        effect: Effect::Immunity,
    },
    EventDefinition {
        id: "open_ballots",
        name: "Open Ballots",
        description: "Three votes from this round are revealed.",
        timing: EventTiming::PostRound,
        base_probability: 0.15,
        effect: Effect::VoteReveal { count: 3 },
    },
    EventDefinition {
        id: "shuffle_shuffle",
        name: "Shuffle Shuffle",
        description: "The remaining queue is shuffled.",
        timing: EventTiming::PreRound,
        base_probability: 0.08,
        effect: Effect::Sabotage {
            kind: SabotageKind::ShuffleQueue,
        },
    },
    EventDefinition {
        id: "blackout",
        name: "Blackout",
        description: "Scores are hidden until the finale.",
        timing: EventTiming::PreRound,
        base_probability: 0.06,
        effect: Effect::Sabotage {
            kind: SabotageKind::HideScores,
        },
    },
    EventDefinition {
        id: "masked_voters",
        name: "Masked Voters",
        description: "Voter identities stay hidden.",
        timing: EventTiming::MidRound,
        base_probability: 0.08,
        effect: Effect::Sabotage {
            kind: SabotageKind::AnonymousVoting,
        },
    },
    EventDefinition {
        id: "everyone_wins",
        name: "Everyone Wins",
        description: "Every player gets a 10% boost before the finale.",
        timing: EventTiming::PreFinale,
        base_probability: 0.05,
        effect: Effect::ScoreMultiplier {
            target: ScoreTarget::All,
            multiplier: 1.1,
        },
    },
];

/// Every catalog entry, in trigger-check order.
pub fn all() -> &'static [EventDefinition] {
    CATALOG
}

/// Catalog entries with the given timing, in catalog order.
pub fn with_timing(timing: EventTiming) -> impl Iterator<Item = &'static EventDefinition> {
    CATALOG.iter().filter(move |event| event.timing == timing)
}

/// Look up a catalog entry by identifier.
pub fn find(id: &str) -> Option<&'static EventDefinition> {
    CATALOG.iter().find(|event| event.id == id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identifiers_are_unique() {
        let ids = all().iter().map(|event| event.id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn probabilities_stay_valid_under_chaos() {
        for event in all() {
            assert!(event.base_probability > 0.0);
            assert!(event.base_probability * 2.0 <= 1.0, "{}", event.id);
        }
    }

    #[test]
    fn every_timing_has_events() {
        for timing in [
            EventTiming::PreRound,
            EventTiming::MidRound,
            EventTiming::PostRound,
            EventTiming::PreFinale,
        ] {
            assert!(with_timing(timing).next().is_some(), "{timing:?}");
        }
        assert_eq!(find("crown_tax").map(|event| event.timing), Some(EventTiming::PostRound));
        assert!(find("missing").is_none());
    }
}
