//! Anonymous identity assignment.

use rand::Rng;
use thiserror::Error;

use crate::{
    config::AppConfig,
    state::party::{AnonymousIdentity, PartySession},
};

/// Raised when a pool cannot cover every player of a party.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identity pool `{pool}` has {available} entries for {required} players")]
pub struct PoolExhausted {
    /// Name of the exhausted pool.
    pub pool: &'static str,
    /// Entries in the pool.
    pub available: usize,
    /// Players needing an entry.
    pub required: usize,
}

/// Give every active player an alias, silhouette and color, each unique within the party.
pub fn assign_identities<R>(
    session: &mut PartySession,
    config: &AppConfig,
    rng: &mut R,
) -> Result<(), PoolExhausted>
where
    R: Rng + ?Sized,
{
    let required = session.active_players().count();
    let aliases = draw("aliases", config.aliases().len(), required, rng)?;
    let silhouettes = draw("silhouettes", config.silhouettes().len(), required, rng)?;
    let colors = draw("colors", config.colors().len(), required, rng)?;

    let players = session
        .players
        .values_mut()
        .filter(|player| player.is_active());
    for (index, player) in players.enumerate() {
        player.identity = Some(AnonymousIdentity {
            alias: config.aliases()[aliases[index]].clone(),
            silhouette: config.silhouettes()[silhouettes[index]].clone(),
            color: config.colors()[colors[index]].clone(),
        });
    }

    Ok(())
}

fn draw<R>(
    pool: &'static str,
    available: usize,
    required: usize,
    rng: &mut R,
) -> Result<Vec<usize>, PoolExhausted>
where
    R: Rng + ?Sized,
{
    if available < required {
        return Err(PoolExhausted {
            pool,
            available,
            required,
        });
    }
    Ok(rand::seq::index::sample(rng, available, required).into_vec())
}
