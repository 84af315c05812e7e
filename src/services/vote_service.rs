//! Playback loop: songs open for votes one at a time and close on the last vote or on timeout.

use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::{
        party::VoteReceipt,
        sse::{SongScoredEvent, SongStartedEvent, VoteProgressEvent},
    },
    error::ServiceError,
    services::{
        event_service, finale_service,
        mini_events::{catalog::EventTiming, effects::ResolveContext},
        party_service::{ensure_active, ensure_phase, load_handle},
        rounds, scoring,
        timers::{TimerKey, TimerRequest},
    },
    state::{
        PartyRuntime, SharedState,
        party::Vote,
        state_machine::{PartyEvent, PartyPhase},
        transitions::{Staged, commit},
    },
};

const MAX_COMMENT_LENGTH: usize = 280;

/// A rating cast on the song currently playing.
#[derive(Debug, Clone)]
pub struct NewVote {
    /// Song being rated; must be the one open for votes.
    pub song_id: Uuid,
    /// Rating between 1 and 10.
    pub rating: u8,
    /// Spend power-up points to weigh the vote 1.5x.
    pub super_vote: bool,
    /// Optional remark.
    pub comment: Option<String>,
}

/// Lock in a vote. The vote completing the song scores it and moves the party on.
pub async fn cast_vote(
    state: &SharedState,
    party_id: Uuid,
    voter_id: Uuid,
    vote: NewVote,
) -> Result<VoteReceipt, ServiceError> {
    if !(1..=10).contains(&vote.rating) {
        return Err(ServiceError::InvalidInput("rating must be between 1 and 10".into()));
    }
    if vote
        .comment
        .as_ref()
        .is_some_and(|comment| comment.chars().count() > MAX_COMMENT_LENGTH)
    {
        return Err(ServiceError::InvalidInput(format!(
            "comment must be at most {MAX_COMMENT_LENGTH} characters"
        )));
    }

    let handle = load_handle(state, party_id).await?;
    let mut runtime = handle.lock().await;

    commit(state, &mut runtime, |staged| {
        ensure_phase(staged.phase(), PartyPhase::Playing, "voting is not open")?;
        ensure_active(&staged.session, voter_id)?;

        let song = staged
            .session
            .songs
            .get(&vote.song_id)
            .ok_or_else(|| ServiceError::NotFound(format!("song `{}`", vote.song_id)))?;
        if song.submitter_id == voter_id {
            return Err(ServiceError::InvalidInput("cannot vote on your own song".into()));
        }
        if staged.session.has_voted(song.id, voter_id) {
            return Err(ServiceError::InvalidState("vote already cast for this song".into()));
        }
        if song.completed || staged.session.current_song_id != Some(song.id) {
            return Err(ServiceError::InvalidState("song is not open for votes".into()));
        }

        let cost = staged.config.super_vote_cost();
        let voter = staged
            .session
            .players
            .get_mut(&voter_id)
            .ok_or_else(|| ServiceError::Unauthorized("not a member of this party".into()))?;
        if vote.super_vote {
            if voter.power_up_points < cost {
                return Err(ServiceError::InvalidInput(format!(
                    "a super vote costs {cost} power-up points"
                )));
            }
            voter.power_up_points -= cost;
        }
        let power_up_points = voter.power_up_points;

        let song_id = vote.song_id;
        let vote_id = Uuid::new_v4();
        staged.session.votes.push(Vote {
            id: vote_id,
            song_id,
            voter_id,
            rating: vote.rating,
            is_locked: true,
            super_vote: vote.super_vote,
            comment: vote.comment.filter(|comment| !comment.trim().is_empty()),
            cast_at: staged.now,
        });

        let votes_in = staged.session.votes_for(song_id).count();
        let votes_expected = rounds::expected_voters(&staged.session, song_id).len();
        staged.notify_party(
            "vote.cast",
            &VoteProgressEvent {
                song_id,
                votes_in,
                votes_expected,
            },
        );
        debug!(song_id = %song_id, votes_in, votes_expected, "vote cast");

        let song_completed = rounds::all_votes_in(&staged.session, song_id);
        if song_completed {
            complete_song(staged, song_id, false)?;
        }

        Ok(VoteReceipt {
            vote_id,
            votes_in,
            votes_expected,
            song_completed,
            power_up_points,
        })
    })
    .await
}

/// Close a song whose timeout elapsed, unless it already closed.
pub(crate) async fn force_complete_song(
    state: &SharedState,
    runtime: &mut PartyRuntime,
    song_id: Uuid,
) -> Result<(), ServiceError> {
    let open = runtime.machine.phase() == PartyPhase::Playing
        && runtime.session.current_song_id == Some(song_id)
        && runtime
            .session
            .songs
            .get(&song_id)
            .is_some_and(|song| !song.completed);
    if !open {
        debug!(party_id = %runtime.session.id, song_id = %song_id, "song already closed; timeout ignored");
        return Ok(());
    }

    info!(party_id = %runtime.session.id, song_id = %song_id, "song timed out");
    commit(state, runtime, |staged| complete_song(staged, song_id, true)).await
}

/// Enter playback: fix the queue, run the opening event check and start the first song.
pub(crate) fn enter_playing(staged: &mut Staged<'_>) -> Result<(), ServiceError> {
    staged.transition(PartyEvent::SubmissionsComplete)?;
    rounds::assign_queue_positions(&mut staged.session);

    if let Some(first) = rounds::next_song(&staged.session) {
        let round_number = staged.session.songs[&first].round_number;
        event_service::run_event_check(
            staged,
            EventTiming::PreRound,
            ResolveContext {
                round_number,
                song_id: None,
            },
        );
    }

    match rounds::next_song(&staged.session) {
        Some(song_id) => start_song(staged, song_id),
        None => Ok(()),
    }
}

/// Open `song_id` for votes and arm its timeout.
pub(crate) fn start_song(staged: &mut Staged<'_>, song_id: Uuid) -> Result<(), ServiceError> {
    let grace = staged.config.vote_grace();
    let play_duration = staged.session.settings.play_duration_seconds;
    let song = staged
        .session
        .songs
        .get_mut(&song_id)
        .ok_or_else(|| ServiceError::NotFound(format!("song `{song_id}`")))?;
    song.started_at = Some(staged.now);

    let event = SongStartedEvent {
        song_id,
        title: song.title.clone(),
        artist: song.artist.clone(),
        track_ref: song.track_ref.clone(),
        round_number: song.round_number,
        queue_position: song.queue_position,
        play_duration_seconds: play_duration,
    };
    staged.session.current_song_id = Some(song_id);
    staged.schedule(TimerRequest::song_timeout(
        song_id,
        Duration::from_secs(u64::from(play_duration)) + grace,
    ));
    staged.notify_party("song.started", &event);
    Ok(())
}

/// Score a song and move the party on. The completed flag makes this run at most once per song.
pub(crate) fn complete_song(
    staged: &mut Staged<'_>,
    song_id: Uuid,
    timed_out: bool,
) -> Result<(), ServiceError> {
    let song = staged
        .session
        .songs
        .get(&song_id)
        .ok_or_else(|| ServiceError::NotFound(format!("song `{song_id}`")))?;
    if song.completed {
        return Ok(());
    }

    let (score, distribution) = scoring::score_song(&staged.session, song);
    let round = song.round_number;
    if let Some(song) = staged.session.songs.get_mut(&song_id) {
        song.score = Some(score);
        song.vote_distribution = distribution;
        song.completed = true;
    }
    if staged.session.current_song_id == Some(song_id) {
        staged.session.current_song_id = None;
    }
    staged.cancel(TimerKey::SongTimeout(song_id));

    let hidden = staged.session.flags.hide_scores;
    staged.notify_party(
        "song.scored",
        &SongScoredEvent {
            song_id,
            round_number: round,
            timed_out,
            score: (!hidden).then(|| score.into()),
            vote_distribution: (!hidden).then(|| distribution.to_vec()),
        },
    );
    info!(song_id = %song_id, final_score = score.final_score, timed_out, "song scored");

    if rounds::is_round_complete(&staged.session, round) {
        event_service::run_event_check(
            staged,
            EventTiming::PostRound,
            ResolveContext {
                round_number: round,
                song_id: None,
            },
        );

        if let Some(next) = rounds::next_song(&staged.session) {
            let round_number = staged.session.songs[&next].round_number;
            event_service::run_event_check(
                staged,
                EventTiming::PreRound,
                ResolveContext {
                    round_number,
                    song_id: None,
                },
            );
        }
    } else {
        event_service::run_event_check(
            staged,
            EventTiming::MidRound,
            ResolveContext {
                round_number: round,
                song_id: Some(song_id),
            },
        );
    }

    match rounds::next_song(&staged.session) {
        Some(next) => start_song(staged, next),
        None => {
            event_service::run_event_check(
                staged,
                EventTiming::PreFinale,
                ResolveContext {
                    round_number: round,
                    song_id: None,
                },
            );
            finale_service::enter_finale(staged)
        }
    }
}
