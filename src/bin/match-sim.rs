//! Runs one complete three-phase match in memory: two scripted human seats
//! plus a synthetic opponent, with events and the final summary printed to
//! the log. Useful for eyeballing coordination timing without a real store.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkdash_sync::{
    JoinOptions, JoinParams, MatchEvent, MatchSession, MatchSetup, RosterEntry,
    model::{Phase, PhasePayload, SessionMode},
    scoring::FixedScorer,
    store::MemoryStore,
};

const PHASE_SECONDS: u32 = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let store = MemoryStore::new();
    let writer = MatchSession::join(
        Arc::new(store.clone()),
        join_params("morgan", true),
        options(),
    )
    .await
    .context("joining as morgan")?;
    let rival = MatchSession::join(
        Arc::new(store.clone()),
        join_params("riley", false),
        options(),
    )
    .await
    .context("joining as riley")?;

    let mut events = writer.events();
    writer.start_match().await.context("starting the match")?;
    info!(session_id = %writer.session_id(), "match started; following events");

    loop {
        match tokio::time::timeout(Duration::from_secs(60), events.recv()).await {
            Ok(Ok(MatchEvent::PhaseStarted { phase, .. })) => {
                info!(%phase, "phase open; both seats submit");
                writer
                    .submit(phase, sample_payload(phase))
                    .await
                    .context("submitting morgan's work")?;
                rival
                    .submit(phase, sample_payload(phase))
                    .await
                    .context("submitting riley's work")?;
            }
            Ok(Ok(MatchEvent::MatchCompleted)) => break,
            Ok(Ok(MatchEvent::SessionAbandoned { reason })) => {
                anyhow::bail!("match abandoned: {reason}")
            }
            Ok(Ok(MatchEvent::SessionGone { session_id })) => {
                anyhow::bail!("session `{session_id}` disappeared mid-match")
            }
            Ok(Ok(event)) => info!(?event, "match event"),
            Ok(Err(err)) => anyhow::bail!("event stream ended early: {err}"),
            Err(_) => anyhow::bail!("match made no progress for 60s"),
        }
    }

    let summary = writer.summary();
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("rendering the summary")?
    );

    rival.leave().await.context("leaving as riley")?;
    writer.leave().await.context("leaving as morgan")?;
    Ok(())
}

fn join_params(user_id: &str, leader: bool) -> JoinParams {
    JoinParams {
        session_id: "sim-session".into(),
        user_id: user_id.into(),
        display_name: user_id.to_uppercase(),
        leader,
        setup: MatchSetup {
            match_id: "sim-match".into(),
            mode: SessionMode::QuickMatch,
            trait_id: "organization".into(),
            prompt_id: "prompt-levee".into(),
            prompt_type: "narrative".into(),
            phase_duration_seconds: PHASE_SECONDS,
            roster: vec![
                RosterEntry {
                    user_id: "morgan".into(),
                    display_name: "Morgan".into(),
                    synthetic: false,
                },
                RosterEntry {
                    user_id: "riley".into(),
                    display_name: "Riley".into(),
                    synthetic: false,
                },
                RosterEntry {
                    user_id: "quill".into(),
                    display_name: "Quill".into(),
                    synthetic: true,
                },
            ],
        },
    }
}

fn options() -> JoinOptions {
    JoinOptions::new(Arc::new(FixedScorer { score: 82.0 }))
}

fn sample_payload(phase: Phase) -> PhasePayload {
    match phase {
        Phase::Draft => {
            let text = "The ferry horn sounded twice before anyone on the pier moved.".to_string();
            let word_count = text.split_whitespace().count() as u32;
            PhasePayload::Draft { text, word_count }
        }
        Phase::Review => PhasePayload::Feedback {
            strengths: "The double horn blast is a strong hook.".into(),
            suggestions: "Show who finally moves first and why.".into(),
        },
        Phase::Revise => PhasePayload::Revision {
            text: "The ferry horn sounded twice before anyone moved; it was the ticket \
                   clerk, of all people, who ran first."
                .into(),
        },
    }
}

/// Configure tracing subscribers so the simulation logs are readable.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
