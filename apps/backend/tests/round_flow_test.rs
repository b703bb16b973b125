//! End-to-end round flow through the game-flow service.
//!
//! Drives sessions the way the realtime layer does (connection ids in,
//! state and result documents out), with a scripted completion backend
//! and zero pacing delays.

mod support;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use backend::config::ExperimentConfig;
use backend::domain::{
    ChatFrequency, ConfigOverrides, Decision, GameMode, GameStatus, PaidWhen, SlotId,
};
use backend::errors::GameError;
use backend::services::game_flow::GameFlowService;
use backend::services::storage::{MemoryResultSink, PlayerKind};
use support::{make_flow, wait_until, Scripted, ScriptedBackend};

#[ctor::ctor]
fn init_logging() {
    backend::test_bootstrap::logging::init();
}

fn one_round() -> Option<ConfigOverrides> {
    Some(ConfigOverrides {
        total_rounds: Some(1),
        decision_timeout_ms: None,
    })
}

/// Seat two humans in a fresh room and start the game.
async fn start_two_humans(
    flow: &Arc<GameFlowService>,
    mode: GameMode,
    overrides: Option<ConfigOverrides>,
) -> (Uuid, Uuid, Uuid) {
    let conn_one = Uuid::new_v4();
    let conn_two = Uuid::new_v4();
    let code = flow.create_room(conn_one, Some(mode));
    flow.join_room(conn_one, &code, "Ana").unwrap();
    flow.join_room(conn_two, &code, "Ben").unwrap();
    let session_id = flow
        .clone()
        .start_game(conn_one, &code, overrides)
        .await
        .unwrap();
    (session_id, conn_one, conn_two)
}

async fn wait_for_decision_phase(flow: &Arc<GameFlowService>, session_id: Uuid, round: u32) {
    wait_until("decision phase open", || {
        let flow = flow.clone();
        async move {
            match flow.registry().get(session_id) {
                Ok(handle) => {
                    let session = handle.lock().await;
                    session.current_round.round_number == round
                        && matches!(
                            session.status,
                            GameStatus::RoundDecision | GameStatus::RoundRevealing
                        )
                }
                Err(_) => false,
            }
        }
    })
    .await;
}

async fn wait_for_document(sink: &Arc<MemoryResultSink>) {
    wait_until("result document persisted", || {
        let sink = sink.clone();
        async move { !sink.documents().is_empty() }
    })
    .await;
}

#[tokio::test]
async fn simultaneous_round_resolves_and_persists() {
    let (flow, sink) = make_flow(
        ExperimentConfig::default(),
        Arc::new(ScriptedBackend::new(Vec::new())),
    );
    let (session_id, conn_one, conn_two) =
        start_two_humans(&flow, GameMode::Simultaneous, one_round()).await;

    wait_for_decision_phase(&flow, session_id, 1).await;
    flow.clone()
        .submit_decision(conn_one, session_id, Decision::Keep)
        .await
        .unwrap();
    flow.clone()
        .submit_decision(conn_two, session_id, Decision::Withdraw)
        .await
        .unwrap();

    wait_for_document(&sink).await;
    let doc = sink.documents().remove(0);

    // Automaton and patient-2 are the only withdrawers: both are paid
    // out, patient-1's keep falls through to failure.
    assert_eq!(doc.rounds.len(), 1);
    let round = &doc.rounds[0];
    assert_eq!(round.payoffs[SlotId::PatientOne], 20);
    assert_eq!(round.payoffs[SlotId::PatientTwo], 50);
    assert_eq!(round.payoffs[SlotId::Automaton], 50);
    assert!(round.bank_run);
    assert_eq!(round.decisions[SlotId::Automaton], Decision::Withdraw);
    assert_eq!(doc.player_types, [PlayerKind::Human, PlayerKind::Human]);
    assert!(doc.ended_at.is_some());
    for slot in SlotId::ALL {
        assert_eq!(doc.total_payoffs[slot], round.payoffs[slot]);
    }
}

#[tokio::test]
async fn sequential_round_pays_withdrawers_immediately() {
    let (flow, sink) = make_flow(
        ExperimentConfig::default(),
        Arc::new(ScriptedBackend::new(Vec::new())),
    );
    let (session_id, _conn_one, _conn_two) =
        start_two_humans(&flow, GameMode::Sequential, one_round()).await;

    // Act whenever the walk reaches a patient: patient-1 keeps,
    // patient-2 withdraws, whatever the drawn order.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.documents().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "sequential game did not finish"
        );
        if let Ok(handle) = flow.registry().get(session_id) {
            let next = {
                let session = handle.lock().await;
                if matches!(
                    session.status,
                    GameStatus::RoundDecision | GameStatus::RoundRevealing
                ) {
                    session
                        .next_undecided_slot()
                        .and_then(|slot| session.conn_of_slot(slot).map(|conn| (slot, conn)))
                } else {
                    None
                }
            };
            if let Some((slot, conn)) = next {
                let decision = if slot == SlotId::PatientOne {
                    Decision::Keep
                } else {
                    Decision::Withdraw
                };
                flow.clone()
                    .submit_decision(conn, session_id, decision)
                    .await
                    .unwrap();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let doc = sink.documents().remove(0);
    let round = &doc.rounds[0];
    assert_eq!(round.payoffs[SlotId::PatientOne], 20);
    assert_eq!(round.payoffs[SlotId::PatientTwo], 50);
    assert_eq!(round.payoffs[SlotId::Automaton], 50);
    assert!(round.bank_run);

    // Withdrawers were paid as they acted; patient-1's keep stayed
    // deferred until the cooperation check failed.
    let paid_when = round.paid_when.expect("sequential rounds carry timing");
    assert_eq!(paid_when[SlotId::PatientOne], PaidWhen::Deferred);
    assert_eq!(paid_when[SlotId::PatientTwo], PaidWhen::Immediate);
    assert_eq!(paid_when[SlotId::Automaton], PaidWhen::Immediate);
    assert!(round.seq_trace.as_deref().unwrap_or("").contains("WITHDRAW"));
}

#[tokio::test]
async fn decision_timeout_auto_keeps_silent_patients() {
    let defaults = ExperimentConfig {
        decision_timeout_ms: 150,
        ..ExperimentConfig::default()
    };
    let (flow, sink) = make_flow(defaults, Arc::new(ScriptedBackend::new(Vec::new())));
    let (session_id, _conn_one, _conn_two) =
        start_two_humans(&flow, GameMode::Simultaneous, one_round()).await;

    wait_for_decision_phase(&flow, session_id, 1).await;
    // Nobody submits anything; the countdown fires the fallback.
    wait_for_document(&sink).await;

    let doc = sink.documents().remove(0);
    let round = &doc.rounds[0];
    assert_eq!(round.decisions[SlotId::PatientOne], Decision::Keep);
    assert_eq!(round.decisions[SlotId::PatientTwo], Decision::Keep);
    assert_eq!(round.payoffs[SlotId::PatientOne], 70);
    assert_eq!(round.payoffs[SlotId::PatientTwo], 70);
    assert_eq!(round.payoffs[SlotId::Automaton], 50);
    assert!(!round.bank_run);
    // Auto-assigned decisions never carry a timing offset.
    assert_eq!(round.decision_offsets_ms[SlotId::PatientOne], None);
    assert_eq!(round.decision_offsets_ms[SlotId::PatientTwo], None);
    assert_eq!(round.decision_offsets_ms[SlotId::Automaton], Some(0));
}

#[tokio::test]
async fn stale_timeout_for_a_finished_round_is_discarded() {
    let (flow, sink) = make_flow(
        ExperimentConfig::default(),
        Arc::new(ScriptedBackend::new(Vec::new())),
    );
    let overrides = Some(ConfigOverrides {
        total_rounds: Some(2),
        decision_timeout_ms: None,
    });
    let (session_id, conn_one, conn_two) =
        start_two_humans(&flow, GameMode::Simultaneous, overrides).await;

    wait_for_decision_phase(&flow, session_id, 1).await;
    flow.clone()
        .submit_decision(conn_one, session_id, Decision::Keep)
        .await
        .unwrap();
    flow.clone()
        .submit_decision(conn_two, session_id, Decision::Keep)
        .await
        .unwrap();

    wait_for_decision_phase(&flow, session_id, 2).await;

    // A countdown armed for round 1 fires late: it must not touch round 2.
    flow.clone()
        .handle_decision_timeout(session_id, 1)
        .await
        .unwrap();
    {
        let handle = flow.registry().get(session_id).unwrap();
        let session = handle.lock().await;
        assert_eq!(session.current_round.round_number, 2);
        assert_eq!(session.status, GameStatus::RoundDecision);
        assert_eq!(session.current_round.decisions[SlotId::PatientOne], None);
        assert_eq!(session.current_round.decisions[SlotId::PatientTwo], None);
    }

    // The round-2 timeout is current and completes the game.
    flow.clone()
        .handle_decision_timeout(session_id, 2)
        .await
        .unwrap();
    wait_for_document(&sink).await;
    let doc = sink.documents().remove(0);
    assert_eq!(doc.rounds.len(), 2);
    assert_eq!(doc.rounds[1].decisions[SlotId::PatientOne], Decision::Keep);
}

#[tokio::test]
async fn rejected_submissions_leave_state_untouched() {
    let (flow, _sink) = make_flow(
        ExperimentConfig::default(),
        Arc::new(ScriptedBackend::new(Vec::new())),
    );
    let (session_id, conn_one, _conn_two) =
        start_two_humans(&flow, GameMode::Simultaneous, None).await;

    wait_for_decision_phase(&flow, session_id, 1).await;

    // Unknown session.
    let err = flow
        .clone()
        .submit_decision(conn_one, Uuid::new_v4(), Decision::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::SessionNotFound(_)));

    // Connection that owns no slot.
    let err = flow
        .clone()
        .submit_decision(Uuid::new_v4(), session_id, Decision::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::Unauthorized(_)));

    // Duplicate submission for an already-decided slot.
    flow.clone()
        .submit_decision(conn_one, session_id, Decision::Keep)
        .await
        .unwrap();
    let err = flow
        .clone()
        .submit_decision(conn_one, session_id, Decision::Withdraw)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::InvalidTransition(_)));

    let handle = flow.registry().get(session_id).unwrap();
    let session = handle.lock().await;
    assert_eq!(
        session.current_round.decisions[SlotId::PatientOne],
        Some(Decision::Keep)
    );
    assert_eq!(session.current_round.decisions[SlotId::PatientTwo], None);
}

#[tokio::test]
async fn sequential_out_of_turn_submission_is_rejected() {
    let (flow, _sink) = make_flow(
        ExperimentConfig::default(),
        Arc::new(ScriptedBackend::new(Vec::new())),
    );
    let (session_id, _conn_one, _conn_two) =
        start_two_humans(&flow, GameMode::Sequential, None).await;

    wait_for_decision_phase(&flow, session_id, 1).await;

    let (next, other_conn) = {
        let handle = flow.registry().get(session_id).unwrap();
        let session = handle.lock().await;
        let next = session.next_undecided_slot().expect("a patient is up");
        let other = SlotId::PATIENTS
            .into_iter()
            .find(|&slot| slot != next)
            .expect("two patients");
        (next, session.conn_of_slot(other).unwrap())
    };

    let err = flow
        .clone()
        .submit_decision(other_conn, session_id, Decision::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::NotYourTurn(_)));

    let handle = flow.registry().get(session_id).unwrap();
    let session = handle.lock().await;
    assert_eq!(session.next_undecided_slot(), Some(next));
}

#[tokio::test]
async fn vs_ai_game_records_agent_metadata() {
    let backend = Arc::new(ScriptedBackend::always("KEEP"));
    let (flow, sink) = make_flow(ExperimentConfig::default(), backend.clone());

    let conn = Uuid::new_v4();
    let code = flow.create_room(conn, Some(GameMode::Simultaneous));
    flow.join_room(conn, &code, "Ana").unwrap();
    let session_id = flow
        .clone()
        .start_game(conn, &code, one_round())
        .await
        .unwrap();

    wait_for_decision_phase(&flow, session_id, 1).await;
    flow.clone()
        .submit_decision(conn, session_id, Decision::Keep)
        .await
        .unwrap();

    wait_for_document(&sink).await;
    let doc = sink.documents().remove(0);
    let round = &doc.rounds[0];

    // Both patients kept: cooperation pays out, the automaton is paid
    // as a withdrawer.
    assert_eq!(round.payoffs[SlotId::PatientOne], 70);
    assert_eq!(round.payoffs[SlotId::PatientTwo], 70);
    assert_eq!(round.payoffs[SlotId::Automaton], 50);
    assert!(!round.bank_run);

    assert_eq!(doc.player_types, [PlayerKind::Human, PlayerKind::Agent]);
    assert_eq!(doc.session_metadata.model.as_deref(), Some("scripted-model"));
    assert!(doc.session_metadata.player_profiles.patient_two.is_some());
    assert!(doc
        .session_metadata
        .agent_responses
        .iter()
        .any(|response| response.contains("KEEP")));
    assert!(backend.calls() >= 1);
}

#[tokio::test]
async fn chat_transcript_lands_in_round_results() {
    let defaults = ExperimentConfig {
        chat_enabled: true,
        chat_duration_secs: 1,
        chat_frequency: ChatFrequency::EveryRound,
        ..ExperimentConfig::default()
    };
    let (flow, sink) = make_flow(defaults, Arc::new(ScriptedBackend::new(Vec::new())));
    let (session_id, conn_one, conn_two) =
        start_two_humans(&flow, GameMode::Simultaneous, one_round()).await;

    wait_until("chat phase open", || {
        let flow = flow.clone();
        async move {
            match flow.registry().get(session_id) {
                Ok(handle) => handle.lock().await.status == GameStatus::RoundChat,
                Err(_) => false,
            }
        }
    })
    .await;

    flow.clone()
        .submit_chat(conn_one, session_id, "shall we both keep?")
        .await
        .unwrap();

    // Over-long messages are rejected before they reach the transcript.
    let oversized = "x".repeat(501);
    let err = flow
        .clone()
        .submit_chat(conn_two, session_id, &oversized)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::Validation(_)));

    wait_for_decision_phase(&flow, session_id, 1).await;

    // Chat is closed once decisions open.
    let err = flow
        .clone()
        .submit_chat(conn_two, session_id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::InvalidTransition(_)));

    flow.clone()
        .submit_decision(conn_one, session_id, Decision::Keep)
        .await
        .unwrap();
    flow.clone()
        .submit_decision(conn_two, session_id, Decision::Keep)
        .await
        .unwrap();

    wait_for_document(&sink).await;
    let doc = sink.documents().remove(0);
    assert!(doc.chat_enabled);
    let transcript = doc.rounds[0]
        .chat_messages
        .as_ref()
        .expect("transcript attached");
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].slot, SlotId::PatientOne);
    assert_eq!(transcript[0].text, "shall we both keep?");
}

#[tokio::test]
async fn agent_transport_failures_default_to_withdraw() {
    // Every completion call fails; the agent's fallback still lets the
    // round finalize.
    let backend = Arc::new(ScriptedBackend::new(vec![
        Scripted::Transport,
        Scripted::Transport,
        Scripted::Transport,
    ]));
    let (flow, sink) = make_flow(ExperimentConfig::default(), backend.clone());

    let conn = Uuid::new_v4();
    let code = flow.create_room(conn, Some(GameMode::Simultaneous));
    flow.join_room(conn, &code, "Ana").unwrap();
    let session_id = flow
        .clone()
        .start_game(conn, &code, one_round())
        .await
        .unwrap();

    wait_for_decision_phase(&flow, session_id, 1).await;
    flow.clone()
        .submit_decision(conn, session_id, Decision::Keep)
        .await
        .unwrap();

    wait_for_document(&sink).await;
    let doc = sink.documents().remove(0);
    let round = &doc.rounds[0];
    assert_eq!(round.decisions[SlotId::PatientTwo], Decision::Withdraw);
    assert!(round.bank_run);
    assert_eq!(backend.calls(), 3);
}
