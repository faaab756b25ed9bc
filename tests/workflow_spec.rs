use rocket_phasegate::db::Database;
use rocket_phasegate::models::*;
use rocket_phasegate::EngineError;
use serde_json::json;
use speculate2::speculate;

fn create_feature(db: &Database, id: &str) -> Feature {
    db.create_feature(CreateFeatureInput {
        id: id.to_string(),
        name: format!("Feature {}", id),
        complexity_level: 2,
        severity: FeatureSeverity::Routine,
        author: "alice".to_string(),
        branch_name: None,
        base_branch: None,
    })
    .expect("Failed to create feature")
}

fn move_to(db: &Database, id: &str, phase: u8) -> PhaseTransition {
    db.transition(
        id,
        TransitionInput {
            to_phase: phase,
            actor: "orchestrator".to_string(),
            note: None,
        },
    )
    .expect("Transition failed")
}

fn advance_to(db: &Database, id: &str, phase: u8) {
    let current = db.get_feature(id).expect("Feature missing").current_phase.value();
    for next in current + 1..=phase {
        move_to(db, id, next);
    }
}

fn run_agent(db: &Database, id: &str, phase: u8, agent: &str) -> AgentInvocation {
    let started = db
        .start_invocation(
            id,
            StartInvocationInput {
                phase,
                agent_name: agent.to_string(),
                operation: "work".to_string(),
                skills: vec![],
            },
        )
        .expect("Failed to start invocation");
    db.end_invocation(started.id).expect("Failed to end invocation")
}

/// Walk phases 1-7 with the expected agent closing an invocation in each.
fn deliver_with_full_coverage(db: &Database, id: &str) {
    for phase in Phase::TRACKED {
        advance_to(db, id, phase.value());
        run_agent(db, id, phase.value(), phase.expected_agent().unwrap());
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "features" {
        it "starts in planning and in progress" {
            let feature = create_feature(&db, "FEAT-1");
            assert_eq!(feature.current_phase, Phase::PLANNING);
            assert_eq!(feature.status, FeatureStatus::InProgress);
            assert!(feature.completed_at.is_none());
        }

        it "rejects a duplicate id" {
            create_feature(&db, "FEAT-1");
            let err = db.create_feature(CreateFeatureInput {
                id: "FEAT-1".into(),
                name: "Again".into(),
                complexity_level: 1,
                severity: FeatureSeverity::Routine,
                author: "bob".into(),
                branch_name: None,
                base_branch: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Conflict(_)));
        }

        it "rejects complexity outside 1-3" {
            let err = db.create_feature(CreateFeatureInput {
                id: "FEAT-9".into(),
                name: "Huge".into(),
                complexity_level: 4,
                severity: FeatureSeverity::Critical,
                author: "bob".into(),
                branch_name: None,
                base_branch: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }

        it "filters by status" {
            create_feature(&db, "FEAT-1");
            create_feature(&db, "FEAT-2");
            db.cancel("FEAT-2", "alice", Some("dropped")).unwrap();

            let active = db.list_features(Some(FeatureStatus::InProgress)).unwrap();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].id, "FEAT-1");
            assert_eq!(db.list_features(None).unwrap().len(), 2);
        }

        it "reports unknown features as not found" {
            let err = db.get_feature("nope").unwrap_err();
            assert!(matches!(err, EngineError::NotFound { entity: "feature", .. }));
        }
    }

    describe "phase transitions" {
        it "moves forward one phase at a time" {
            create_feature(&db, "FEAT-1");
            let t = move_to(&db, "FEAT-1", 1);
            assert_eq!(t.kind, TransitionKind::Forward);
            assert_eq!(t.from_phase, Phase::PLANNING);
            assert_eq!(db.get_feature("FEAT-1").unwrap().current_phase, Phase::DISCOVERY);
        }

        it "refuses a forward skip and leaves the phase unchanged" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 2);
            let err = db.transition("FEAT-1", TransitionInput {
                to_phase: 4,
                actor: "orchestrator".into(),
                note: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
            assert_eq!(db.get_feature("FEAT-1").unwrap().current_phase, Phase::ARCHITECTURE);
            assert_eq!(db.list_transitions("FEAT-1").unwrap().len(), 2);
        }

        it "allows backward moves to any earlier phase" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 5);
            let t = move_to(&db, "FEAT-1", 2);
            assert_eq!(t.kind, TransitionKind::Backward);
            assert_eq!(db.get_feature("FEAT-1").unwrap().current_phase, Phase::ARCHITECTURE);
        }

        it "never reaches phase 8 through a plain transition" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 7);
            let err = db.transition("FEAT-1", TransitionInput {
                to_phase: 8,
                actor: "orchestrator".into(),
                note: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
        }

        it "rejects phases outside 0-8" {
            create_feature(&db, "FEAT-1");
            let err = db.transition("FEAT-1", TransitionInput {
                to_phase: 12,
                actor: "orchestrator".into(),
                note: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }

        it "keeps transitions in order" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 3);
            move_to(&db, "FEAT-1", 1);
            let phases: Vec<u8> = db.list_transitions("FEAT-1").unwrap()
                .iter()
                .map(|t| t.to_phase.value())
                .collect();
            assert_eq!(phases, vec![1, 2, 3, 1]);
        }

        it "lets exactly one of several concurrent moves win" {
            create_feature(&db, "FEAT-1");
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let db = db.clone();
                    std::thread::spawn(move || {
                        db.transition("FEAT-1", TransitionInput {
                            to_phase: 1,
                            actor: format!("agent-{}", i),
                            note: None,
                        })
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, EngineError::State(_))));
            assert_eq!(db.list_transitions("FEAT-1").unwrap().len(), 1);
        }
    }

    describe "escalation" {
        it "blocks the feature until resumed" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 3);
            let t = db.escalate("FEAT-1", "guardian", Some("needs a decision".into())).unwrap();
            assert_eq!(t.kind, TransitionKind::Escalation);
            assert_eq!(t.from_phase, t.to_phase);
            assert_eq!(db.get_feature("FEAT-1").unwrap().status, FeatureStatus::Blocked);

            let err = db.transition("FEAT-1", TransitionInput {
                to_phase: 4,
                actor: "orchestrator".into(),
                note: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));

            let resumed = db.resume("FEAT-1", "lead", None).unwrap();
            assert_eq!(resumed.status, FeatureStatus::InProgress);
            move_to(&db, "FEAT-1", 4);
        }

        it "only resumes blocked features" {
            create_feature(&db, "FEAT-1");
            let err = db.resume("FEAT-1", "lead", None).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
        }

        it "refuses transitions after cancellation" {
            create_feature(&db, "FEAT-1");
            let cancelled = db.cancel("FEAT-1", "lead", None).unwrap();
            assert_eq!(cancelled.status, FeatureStatus::Cancelled);
            assert!(cancelled.completed_at.is_some());
            assert!(db.transition("FEAT-1", TransitionInput {
                to_phase: 1,
                actor: "orchestrator".into(),
                note: None,
            }).is_err());
            assert!(matches!(db.cancel("FEAT-1", "lead", None), Err(EngineError::State(_))));
        }
    }

    describe "quality gates and blockers" {
        it "keeps every gate record and reports the latest per gate" {
            create_feature(&db, "FEAT-1");
            for status in [GateStatus::Rejected, GateStatus::Approved] {
                db.record_gate("FEAT-1", RecordGateInput {
                    gate_name: "spec_review".into(),
                    phase: 3,
                    status,
                    approver: Some("guardian".into()),
                    note: None,
                }).unwrap();
            }

            assert_eq!(db.list_gates("FEAT-1").unwrap().len(), 2);
            let latest = db.latest_gates("FEAT-1").unwrap();
            assert_eq!(latest.len(), 1);
            assert_eq!(latest[0].status, GateStatus::Approved);
        }

        it "walks a blocker to resolved" {
            create_feature(&db, "FEAT-1");
            let blocker = db.open_blocker("FEAT-1", OpenBlockerInput {
                blocker_type: BlockerType::TestFailure,
                phase: 4,
                severity: BlockerSeverity::Medium,
                title: "Flaky suite".into(),
                description: None,
                created_by: "builder".into(),
            }).unwrap();
            assert_eq!(blocker.status, BlockerStatus::Open);

            let started = db.start_blocker(blocker.id, "builder").unwrap();
            assert_eq!(started.status, BlockerStatus::InProgress);

            let resolved = db.resolve_blocker(blocker.id, ResolveBlockerInput {
                resolved_by: "builder".into(),
                notes: Some("pinned the seed".into()),
            }).unwrap();
            assert_eq!(resolved.status, BlockerStatus::Resolved);
            assert!(resolved.resolved_at.is_some());
            assert!(db.list_blockers("FEAT-1", true).unwrap().is_empty());
        }

        it "never reopens a resolved blocker" {
            create_feature(&db, "FEAT-1");
            let blocker = db.open_blocker("FEAT-1", OpenBlockerInput {
                blocker_type: BlockerType::Other,
                phase: 1,
                severity: BlockerSeverity::Low,
                title: "Question".into(),
                description: None,
                created_by: "discovery".into(),
            }).unwrap();
            db.resolve_blocker(blocker.id, ResolveBlockerInput {
                resolved_by: "lead".into(),
                notes: None,
            }).unwrap();

            assert!(matches!(
                db.resolve_blocker(blocker.id, ResolveBlockerInput { resolved_by: "lead".into(), notes: None }),
                Err(EngineError::State(_))
            ));
            assert!(matches!(
                db.escalate_blocker(blocker.id, EscalateBlockerInput { notes: None }),
                Err(EngineError::State(_))
            ));
            assert!(matches!(db.start_blocker(blocker.id, "lead"), Err(EngineError::State(_))));
        }
    }

    describe "invocation telemetry" {
        it "derives the duration when an invocation ends" {
            create_feature(&db, "FEAT-1");
            let invocation = run_agent(&db, "FEAT-1", 1, "discovery");
            assert!(invocation.is_closed());
            assert!(invocation.duration_ms.unwrap() >= 0);
            assert!(invocation.ended_at.unwrap() >= invocation.started_at);
        }

        it "refuses to end an invocation twice" {
            create_feature(&db, "FEAT-1");
            let invocation = run_agent(&db, "FEAT-1", 1, "discovery");
            assert!(matches!(db.end_invocation(invocation.id), Err(EngineError::Conflict(_))));
        }

        it "does not count open invocations toward coverage" {
            create_feature(&db, "FEAT-1");
            db.start_invocation("FEAT-1", StartInvocationInput {
                phase: 1,
                agent_name: "discovery".into(),
                operation: "explore".into(),
                skills: vec![],
            }).unwrap();
            let report = db.check_coverage("FEAT-1").unwrap();
            assert_eq!(report.missing.len(), 7);
            assert!(!report.passed);
        }

        it "matches agent names case-insensitively" {
            create_feature(&db, "FEAT-1");
            run_agent(&db, "FEAT-1", 2, "Architect");
            let report = db.check_coverage("FEAT-1").unwrap();
            assert_eq!(report.covered.len(), 1);
            assert_eq!(report.covered[0].agent, "architect");
        }
    }

    describe "completion" {
        it "completes a fully covered feature" {
            create_feature(&db, "FEAT-1");
            deliver_with_full_coverage(&db, "FEAT-1");

            let feature = db.complete("FEAT-1", "release").unwrap();
            assert_eq!(feature.current_phase, Phase::COMPLETE);
            assert_eq!(feature.status, FeatureStatus::Completed);
            assert!(feature.completed_at.is_some());

            let last = db.list_transitions("FEAT-1").unwrap().pop().unwrap();
            assert_eq!(last.from_phase, Phase::RELEASE);
            assert_eq!(last.to_phase, Phase::COMPLETE);
        }

        it "refuses completion with missing coverage and opens a blocker" {
            create_feature(&db, "FEAT-1");
            for phase in Phase::TRACKED {
                advance_to(&db, "FEAT-1", phase.value());
                if phase != Phase::REVIEW && phase != Phase::DOCUMENTATION {
                    run_agent(&db, "FEAT-1", phase.value(), phase.expected_agent().unwrap());
                }
            }

            let err = db.complete("FEAT-1", "release").unwrap_err();
            let (missing, blocker_id) = match err {
                EngineError::GateFailure { gate, missing, blocker_id } => {
                    assert_eq!(gate, "invocation_coverage");
                    (missing, blocker_id)
                }
                other => panic!("expected gate failure, got {:?}", other),
            };
            let agents: Vec<&str> = missing.iter().map(|m| m.agent.as_str()).collect();
            assert_eq!(agents, vec!["guardian", "documenter"]);

            let blocker = db.get_blocker(blocker_id).unwrap();
            assert_eq!(blocker.blocker_type, BlockerType::ValidationFailed);
            assert_eq!(blocker.status, BlockerStatus::Open);
            assert!(blocker.description.unwrap().contains("phase 3/guardian"));

            let feature = db.get_feature("FEAT-1").unwrap();
            assert_eq!(feature.current_phase, Phase::RELEASE);
            assert_eq!(feature.status, FeatureStatus::InProgress);
        }

        it "requires phase 7" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 4);
            assert!(matches!(db.complete("FEAT-1", "release"), Err(EngineError::State(_))));
            assert!(db.list_blockers("FEAT-1", true).unwrap().is_empty());
        }

        it "gates the pull request on the same coverage" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 7);
            let err = db.record_pull_request("FEAT-1", "#42", "release").unwrap_err();
            assert!(matches!(err, EngineError::GateFailure { .. }));
            assert!(db.get_feature("FEAT-1").unwrap().pr_reference.is_none());
            assert_eq!(db.list_blockers("FEAT-1", true).unwrap().len(), 1);
        }

        it "records the pull request and merge once covered" {
            create_feature(&db, "FEAT-1");
            deliver_with_full_coverage(&db, "FEAT-1");
            let feature = db.record_pull_request("FEAT-1", "#42", "release").unwrap();
            assert_eq!(feature.pr_reference.as_deref(), Some("#42"));
            let merged = db.record_merge("FEAT-1", None).unwrap();
            assert!(merged.merged_at.is_some());
        }
    }

    describe "backfill" {
        it "closes the gap a missed invocation left" {
            create_feature(&db, "FEAT-1");
            for phase in Phase::TRACKED {
                advance_to(&db, "FEAT-1", phase.value());
                if phase != Phase::DOCUMENTATION {
                    run_agent(&db, "FEAT-1", phase.value(), phase.expected_agent().unwrap());
                }
            }
            assert!(db.complete("FEAT-1", "release").is_err());

            let outcome = db.backfill_invocation("FEAT-1", BackfillInvocationInput {
                phase: 6,
                agent_name: "documenter".into(),
                note: "docs written outside the tracker".into(),
                actor: "lead".into(),
            }).unwrap();
            assert!(outcome.coverage.passed);
            assert!(outcome.invocation.is_closed());
            assert_eq!(
                outcome.invocation.backfill_note.as_deref(),
                Some("docs written outside the tracker")
            );

            let transitions = db.list_transitions("FEAT-1").unwrap();
            let entered = transitions.iter().find(|t| t.to_phase == Phase::DOCUMENTATION).unwrap();
            let left = transitions.iter().find(|t| t.from_phase == Phase::DOCUMENTATION).unwrap();
            assert_eq!(outcome.invocation.started_at, entered.created_at);
            assert_eq!(outcome.invocation.ended_at, Some(left.created_at));

            assert_eq!(db.complete("FEAT-1", "release").unwrap().status, FeatureStatus::Completed);
        }

        it "requires a note" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 1);
            let err = db.backfill_invocation("FEAT-1", BackfillInvocationInput {
                phase: 1,
                agent_name: "discovery".into(),
                note: "  ".into(),
                actor: "lead".into(),
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }

        it "refuses phases the feature never entered" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 2);
            let err = db.backfill_invocation("FEAT-1", BackfillInvocationInput {
                phase: 5,
                agent_name: "integrator".into(),
                note: "missed".into(),
                actor: "lead".into(),
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
        }
    }

    describe "task lists" {
        it "replaces the list for a phase and keeps extra fields" {
            create_feature(&db, "FEAT-1");
            db.submit_task_list("FEAT-1", 4, SubmitTaskListInput {
                tasks: vec![json!({"id": "t1", "title": "Scaffold", "status": "pending"})],
                submitted_by: "builder".into(),
            }).unwrap();
            let list = db.submit_task_list("FEAT-1", 4, SubmitTaskListInput {
                tasks: vec![
                    json!({"id": "t1", "title": "Scaffold", "status": "done", "estimate": 2}),
                    json!({"id": "t2", "title": "Wire up", "status": "in-progress"}),
                ],
                submitted_by: "builder".into(),
            }).unwrap();

            assert_eq!(list.tasks.len(), 2);
            let stored = db.get_task_list("FEAT-1", 4).unwrap();
            assert_eq!(stored.tasks[0].status, TaskStatus::Completed);
            assert_eq!(stored.tasks[0].extra.get("estimate"), Some(&json!(2)));
        }

        it "rejects the whole list when one item is malformed" {
            create_feature(&db, "FEAT-1");
            let err = db.submit_task_list("FEAT-1", 4, SubmitTaskListInput {
                tasks: vec![
                    json!({"id": "t1", "title": "Fine", "status": "pending"}),
                    json!({"id": "t2", "status": "pending"}),
                ],
                submitted_by: "builder".into(),
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
            assert!(matches!(db.get_task_list("FEAT-1", 4), Err(EngineError::NotFound { .. })));
        }
    }

    describe "history" {
        it "collects the whole audit trail" {
            create_feature(&db, "FEAT-1");
            advance_to(&db, "FEAT-1", 1);
            run_agent(&db, "FEAT-1", 1, "discovery");
            db.record_gate("FEAT-1", RecordGateInput {
                gate_name: "scope".into(),
                phase: 1,
                status: GateStatus::Approved,
                approver: None,
                note: None,
            }).unwrap();

            let history = db.feature_history("FEAT-1").unwrap();
            assert_eq!(history.feature.id, "FEAT-1");
            assert_eq!(history.transitions.len(), 1);
            assert_eq!(history.invocations.len(), 1);
            assert_eq!(history.gates.len(), 1);
            assert!(history.blockers.is_empty());
        }
    }
}
