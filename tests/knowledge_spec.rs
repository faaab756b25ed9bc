use rocket_phasegate::db::Database;
use rocket_phasegate::models::*;
use rocket_phasegate::EngineError;
use speculate2::speculate;
use uuid::Uuid;

fn learn(db: &Database, title: &str, content: &str, confidence: f64) -> Learning {
    db.create_learning(CreateLearningInput {
        category: LearningCategory::Pattern,
        title: title.to_string(),
        content: content.to_string(),
        confidence,
        importance: Importance::Medium,
        tags: vec!["rust".to_string(), "testing".to_string()],
        source_feature: Some("FEAT-1".to_string()),
        source_phase: Some(4),
        source_agent: Some("builder".to_string()),
    })
    .expect("Failed to create learning")
}

fn report(db: &Database, a: Uuid, b: Uuid) -> LearningConflict {
    db.detect_conflict(DetectConflictInput {
        learning_a_id: a,
        learning_b_id: b,
        conflict_type: ConflictType::Contradiction,
        description: "they disagree".to_string(),
        detected_by: "guardian".to_string(),
    })
    .expect("Failed to report conflict")
}

fn destination(
    db: &Database,
    path: &str,
    tags: &[&str],
    agent: Option<&str>,
) -> PropagationDestination {
    db.register_destination(RegisterDestinationInput {
        target_type: TargetType::AgentMemory,
        target_path: path.to_string(),
        agent: agent.map(String::from),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        categories: vec![LearningCategory::Pattern],
    })
    .expect("Failed to register destination")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "learnings" {
        it "starts a chain at the given confidence" {
            let learning = learn(&db, "Fixtures", "Prefer builders for fixtures", 0.65);
            assert_eq!(learning.confidence, 0.65);
            assert_eq!(learning.iteration, 1);
            assert!(!learning.is_superseded);
        }

        it "rejects confidence finer than hundredths" {
            let err = db.create_learning(CreateLearningInput {
                category: LearningCategory::Pattern,
                title: "Almost".into(),
                content: "Just under the bar".into(),
                confidence: 0.799,
                importance: Importance::Medium,
                tags: vec![],
                source_feature: None,
                source_phase: None,
                source_agent: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
            assert!(db.list_learnings(&LearningFilter::default()).unwrap().is_empty());
        }

        it "rejects confidence outside 0-1" {
            let err = db.create_learning(CreateLearningInput {
                category: LearningCategory::Gotcha,
                title: "Bad".into(),
                content: "Too sure".into(),
                confidence: 1.2,
                importance: Importance::Low,
                tags: vec![],
                source_feature: None,
                source_phase: None,
                source_agent: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }

        it "raises confidence on validation up to the cap" {
            let learning = learn(&db, "Fixtures", "Prefer builders for fixtures", 0.90);
            let validated = db.validate_learning(learning.id, "guardian").unwrap();
            assert_eq!(validated.confidence, 1.0);
            assert_eq!(validated.validation_count, 1);
            assert_eq!(validated.last_validated_by.as_deref(), Some("guardian"));

            let again = db.validate_learning(learning.id, "builder").unwrap();
            assert_eq!(again.confidence, 1.0);
            assert_eq!(again.validation_count, 2);
        }

        it "raises confidence slightly on reference" {
            let learning = learn(&db, "Fixtures", "Prefer builders for fixtures", 0.50);
            let referenced = db.reference_learning(learning.id).unwrap();
            assert_eq!(referenced.confidence, 0.60);
            assert_eq!(referenced.reference_count, 1);
            assert!(referenced.last_referenced_at.is_some());
        }

        it "filters by activity and confidence" {
            let low = learn(&db, "Low", "Something tentative", 0.3);
            learn(&db, "High", "Something solid", 0.9);
            db.evolve_learning(low.id, EvolveLearningInput {
                content: "Something tentative, refined".into(),
                ..Default::default()
            }).unwrap();

            let active = db.list_learnings(&LearningFilter {
                active_only: true,
                ..Default::default()
            }).unwrap();
            assert_eq!(active.len(), 2);

            let confident = db.list_learnings(&LearningFilter {
                min_confidence: Some(0.8),
                ..Default::default()
            }).unwrap();
            assert_eq!(confident.len(), 1);
            assert_eq!(confident[0].title, "High");
        }
    }

    describe "evolution" {
        it "supersedes the predecessor and inherits unset fields" {
            let root = learn(&db, "Fixtures", "Prefer builders for fixtures", 0.7);
            let next = db.evolve_learning(root.id, EvolveLearningInput {
                content: "Prefer builders for fixtures with defaults".into(),
                delta_summary: Some("added defaults".into()),
                ..Default::default()
            }).unwrap();

            assert_eq!(next.predecessor_id, Some(root.id));
            assert_eq!(next.iteration, 2);
            assert_eq!(next.title, root.title);
            assert_eq!(next.confidence, root.confidence);
            assert_eq!(next.tags, root.tags);
            assert_eq!(next.validation_count, 0);

            let old = db.get_learning(root.id).unwrap();
            assert!(old.is_superseded);
            assert_eq!(old.superseded_by, Some(next.id));
            assert_eq!(old.content, root.content);
        }

        it "refuses to evolve a superseded learning" {
            let root = learn(&db, "Fixtures", "Prefer builders", 0.7);
            db.evolve_learning(root.id, EvolveLearningInput {
                content: "v2".into(),
                ..Default::default()
            }).unwrap();
            let err = db.evolve_learning(root.id, EvolveLearningInput {
                content: "fork".into(),
                ..Default::default()
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
        }

        it "lets only one concurrent refinement win" {
            let root = learn(&db, "Fixtures", "Prefer builders", 0.7);
            let handles: Vec<_> = (0..3)
                .map(|i| {
                    let db = db.clone();
                    std::thread::spawn(move || {
                        db.evolve_learning(root.id, EvolveLearningInput {
                            content: format!("refinement {}", i),
                            ..Default::default()
                        })
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            let chain = db.evolution_chain(root.id).unwrap();
            assert_eq!(chain.len(), 2);
        }

        it "returns the chain oldest first from any member" {
            let v1 = learn(&db, "Fixtures", "v1", 0.7);
            let v2 = db.evolve_learning(v1.id, EvolveLearningInput { content: "v2".into(), ..Default::default() }).unwrap();
            let v3 = db.evolve_learning(v2.id, EvolveLearningInput { content: "v3".into(), ..Default::default() }).unwrap();

            let ids: Vec<Uuid> = db.evolution_chain(v2.id).unwrap().iter().map(|l| l.id).collect();
            assert_eq!(ids, vec![v1.id, v2.id, v3.id]);
        }
    }

    describe "conflicts" {
        it "rejects a learning conflicting with itself" {
            let a = learn(&db, "A", "content", 0.5);
            let err = db.detect_conflict(DetectConflictInput {
                learning_a_id: a.id,
                learning_b_id: a.id,
                conflict_type: ConflictType::ScopeOverlap,
                description: "same".into(),
                detected_by: "guardian".into(),
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }

        it "finds opposing guidance in a scan" {
            let a = learn(&db, "Pooling", "Always use connection pooling for database access in services", 0.6);
            learn(&db, "No pooling", "Never use connection pooling for database access in services", 0.6);
            learn(&db, "Unrelated", "Snapshot tests belong next to the component", 0.6);

            let outcome = db.scan_conflicts(a.id, "guardian").unwrap();
            assert_eq!(outcome.compared, 2);
            assert_eq!(outcome.created.len(), 1);
            assert_eq!(outcome.created[0].conflict_type, ConflictType::Contradiction);

            let rescan = db.scan_conflicts(a.id, "guardian").unwrap();
            assert!(rescan.created.is_empty());
        }

        it "moves through investigation to resolution" {
            let a = learn(&db, "A", "use mocks", 0.6);
            let b = learn(&db, "B", "avoid mocks", 0.6);
            let conflict = report(&db, a.id, b.id);

            let investigating = db.investigate_conflict(conflict.id).unwrap();
            assert_eq!(investigating.status, ConflictStatus::Investigating);

            let resolved = db.resolve_conflict(conflict.id, ResolveConflictInput {
                resolution: "B holds for integration tests".into(),
                winning_learning_id: Some(b.id),
                resolved_by: "lead".into(),
                losing_confidence: Some(0.2),
            }).unwrap();
            assert_eq!(resolved.status, ConflictStatus::Resolved);
            assert_eq!(resolved.winning_learning_id, Some(b.id));
            assert!(resolved.resolved_at.is_some());
            assert_eq!(db.get_learning(a.id).unwrap().confidence, 0.2);
            assert_eq!(db.get_learning(b.id).unwrap().confidence, 0.6);
        }

        it "requires the winner to be part of the conflict" {
            let a = learn(&db, "A", "x", 0.6);
            let b = learn(&db, "B", "y", 0.6);
            let c = learn(&db, "C", "z", 0.6);
            let conflict = report(&db, a.id, b.id);
            let err = db.resolve_conflict(conflict.id, ResolveConflictInput {
                resolution: "c wins".into(),
                winning_learning_id: Some(c.id),
                resolved_by: "lead".into(),
                losing_confidence: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
            assert_eq!(db.get_conflict(conflict.id).unwrap().status, ConflictStatus::Open);
        }

        it "rejects a losing confidence finer than hundredths" {
            let a = learn(&db, "A", "use mocks", 0.9);
            let b = learn(&db, "B", "avoid mocks", 0.9);
            let conflict = report(&db, a.id, b.id);
            let err = db.resolve_conflict(conflict.id, ResolveConflictInput {
                resolution: "B holds".into(),
                winning_learning_id: Some(b.id),
                resolved_by: "lead".into(),
                losing_confidence: Some(0.799),
            }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
            assert_eq!(db.get_learning(a.id).unwrap().confidence, 0.9);
            assert_eq!(db.get_conflict(conflict.id).unwrap().status, ConflictStatus::Open);
        }

        it "does not settle a conflict twice" {
            let a = learn(&db, "A", "x", 0.6);
            let b = learn(&db, "B", "y", 0.6);
            let conflict = report(&db, a.id, b.id);
            db.defer_conflict(conflict.id).unwrap();
            assert!(matches!(db.defer_conflict(conflict.id), Err(EngineError::State(_))));
            assert!(matches!(db.investigate_conflict(conflict.id), Err(EngineError::State(_))));
        }
    }

    describe "propagation" {
        it "requires confidence at the readiness threshold" {
            let learning = learn(&db, "Fixtures", "Prefer builders", 0.70);
            assert!(!db.is_propagation_ready(learning.id).unwrap());
            db.validate_learning(learning.id, "guardian").unwrap();
            assert!(db.is_propagation_ready(learning.id).unwrap());
        }

        it "never readies a learning below 0.80" {
            let almost = learn(&db, "Almost", "Just under the bar", 0.79);
            assert!(!db.is_propagation_ready(almost.id).unwrap());
            assert!(db.propagation_ready_learnings().unwrap().is_empty());
        }

        it "excludes a confident learning until its conflict is resolved" {
            let a = learn(&db, "A", "use mocks", 0.85);
            let b = learn(&db, "B", "avoid mocks", 0.79);
            let conflict = report(&db, a.id, b.id);
            assert!(!db.is_propagation_ready(a.id).unwrap());
            assert!(db.propagation_ready_learnings().unwrap().is_empty());

            db.resolve_conflict(conflict.id, ResolveConflictInput {
                resolution: "A holds for unit tests".into(),
                winning_learning_id: Some(a.id),
                resolved_by: "lead".into(),
                losing_confidence: None,
            }).unwrap();

            let ready: Vec<Uuid> = db.propagation_ready_learnings().unwrap().iter().map(|l| l.id).collect();
            assert_eq!(ready, vec![a.id]);
            assert!(!db.is_propagation_ready(b.id).unwrap());
        }

        it "is blocked by open conflicts and freed by deferral" {
            let a = learn(&db, "A", "x", 0.9);
            let b = learn(&db, "B", "y", 0.9);
            let conflict = report(&db, a.id, b.id);
            assert!(!db.is_propagation_ready(a.id).unwrap());
            assert!(!db.is_propagation_ready(b.id).unwrap());

            db.investigate_conflict(conflict.id).unwrap();
            assert!(!db.is_propagation_ready(a.id).unwrap());

            db.defer_conflict(conflict.id).unwrap();
            assert!(db.is_propagation_ready(a.id).unwrap());
            assert_eq!(db.propagation_ready_learnings().unwrap().len(), 2);
        }

        it "scores destinations and skips irrelevant ones" {
            let learning = learn(&db, "Fixtures", "Prefer builders", 0.9);
            destination(&db, "agents/builder/memory.md", &["rust", "testing"], Some("builder"));
            destination(&db, "agents/frontend/memory.md", &["css"], None);
            db.register_destination(RegisterDestinationInput {
                target_type: TargetType::Skill,
                target_path: "skills/deploy.md".into(),
                agent: None,
                tags: vec!["ops".into()],
                categories: vec![LearningCategory::Decision],
            }).unwrap();

            let targets = db.compute_targets(learning.id).unwrap();
            assert_eq!(targets.len(), 2);
            let best = targets.iter().find(|t| t.target_path == "agents/builder/memory.md").unwrap();
            assert_eq!(best.relevance_score, 1.0);
            let weak = targets.iter().find(|t| t.target_path == "agents/frontend/memory.md").unwrap();
            assert_eq!(weak.relevance_score, 0.2);

            let again = db.compute_targets(learning.id).unwrap();
            assert_eq!(again.len(), 2);
        }

        it "tracks propagation status against every candidate" {
            let learning = learn(&db, "Fixtures", "Prefer builders", 0.9);
            destination(&db, "agents/builder/memory.md", &["rust", "testing"], Some("builder"));
            destination(&db, "agents/guardian/memory.md", &["rust", "testing"], None);
            destination(&db, "agents/frontend/memory.md", &["css"], None);
            db.compute_targets(learning.id).unwrap();

            let status = db.propagation_status(learning.id).unwrap();
            assert_eq!(status.candidates, 3);
            assert_eq!(status.status, PropagationStatus::Pending);
            assert_eq!(db.ready_queue().unwrap().len(), 2);

            db.record_propagation(RecordPropagationInput {
                learning_id: learning.id,
                target_type: TargetType::AgentMemory,
                target_path: "agents/builder/memory.md".into(),
                actor: "librarian".into(),
                section: Some("Testing".into()),
            }).unwrap();
            assert_eq!(db.propagation_status(learning.id).unwrap().status, PropagationStatus::Partial);
            assert_eq!(db.ready_queue().unwrap().len(), 1);

            db.record_propagation(RecordPropagationInput {
                learning_id: learning.id,
                target_type: TargetType::AgentMemory,
                target_path: "agents/guardian/memory.md".into(),
                actor: "librarian".into(),
                section: None,
            }).unwrap();
            let most = db.propagation_status(learning.id).unwrap();
            assert_eq!(most.status, PropagationStatus::Partial);
            assert_eq!(most.propagated, 2);
            assert!(db.ready_queue().unwrap().is_empty());

            db.record_propagation(RecordPropagationInput {
                learning_id: learning.id,
                target_type: TargetType::AgentMemory,
                target_path: "agents/frontend/memory.md".into(),
                actor: "librarian".into(),
                section: None,
            }).unwrap();
            let done = db.propagation_status(learning.id).unwrap();
            assert_eq!(done.status, PropagationStatus::Complete);
            assert_eq!(done.propagated, 3);
        }

        it "refuses to propagate a learning that is not ready" {
            let learning = learn(&db, "Fixtures", "Prefer builders", 0.5);
            let err = db.record_propagation(RecordPropagationInput {
                learning_id: learning.id,
                target_type: TargetType::Skill,
                target_path: "skills/testing.md".into(),
                actor: "librarian".into(),
                section: None,
            }).unwrap_err();
            assert!(matches!(err, EngineError::State(_)));
            assert!(db.list_propagations(learning.id).unwrap().is_empty());
        }

        it "reports no targets before computation" {
            let learning = learn(&db, "Fixtures", "Prefer builders", 0.9);
            let status = db.propagation_status(learning.id).unwrap();
            assert_eq!(status.status, PropagationStatus::NoTargets);
        }

        it "rejects a duplicate destination" {
            destination(&db, "agents/builder/memory.md", &["rust"], None);
            let err = db.register_destination(RegisterDestinationInput {
                target_type: TargetType::AgentMemory,
                target_path: "agents/builder/memory.md".into(),
                agent: None,
                tags: vec![],
                categories: vec![],
            }).unwrap_err();
            assert!(matches!(err, EngineError::Conflict(_)));
        }
    }
}
