mod support;

use chrono::{TimeDelta, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use shepherd_core::collect::{CollectorSettings, collect_and_schedule, collect_work_items};
use shepherd_core::dispatch::{Dispatcher, process_item};
use shepherd_core::handler::{HandlerSettings, WorkflowResult, needs_attention_tag};
use shepherd_core::error::ErrorCode;
use shepherd_core::model::{
    AdvisoryStatus, Comment, IssueStatus, PackageBuild, PushStatus, StagePush, TestRunResult,
    TestRunState, TestingAnalysis, TestingState, WorkItem, labels,
};
use shepherd_core::queue::WorkQueue;
use shepherd_core::rules::{RuleOutcome, TransitionRule, TransitionRuleSet};

use support::{
    ADVISORY_ID, BOT, World, advisory, issue, merged_mr, ready_issue, settings, test_run, xunit,
};

fn run_issue(world: &World, key: &str) -> WorkflowResult {
    run_issue_with(world, &settings(), key)
}

fn run_issue_with(world: &World, settings: &HandlerSettings, key: &str) -> WorkflowResult {
    process_item(world.services(), settings, &WorkItem::issue(key)).expect("issue step")
}

fn run_erratum(world: &World, id: u64) -> WorkflowResult {
    process_item(world.services(), &settings(), &WorkItem::erratum(id)).expect("advisory step")
}

fn rule(name: &str, outcome: RuleOutcome) -> TransitionRule {
    TransitionRule {
        name: name.to_string(),
        outcome,
        details: format!("{name} details"),
    }
}

fn rule_set(from: AdvisoryStatus, to: AdvisoryStatus, rules: Vec<TransitionRule>) -> TransitionRuleSet {
    TransitionRuleSet {
        from_status: from,
        to_status: to,
        rules,
    }
}

fn analysis(state: TestingState, comment: &str, failed: &[&str]) -> TestingAnalysis {
    TestingAnalysis {
        state,
        comment: Some(comment.to_string()),
        failed_test_ids: failed.iter().map(|id| (*id).to_string()).collect(),
    }
}

fn last_comment(world: &World, key: &str) -> String {
    world
        .issue(key)
        .comments
        .last()
        .map(|comment| comment.body.clone())
        .unwrap_or_default()
}

/// An advisory world where the advisory's only issue is owned by automation.
fn advisory_world(status: AdvisoryStatus, issue_status: IssueStatus) -> World {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", issue_status));
    world.put_advisory(advisory(ADVISORY_ID, status, &["RHEL-1"]));
    world
}

fn tracking_issue_description(world: &World) -> Option<String> {
    world
        .descriptions
        .borrow()
        .values()
        .find(|description| description.contains(&needs_attention_tag(ADVISORY_ID)))
        .cloned()
}

// Issue workflow

#[test]
fn issue_without_advisory_or_ownership_labels_is_dropped() {
    let world = World::new();
    world.put_issue(issue("RHEL-1"));

    let result = run_issue(&world, "RHEL-1");

    assert!(result.reschedule_in < 0);
    assert!(world.log.borrow().is_empty(), "no side effects expected");
}

#[test]
fn needs_attention_label_skips_unless_ignored() {
    let world = World::new();
    let mut flagged = ready_issue("RHEL-1", IssueStatus::InProgress);
    flagged.labels.insert(labels::NEEDS_ATTENTION.to_string());
    world.put_issue(flagged);

    let result = run_issue(&world, "RHEL-1");
    assert!(result.is_removal());
    assert!(world.logged("change_status").is_empty());

    let ignoring = HandlerSettings {
        ignore_needs_attention: true,
        ..settings()
    };
    let result = run_issue_with(&world, &ignoring, "RHEL-1");
    assert_eq!(result.reschedule_in, 0);
    assert_eq!(world.issue("RHEL-1").status, IssueStatus::Integration);
}

#[test]
fn multiple_components_escalate() {
    let world = World::new();
    let mut two = ready_issue("RHEL-1", IssueStatus::InProgress);
    two.components.push("buildah".to_string());
    world.put_issue(two);

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    let issue = world.issue("RHEL-1");
    assert!(issue.has_label(labels::NEEDS_ATTENTION));
    assert!(last_comment(&world, "RHEL-1").contains("has 2 components"));
}

#[test]
fn backported_issue_without_merge_waits_for_merge() {
    let world = World::new();
    let mut backported = issue("RHEL-1");
    backported.labels.insert(labels::BACKPORTED.to_string());
    world.put_issue(backported);

    let result = run_issue(&world, "RHEL-1");

    assert_eq!(result.reschedule_in, 3 * 3600);
    assert!(!world.issue("RHEL-1").has_label(labels::MERGED));
}

#[test]
fn fresh_merge_is_labelled_and_waits_for_advisory() {
    let world = World::new();
    let mut backported = issue("RHEL-1");
    backported.labels.insert(labels::BACKPORTED.to_string());
    world.put_issue(backported);
    world.merge_requests.borrow_mut().insert(
        "rhel/rpms/podman".to_string(),
        vec![merged_mr("rhel/rpms/podman", Utc::now() - TimeDelta::hours(2))],
    );

    let result = run_issue(&world, "RHEL-1");

    assert_eq!(result.reschedule_in, 3600);
    assert!(world.issue("RHEL-1").has_label(labels::MERGED));
    assert!(last_comment(&world, "RHEL-1").contains("merge_requests/12"));
}

#[test]
fn stale_merge_without_advisory_escalates() {
    let world = World::new();
    let mut merged = issue("RHEL-1");
    merged.labels.insert(labels::MERGED.to_string());
    world.put_issue(merged);
    world.merge_requests.borrow_mut().insert(
        "centos-stream/rpms/podman".to_string(),
        vec![merged_mr(
            "centos-stream/rpms/podman",
            Utc::now() - TimeDelta::hours(30),
        )],
    );

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert!(world.issue("RHEL-1").has_label(labels::NEEDS_ATTENTION));
    assert!(last_comment(&world, "RHEL-1").contains("more than 24 hours ago"));
}

#[test]
fn missing_fixed_in_build_escalates() {
    let world = World::new();
    let mut incomplete = ready_issue("RHEL-1", IssueStatus::InProgress);
    incomplete.fixed_in_build = None;
    world.put_issue(incomplete);

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert!(last_comment(&world, "RHEL-1").contains("no fixed-in build"));
}

#[test]
fn in_progress_issue_with_advisory_moves_to_integration() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::InProgress));

    let result = run_issue(&world, "RHEL-1");

    assert_eq!(result.reschedule_in, 0);
    assert_eq!(world.issue("RHEL-1").status, IssueStatus::Integration);
    assert!(last_comment(&world, "RHEL-1")
        .starts_with("*Changing status from In Progress => Integration*"));
}

#[test]
fn passed_integration_moves_to_release_pending_and_leaves_queue() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::Qe, &["RHEL-1"]));
    world.set_analysis(analysis(TestingState::Passed, "All gating tests passed.", &[]));

    let result = run_issue(&world, "RHEL-1");

    assert!(result.reschedule_in < 0);
    assert_eq!(world.issue("RHEL-1").status, IssueStatus::ReleasePending);
    assert_eq!(world.analyst_calls.borrow().as_slice(), &[false]);
    assert!(last_comment(&world, "RHEL-1").ends_with("All gating tests passed."));
}

#[test]
fn pending_tests_wait_default_delay() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::Qe, &["RHEL-1"]));
    world.set_analysis(analysis(TestingState::Running, "still going", &[]));

    let result = run_issue(&world, "RHEL-1");

    assert_eq!(result.reschedule_in, 20 * 60);
    assert_eq!(world.issue("RHEL-1").status, IssueStatus::Integration);
}

/// Seed a world where RHEL-1 failed final testing in run `orig-1`.
fn failing_world() -> World {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::Qe, &["RHEL-1"]));
    world.put_advisory(advisory(42, AdvisoryStatus::ShippedLive, &[]));
    world.previous.borrow_mut().insert((ADVISORY_ID, "podman".to_string()), 42);
    world.manifests.borrow_mut().insert(
        42,
        BTreeMap::from([(
            "podman".to_string(),
            PackageBuild {
                nvr: "podman-5.2.2-1.el9".to_string(),
                files: BTreeMap::new(),
            },
        )]),
    );
    world.put_run(test_run(
        "orig-1",
        "podman-5.2.2-2.el9",
        TestRunState::Complete,
        TestRunResult::Failed,
    ));
    world.set_analysis(analysis(
        TestingState::Failed,
        "Test /tests/smoke failed on x86_64",
        &["orig-1"],
    ));
    world
}

#[test]
fn failed_tests_start_and_finish_a_baseline_reproduction() {
    let world = failing_world();

    // Start: one reproduction per failed run, with the previous build.
    let started = run_issue(&world, "RHEL-1");
    assert_eq!(started.reschedule_in, 20 * 60);
    assert!(world.issue("RHEL-1").has_label(labels::REPRODUCING_TESTS));
    assert_eq!(world.logged("reproduce"), vec![
        "reproduce orig-1 podman-5.2.2-1.el9".to_string()
    ]);
    let table = last_comment(&world, "RHEL-1");
    assert!(table.contains("Reproducing failed tests with previous build podman-5.2.2-1.el9:"));
    assert!(table.contains("Test /tests/smoke failed on x86_64"));

    let repro_id = world
        .runs
        .borrow()
        .keys()
        .find(|id| id.starts_with("repro-"))
        .cloned()
        .expect("reproduction submitted");
    let repro = world.runs.borrow()[&repro_id].clone();
    assert_eq!(repro.build_under_test(), Some("podman-5.2.2-1.el9"));
    assert!(!repro.environments[0].tmt.context.contains_key("newa_batch"));

    // Still queued: keep waiting, no changes.
    let waiting = run_issue(&world, "RHEL-1");
    assert_eq!(waiting.reschedule_in, 20 * 60);
    assert!(world.logged("update_comment").is_empty());

    // Both runs complete with artifacts: compare and record.
    {
        let mut runs = world.runs.borrow_mut();
        let original = runs.get_mut("orig-1").expect("original");
        original.result_artifact_url = Some("https://artifacts.example.com/orig-1.xml".to_string());
        let reproduction = runs.get_mut(&repro_id).expect("reproduction");
        reproduction.state = TestRunState::Complete;
        reproduction.result = TestRunResult::Failed;
        reproduction.result_artifact_url =
            Some("https://artifacts.example.com/repro.xml".to_string());
    }
    {
        let mut artifacts = world.artifacts.borrow_mut();
        artifacts.insert(
            "https://artifacts.example.com/orig-1.xml".to_string(),
            xunit(&[("/tests/smoke", "fail"), ("/tests/basic", "pass")]),
        );
        artifacts.insert(
            "https://artifacts.example.com/repro.xml".to_string(),
            xunit(&[("/tests/smoke", "fail"), ("/tests/basic", "pass")]),
        );
    }

    let finished = run_issue(&world, "RHEL-1");
    assert_eq!(finished.reschedule_in, 0);
    let issue = world.issue("RHEL-1");
    assert!(!issue.has_label(labels::REPRODUCING_TESTS));

    let attachments = world.attachments.borrow();
    assert_eq!(attachments.len(), 1);
    assert_eq!(
        attachments[0].1.name,
        format!("comparison-{repro_id}--orig-1.toml")
    );
    assert!(attachments[0].1.content.starts_with("# XUnit Comparison Report"));
    assert!(attachments[0].1.content.contains("broken = 1"));
    drop(attachments);

    // The table comment was rewritten in place, not duplicated.
    let table = last_comment(&world, "RHEL-1");
    assert!(table.contains("Reproduced failed tests with previous build"));
    assert!(table.contains("[compare|^comparison-"));

    // Next pass consults the analyst with the baseline in hand; a second
    // failure is a human's problem, never a second reproduction.
    let escalated = run_issue(&world, "RHEL-1");
    assert!(escalated.is_removal());
    assert_eq!(world.analyst_calls.borrow().as_slice(), &[false, true]);
    assert_eq!(world.logged("reproduce").len(), 1);
    assert!(world.issue("RHEL-1").has_label(labels::NEEDS_ATTENTION));
}

#[test]
fn reproduction_without_artifacts_records_reason_in_table() {
    let world = failing_world();
    run_issue(&world, "RHEL-1");
    for run in world.runs.borrow_mut().values_mut() {
        run.state = TestRunState::Error;
    }

    let result = run_issue(&world, "RHEL-1");

    assert_eq!(result.reschedule_in, 0);
    assert!(world.attachments.borrow().is_empty());
    let table = last_comment(&world, "RHEL-1");
    assert!(table.contains("Failed to reproduce failed tests with previous build"));
    assert!(table.contains("no result artifact to compare"));
}

#[test]
fn failed_tests_without_previous_advisory_escalate_with_summary() {
    let world = failing_world();
    world.previous.borrow_mut().clear();

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    let comment = last_comment(&world, "RHEL-1");
    assert!(comment.contains("no previous advisory found"));
    assert!(comment.ends_with("Test /tests/smoke failed on x86_64"));
    assert!(world.logged("reproduce").is_empty());
}

#[test]
fn reproducing_label_without_table_escalates() {
    let world = World::new();
    let mut labelled = ready_issue("RHEL-1", IssueStatus::Integration);
    labelled.labels.insert(labels::REPRODUCING_TESTS.to_string());
    world.put_issue(labelled);

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert!(last_comment(&world, "RHEL-1").contains("no reproduction table"));
}

#[test]
fn tests_not_running_escalate_with_analyst_comment() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::Qe, &["RHEL-1"]));
    world.set_analysis(analysis(
        TestingState::NotRunning,
        "No test jobs were scheduled for this advisory.",
        &[],
    ));

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    let issue = world.issue("RHEL-1");
    assert!(issue.has_label(labels::NEEDS_ATTENTION));
    assert_eq!(issue.status, IssueStatus::Integration);
    let comment = last_comment(&world, "RHEL-1");
    assert!(comment.contains("Tests aren't running - see details below"));
    assert!(comment.ends_with("No test jobs were scheduled for this advisory."));
}

#[test]
fn waived_tests_move_to_release_pending_and_leave_queue() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::Qe, &["RHEL-1"]));
    world.set_analysis(analysis(TestingState::Waived, "Failures waived by QE.", &[]));

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert_eq!(world.issue("RHEL-1").status, IssueStatus::ReleasePending);
    assert_eq!(world.logged("change_status").len(), 1);
    assert!(!world.issue("RHEL-1").has_label(labels::NEEDS_ATTENTION));
    assert!(last_comment(&world, "RHEL-1").ends_with("Failures waived by QE."));
}

#[test]
fn failed_run_without_build_environment_escalates() {
    let world = failing_world();
    world
        .runs
        .borrow_mut()
        .get_mut("orig-1")
        .expect("original")
        .environments
        .clear();

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert!(world.logged("reproduce").is_empty());
    let issue = world.issue("RHEL-1");
    assert!(issue.has_label(labels::NEEDS_ATTENTION));
    assert!(!issue.has_label(labels::REPRODUCING_TESTS));
    let comment = last_comment(&world, "RHEL-1");
    assert!(comment.contains("test run orig-1 has no environment carrying BUILDS"));
    assert!(comment.ends_with("Test /tests/smoke failed on x86_64"));
}

#[test]
fn malformed_table_without_reproducing_label_escalates() {
    let world = failing_world();
    let mut with_table = world.issue("RHEL-1");
    with_table.comments.push(Comment {
        id: "c99".to_string(),
        author: BOT.to_string(),
        created: Utc::now(),
        body: "Reproducing failed tests with previous build podman-5.2.2-1.el9:\n\
               ||Architecture||Original Request||Request With Old Build||State||\n\
               |x86_64|[orig-1|https://t/orig-1]|[repro-1|https://t/repro-1]|exploded|"
            .to_string(),
    });
    world.put_issue(with_table);

    let result = run_issue(&world, "RHEL-1");

    assert!(result.is_removal());
    assert!(world.analyst_calls.borrow().is_empty());
    assert!(world.logged("reproduce").is_empty());
    assert!(world.issue("RHEL-1").has_label(labels::NEEDS_ATTENTION));
    assert!(last_comment(&world, "RHEL-1")
        .contains("Cannot parse the reproduction table in the issue comments"));
}

#[test]
fn unknown_issue_status_is_a_hard_error() {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    world
        .raw_statuses
        .borrow_mut()
        .insert("RHEL-1".to_string(), "Verified".to_string());

    let err = process_item(world.services(), &settings(), &WorkItem::issue("RHEL-1"))
        .expect_err("unknown status");

    assert_eq!(ErrorCode::classify(&err), ErrorCode::InvalidStatusValue);
    assert!(world.log.borrow().is_empty(), "no side effects expected");
}

// Advisory workflow

#[test]
fn mismatched_next_status_escalates() {
    let world = advisory_world(AdvisoryStatus::NewFiles, IssueStatus::Integration);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::NewFiles, AdvisoryStatus::RelPrep, Vec::new()),
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.reschedule_in < 0);
    assert!(world.logged("advisory_status").is_empty());
    let description = tracking_issue_description(&world).expect("tracking issue filed");
    assert!(description.contains("Next status is REL_PREP instead of QE"));
    assert_eq!(world.logged("create_issue").len(), 1);
}

#[test]
fn all_ok_rules_advance_new_files_to_qe() {
    let world = advisory_world(AdvisoryStatus::NewFiles, IssueStatus::Integration);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::NewFiles, AdvisoryStatus::Qe, vec![rule(
            "Rpmdiff",
            RuleOutcome::Ok,
        )]),
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert_eq!(result.reschedule_in, 0);
    assert_eq!(world.logged("advisory_status"), vec![format!(
        "advisory_status {ADVISORY_ID} QE"
    )]);
}

#[test]
fn flagged_advisory_is_skipped() {
    let world = advisory_world(AdvisoryStatus::NewFiles, IssueStatus::Integration);
    world.put_tracking_issue(
        "RELMISC-7",
        &needs_attention_tag(ADVISORY_ID),
        &[labels::NEEDS_ATTENTION],
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert!(world.log.borrow().is_empty());
}

#[test]
fn qe_advisory_waits_for_every_issue() {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::Integration);

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert!(world.logged("advisory_status").is_empty());
}

#[test]
fn missing_stage_push_is_triggered() {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![
            rule("Cat", RuleOutcome::Block),
            rule("Stagepush", RuleOutcome::Block),
        ]),
    );

    let first = run_erratum(&world, ADVISORY_ID);
    assert_eq!(first.reschedule_in, 20 * 60);
    assert_eq!(world.logged("push_to_stage").len(), 1);

    // The push is now queued: wait without pushing again.
    let second = run_erratum(&world, ADVISORY_ID);
    assert_eq!(second.reschedule_in, 20 * 60);
    assert_eq!(world.logged("push_to_stage").len(), 1);
}

#[test]
fn failed_stage_push_escalates() {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![rule(
            "Stagepush",
            RuleOutcome::Block,
        )]),
    );
    world.pushes.borrow_mut().insert(ADVISORY_ID, StagePush {
        id: 5,
        status: PushStatus::Failed,
        updated_at: None,
    });

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert!(tracking_issue_description(&world)
        .expect("tracking issue")
        .contains("Stage push previously FAILED"));
}

fn cat_world(pushed_ago: TimeDelta) -> World {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![rule(
            "Cat",
            RuleOutcome::Block,
        )]),
    );
    world.pushes.borrow_mut().insert(ADVISORY_ID, StagePush {
        id: 5,
        status: PushStatus::Complete,
        updated_at: Some(Utc::now() - pushed_ago),
    });
    world
}

#[test]
fn cat_tests_within_timeout_wait() {
    let world = cat_world(TimeDelta::hours(1));

    let result = run_erratum(&world, ADVISORY_ID);

    assert_eq!(result.reschedule_in, 20 * 60);
    assert!(tracking_issue_description(&world).is_none());
}

#[test]
fn cat_tests_past_timeout_escalate_once_per_tracking_issue() {
    let world = cat_world(TimeDelta::hours(4));

    let first = run_erratum(&world, ADVISORY_ID);
    assert!(first.is_removal());
    assert!(tracking_issue_description(&world)
        .expect("tracking issue")
        .contains("within 3 hours of the stage push"));

    // A second escalation comments on the same tracking issue.
    let again = run_issue_free_erratum(&world);
    assert!(again.is_removal());
    assert_eq!(world.logged("create_issue").len(), 1);
    assert_eq!(world.logged("add_comment RELMISC").len(), 1);
}

#[test]
fn stage_push_in_flight_waits_without_pushing_again() {
    for status in [PushStatus::Queued, PushStatus::Running] {
        let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
        world.rules.borrow_mut().insert(
            ADVISORY_ID,
            rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![rule(
                "Stagepush",
                RuleOutcome::Block,
            )]),
        );
        world.pushes.borrow_mut().insert(ADVISORY_ID, StagePush {
            id: 5,
            status,
            updated_at: None,
        });

        let result = run_erratum(&world, ADVISORY_ID);

        assert_eq!(result.reschedule_in, 20 * 60, "{status}");
        assert!(result.status.contains("already in progress"), "{status}");
        assert!(world.logged("push_to_stage").is_empty(), "{status}");
        assert!(tracking_issue_description(&world).is_none(), "{status}");
    }
}

#[test]
fn cat_tests_wait_while_push_is_incomplete() {
    let world = cat_world(TimeDelta::hours(5));
    world
        .pushes
        .borrow_mut()
        .get_mut(&ADVISORY_ID)
        .expect("push")
        .status = PushStatus::Running;

    let result = run_erratum(&world, ADVISORY_ID);

    assert_eq!(result.reschedule_in, 20 * 60);
    assert!(result.status.contains("to complete before CAT tests can pass"));
    assert!(world.logged("push_to_stage").is_empty());
    assert!(tracking_issue_description(&world).is_none());
}

/// Run the advisory step ignoring the needs-attention marker it just set.
fn run_issue_free_erratum(world: &World) -> WorkflowResult {
    let ignoring = HandlerSettings {
        ignore_needs_attention: true,
        ..settings()
    };
    process_item(world.services(), &ignoring, &WorkItem::erratum(ADVISORY_ID)).expect("step")
}

#[test]
fn unknown_blocker_escalates_with_blocking_rules() {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![
            rule("Rpmdiff", RuleOutcome::Block),
            rule("Covscan", RuleOutcome::Unknown),
        ]),
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    let description = tracking_issue_description(&world).expect("tracking issue");
    assert!(description.contains("blocked by:\nRpmdiff: Rpmdiff details"));
    assert!(!description.contains("Covscan"));
}

#[test]
fn security_alert_blocker_is_refreshed() {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![rule(
            "Securityalert",
            RuleOutcome::Block,
        )]),
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert_eq!(result.reschedule_in, 20 * 60);
    assert_eq!(world.logged("refresh_security_alerts").len(), 1);
}

fn listing_world(current: &[&str], previous: &[&str]) -> World {
    let world = advisory_world(AdvisoryStatus::Qe, IssueStatus::ReleasePending);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::Qe, AdvisoryStatus::RelPrep, vec![rule(
            "Rpmdiff",
            RuleOutcome::Ok,
        )]),
    );
    let files = |names: &[&str]| {
        BTreeMap::from([(
            "AppStream-9.6.0".to_string(),
            BTreeMap::from([(
                "x86_64".to_string(),
                names.iter().map(|name| (*name).to_string()).collect(),
            )]),
        )])
    };
    world.manifests.borrow_mut().insert(
        ADVISORY_ID,
        BTreeMap::from([("podman".to_string(), PackageBuild {
            nvr: "podman-5.2.2-2.el9".to_string(),
            files: files(current),
        })]),
    );
    world.manifests.borrow_mut().insert(
        42,
        BTreeMap::from([("podman".to_string(), PackageBuild {
            nvr: "podman-5.2.2-1.el9".to_string(),
            files: files(previous),
        })]),
    );
    world.put_advisory(advisory(42, AdvisoryStatus::ShippedLive, &[]));
    world.previous.borrow_mut().insert((ADVISORY_ID, "podman".to_string()), 42);
    world
}

#[test]
fn matching_product_listings_advance_to_rel_prep() {
    let world = listing_world(&["podman-5.2.2-2.el9.x86_64.rpm"], &[
        "podman-5.2.2-2.el9.x86_64.rpm",
    ]);

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert_eq!(world.logged("advisory_status"), vec![format!(
        "advisory_status {ADVISORY_ID} REL_PREP"
    )]);
    let comments = world.advisory_comments.borrow();
    assert!(comments[&ADVISORY_ID][0]
        .body
        .contains("shepherd-product-listings-checked(podman-5.2.2-2.el9)"));
}

#[test]
fn mismatched_product_listings_escalate_and_are_not_rechecked() {
    let world = listing_world(&["podman-5.2.2-2.el9.x86_64.rpm"], &[
        "podman-5.2.2-2.el9.x86_64.rpm",
        "podman-docker-5.2.2-2.el9.noarch.rpm",
    ]);

    let result = run_erratum(&world, ADVISORY_ID);
    assert!(result.is_removal());
    assert!(world.logged("advisory_status").is_empty());
    assert!(tracking_issue_description(&world)
        .expect("tracking issue")
        .contains("mismatched packages: podman"));

    // Once a human resolves it, the marker keeps the check from repeating.
    let again = run_issue_free_erratum(&world);
    assert!(again.is_removal());
    assert_eq!(world.logged("advisory_comment").len(), 1);
    assert_eq!(world.logged("advisory_status").len(), 1);
}

#[test]
fn new_package_skips_listing_comparison() {
    let world = listing_world(&["podman-5.2.2-2.el9.x86_64.rpm"], &[]);
    world.previous.borrow_mut().clear();

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    let comments = world.advisory_comments.borrow();
    assert!(comments[&ADVISORY_ID][0].body.contains("New package"));
}

#[test]
fn mixed_ownership_escalates() {
    let world = advisory_world(AdvisoryStatus::NewFiles, IssueStatus::Integration);
    let mut foreign = ready_issue("RHEL-2", IssueStatus::Integration);
    foreign.assignee = Some("someone-else".to_string());
    world.put_issue(foreign);
    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::NewFiles, &[
        "RHEL-1", "RHEL-2",
    ]));

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert!(tracking_issue_description(&world)
        .expect("tracking issue")
        .contains("mixed ownership: RHEL-2"));
    assert!(world.logged("set_owner").is_empty());
}

#[test]
fn unowned_advisory_is_claimed() {
    let world = advisory_world(AdvisoryStatus::NewFiles, IssueStatus::Integration);
    let mut unowned = advisory(ADVISORY_ID, AdvisoryStatus::NewFiles, &["RHEL-1"]);
    unowned.owners.clear();
    world.put_advisory(unowned);
    world.rules.borrow_mut().insert(
        ADVISORY_ID,
        rule_set(AdvisoryStatus::NewFiles, AdvisoryStatus::Qe, Vec::new()),
    );

    let result = run_erratum(&world, ADVISORY_ID);

    assert_eq!(result.reschedule_in, 0);
    assert_eq!(world.logged("set_owner"), vec![format!(
        "set_owner {ADVISORY_ID} {BOT}"
    )]);
}

#[test]
fn shipped_advisory_is_dropped() {
    let world = advisory_world(AdvisoryStatus::ShippedLive, IssueStatus::Closed);

    let result = run_erratum(&world, ADVISORY_ID);

    assert!(result.is_removal());
    assert!(world.log.borrow().is_empty());
}

// Collection and dispatch

fn collector() -> CollectorSettings {
    CollectorSettings {
        query: "labels in (shepherd_backported)".to_string(),
        attention_project: "RELMISC".to_string(),
    }
}

fn collection_world() -> World {
    let world = World::new();
    world.put_issue(ready_issue("RHEL-1", IssueStatus::Integration));
    let mut pending = ready_issue("RHEL-2", IssueStatus::ReleasePending);
    pending.advisory_link = Some("https://advisories.example.com/advisory/200".to_string());
    world.put_issue(pending);
    let mut unlinked = issue("RHEL-3");
    unlinked.advisory_link = Some("https://advisories.example.com/advisory/".to_string());
    world.put_issue(unlinked);

    world.put_advisory(advisory(ADVISORY_ID, AdvisoryStatus::NewFiles, &["RHEL-1"]));
    world.put_advisory(advisory(200, AdvisoryStatus::Qe, &["RHEL-2"]));
    world
}

#[test]
fn collector_finds_open_issues_and_ready_advisories() {
    let world = collection_world();

    let items = collect_work_items(world.services(), &collector()).expect("collect");

    let expected = [
        WorkItem::issue("RHEL-1"),
        WorkItem::issue("RHEL-3"),
        WorkItem::erratum(ADVISORY_ID),
        WorkItem::erratum(200),
    ];
    assert_eq!(items, expected.into_iter().collect());
}

#[test]
fn collector_skips_flagged_and_unready_advisories() {
    let world = collection_world();
    world.put_tracking_issue(
        "RELMISC-9",
        &needs_attention_tag(ADVISORY_ID),
        &[labels::NEEDS_ATTENTION],
    );
    world.put_issue(ready_issue("RHEL-4", IssueStatus::Integration));
    world.put_advisory(advisory(200, AdvisoryStatus::Qe, &["RHEL-2", "RHEL-4"]));

    let items = collect_work_items(world.services(), &collector()).expect("collect");

    assert!(!items.contains(&WorkItem::erratum(ADVISORY_ID)));
    assert!(!items.contains(&WorkItem::erratum(200)));
}

#[test]
fn collecting_keeps_existing_ready_times() {
    let world = collection_world();
    let queue = WorkQueue::open_in_memory().expect("queue");
    let existing = WorkItem::issue("RHEL-1");
    queue
        .schedule_work_items([&existing], Duration::from_secs(3600))
        .expect("schedule");

    let fresh = collect_and_schedule(&queue, world.services(), &collector()).expect("collect");

    assert_eq!(fresh.len(), 3);
    assert!(!fresh.contains(&existing));
    assert_eq!(queue.get_all_work_items().expect("items").len(), 4);

    // RHEL-1 is still hidden for an hour; the rest are ready now.
    let mut ready = Vec::new();
    while let Some(item) = queue.pop_first_ready_work_item().expect("pop") {
        ready.push(item);
    }
    assert_eq!(ready.len(), 3);
    assert!(!ready.contains(&existing));
}

#[test]
fn dispatcher_applies_handler_outcomes() {
    let world = World::new();
    world.put_issue(issue("RHEL-9"));
    world.put_issue(ready_issue("RHEL-1", IssueStatus::InProgress));
    let queue = WorkQueue::open_in_memory().expect("queue");
    let settings = settings();
    queue
        .schedule_work_items([&WorkItem::issue("RHEL-9")], Duration::ZERO)
        .expect("schedule");
    queue
        .schedule_work_items([&WorkItem::issue("RHEL-1")], Duration::from_millis(1))
        .expect("schedule");
    std::thread::sleep(Duration::from_millis(5));

    let dispatcher = Dispatcher::new(&queue, world.services(), &settings);

    // RHEL-9 has nothing for automation: removed.
    let (item, result) = dispatcher.process_ready().expect("dispatch").expect("ready");
    assert_eq!(item, WorkItem::issue("RHEL-9"));
    assert!(result.is_removal());

    // RHEL-1 moves to Integration and is immediately ready again.
    let (item, result) = dispatcher.process_ready().expect("dispatch").expect("ready");
    assert_eq!(item, WorkItem::issue("RHEL-1"));
    assert_eq!(result.reschedule_in, 0);

    let remaining = queue.get_all_work_items().expect("items");
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains(&WorkItem::issue("RHEL-1")));
}

#[test]
fn dispatch_error_leaves_item_queued() {
    let world = World::new();
    let queue = WorkQueue::open_in_memory().expect("queue");
    let settings = settings();
    queue
        .schedule_work_items([&WorkItem::issue("RHEL-404")], Duration::ZERO)
        .expect("schedule");

    let dispatcher = Dispatcher::new(&queue, world.services(), &settings);
    assert!(dispatcher.process_ready().is_err());

    assert!(queue
        .get_all_work_items()
        .expect("items")
        .contains(&WorkItem::issue("RHEL-404")));
}
