//! Scan orchestrator tests against the scripted portal in `common`.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use aprscan::checkpoint::{Checkpoint, SessionKey};
use aprscan::config::AppConfig;
use aprscan::identifier::{normalize_column, normalize_str, CellValue, ProjectId};
use aprscan::logger::ScanLogger;
use aprscan::portal::{DriverError, Locator};
use aprscan::record::{Credentials, Region};
use aprscan::scan::{FixedClock, QueryOutcome, ScanError, ScanRequest, ScanState, Scanner, NONE_FOUND_MESSAGE};

use common::{fast_config, grid_row, shared_portal, Action, FakeLauncher, SharedPortal};

fn run_clock() -> FixedClock {
    FixedClock(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(9, 30, 0).unwrap())
}

fn ids(raw: &[&str]) -> Vec<ProjectId> {
    raw.iter().map(|r| normalize_str(r).unwrap()).collect()
}

fn request(identifiers: Vec<ProjectId>) -> ScanRequest {
    ScanRequest::new(Credentials::new("operator", "hunter2"), Region::Niteroi, identifiers)
}

fn scanner(config: &AppConfig, portal: &SharedPortal) -> Scanner<FakeLauncher> {
    Scanner::new(FakeLauncher(Arc::clone(portal)), config.clone(), ScanLogger::silent()).with_clock(run_clock())
}

#[test]
fn test_end_to_end_query_order_and_stamps() {
    let config = fast_config();
    let portal = shared_portal(&config);
    {
        let mut p = portal.lock().unwrap();
        p.rows.insert(
            "0000012345".to_string(),
            vec![grid_row("20/01/2025 10:15:00", "1.234", "OS-1", "ACME LTDA", "Aprovado")],
        );
        p.rows.insert(
            "0000000678".to_string(),
            vec![grid_row("01/01/2025 08:00:00", "5.678", "OS-2", "ACME LTDA", "Aprovado")],
        );
    }

    let cells = vec![CellValue::Int(12345), CellValue::from("678.0")];
    let mut scanner = scanner(&config, &portal);
    let outcome = scanner.run(&request(normalize_column(&cells))).unwrap();

    let p = portal.lock().unwrap();
    assert_eq!(p.queries(), vec!["0000012345", "0000000678"]);
    assert_eq!(p.typed_filters(), vec!["Rio de Janeiro", "Niterói"]);
    assert_eq!(p.actions.first(), Some(&Action::Navigate(config.portal.url.clone())));

    assert_eq!(outcome.rows.len(), 1);
    let row = &outcome.rows[0];
    assert_eq!(row.record_id, "1234");
    assert_eq!(row.created_at, "20/01/2025 10:15:00");
    assert_eq!(row.validity_end, "06/03/2025");
    assert_eq!(row.retrieved_at, "01/03/2025 09:30");
    assert_eq!(outcome.queried_count(), 2);
    assert_eq!(outcome.skipped_count(), 0);
    assert_eq!(scanner.state(), ScanState::Completed);
}

#[test]
fn test_login_types_credentials_and_script_clicks_submit() {
    let config = fast_config();
    let portal = shared_portal(&config);
    scanner(&config, &portal).run(&request(ids(&["1"]))).unwrap();

    let p = portal.lock().unwrap();
    assert!(p.actions.contains(&Action::TypeInto(
        Locator::id(&config.selectors.username_id),
        "operator".to_string()
    )));
    assert!(p.actions.contains(&Action::TypeInto(
        Locator::id(&config.selectors.password_id),
        "hunter2".to_string()
    )));
    assert!(p.actions.contains(&Action::ScriptClick(Locator::xpath(&config.selectors.submit_xpath))));
}

#[test]
fn test_state_sequence() {
    let config = fast_config();
    let portal = shared_portal(&config);
    let mut scanner = scanner(&config, &portal);
    scanner.run(&request(ids(&["1", "2"]))).unwrap();

    assert_eq!(
        scanner.states(),
        &[
            ScanState::Idle,
            ScanState::Starting,
            ScanState::Authenticating,
            ScanState::FilteringRegion,
            ScanState::QueryingIdentifier(0),
            ScanState::QueryingIdentifier(1),
            ScanState::Aggregating,
            ScanState::Completed,
        ]
    );
}

#[test]
fn test_partial_failure_skips_and_continues() {
    let config = fast_config();
    let portal = shared_portal(&config);
    {
        let mut p = portal.lock().unwrap();
        p.stuck_queries.insert("0000000002".to_string());
        for id in ["0000000001", "0000000002", "0000000003"] {
            p.rows.insert(
                id.to_string(),
                vec![grid_row("20/01/2025", &format!("9{}", &id[9..]), "OS", "ACME", "Aprovado")],
            );
        }
    }

    let mut scanner = scanner(&config, &portal);
    let outcome = scanner.run(&request(ids(&["1", "2", "3"]))).unwrap();

    assert_eq!(portal.lock().unwrap().queries().len(), 3);
    assert_eq!(outcome.reports.len(), 3);
    assert!(matches!(
        &outcome.reports[1].outcome,
        QueryOutcome::Skipped {
            reason: DriverError::ElementTimeout { .. }
        }
    ));
    let found: Vec<&str> = outcome.rows.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(found, vec!["91", "93"]);
    assert_eq!(outcome.skipped_count(), 1);
    assert_eq!(scanner.state(), ScanState::Completed);
}

#[test]
fn test_extraction_failure_skips_identifier() {
    let config = fast_config();
    let portal = shared_portal(&config);
    {
        let mut p = portal.lock().unwrap();
        p.broken_extraction.insert("0000000002".to_string());
        for id in ["0000000001", "0000000002", "0000000003"] {
            p.rows.insert(
                id.to_string(),
                vec![grid_row("20/01/2025", &format!("9{}", &id[9..]), "OS", "ACME", "Aprovado")],
            );
        }
    }

    let mut scanner = scanner(&config, &portal);
    let outcome = scanner.run(&request(ids(&["1", "2", "3"]))).unwrap();

    assert_eq!(portal.lock().unwrap().queries().len(), 3);
    assert!(matches!(
        &outcome.reports[1].outcome,
        QueryOutcome::Skipped {
            reason: DriverError::Script(_)
        }
    ));
    let found: Vec<&str> = outcome.rows.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(found, vec!["91", "93"]);
    assert_eq!(scanner.state(), ScanState::Completed);
}

#[test]
fn test_unreadable_rows_are_skipped() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal.lock().unwrap().rows.insert(
        "0000000001".to_string(),
        vec![
            r#"{"createdAt":"20/01/2025","id":"1","companyName":"ACME","statusName":"Aprovado"}"#.to_string(),
            grid_row("20/01/2025", "2", "OS-2", "ACME", "Aprovado"),
            grid_row("sem data", "3", "OS-3", "ACME", "Aprovado"),
        ],
    );

    let outcome = scanner(&config, &portal).run(&request(ids(&["1"]))).unwrap();
    match &outcome.reports[0].outcome {
        QueryOutcome::Matched {
            rows,
            inspected,
            inactive,
            skipped_rows,
        } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].record_id, "2");
            assert_eq!(*inspected, 2);
            assert_eq!(*inactive, 1);
            assert_eq!(skipped_rows.len(), 1);
        }
        other => panic!("expected Matched, got {:?}", other),
    }
}

#[test]
fn test_empty_result_ends_with_none_found() {
    let config = fast_config();
    let portal = shared_portal(&config);
    let logger = ScanLogger::silent();
    let mut scanner =
        Scanner::new(FakeLauncher(Arc::clone(&portal)), config.clone(), logger.clone()).with_clock(run_clock());

    let outcome = scanner.run(&request(ids(&["1", "2"]))).unwrap();
    assert!(outcome.rows.is_empty());
    assert_eq!(logger.messages().last().map(String::as_str), Some(NONE_FOUND_MESSAGE));
}

#[test]
fn test_progress_events_narrate_the_scan() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal.lock().unwrap().rows.insert(
        "0000000007".to_string(),
        vec![grid_row("20/01/2025", "77", "OS", "ACME", "Aprovado")],
    );
    let logger = ScanLogger::silent();
    Scanner::new(FakeLauncher(Arc::clone(&portal)), config.clone(), logger.clone())
        .with_clock(run_clock())
        .run(&request(ids(&["7"])))
        .unwrap();

    let messages = logger.messages();
    assert!(messages.iter().any(|m| m == "Logging in..."));
    assert!(messages.iter().any(|m| m == "Filters: Niterói"));
    assert!(messages.iter().any(|m| m == "Querying project: 0000000007"));
    assert!(messages.iter().any(|m| m == "   ID 77: ACTIVE (expires 06/03/2025)"));
    assert_eq!(messages.last().map(String::as_str), Some("Done: 1 active."));
    assert!(!messages.iter().any(|m| m.contains("hunter2")));
}

#[test]
fn test_validation_happens_before_launch() {
    let config = fast_config();
    let portal = shared_portal(&config);

    let err = scanner(&config, &portal).run(&request(vec![])).unwrap_err();
    assert!(matches!(err, ScanError::Validation(_)));

    let no_secret = ScanRequest::new(Credentials::new("operator", ""), Region::Niteroi, ids(&["1"]));
    let err = scanner(&config, &portal).run(&no_secret).unwrap_err();
    assert!(matches!(err, ScanError::Validation(_)));

    assert_eq!(portal.lock().unwrap().launches, 0);
}

#[test]
fn test_engine_unavailable_is_fatal() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal.lock().unwrap().fail_launch = true;

    let mut scanner = scanner(&config, &portal);
    let err = scanner.run(&request(ids(&["1"]))).unwrap_err();
    assert!(matches!(err, ScanError::EngineUnavailable(_)));
    assert_eq!(scanner.state(), ScanState::Failed);
    assert_eq!(portal.lock().unwrap().launches, 1);
}

#[test]
fn test_unreachable_portal_tears_down() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal.lock().unwrap().fail_navigation = true;

    let mut scanner = scanner(&config, &portal);
    let err = scanner.run(&request(ids(&["1"]))).unwrap_err();
    assert!(matches!(err, ScanError::PortalUnreachable(_)));
    assert_eq!(scanner.state(), ScanState::Failed);

    let p = portal.lock().unwrap();
    assert_eq!(p.stops, 1);
    assert!(p.queries().is_empty());
}

#[test]
fn test_region_filter_failure_is_fatal() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal
        .lock()
        .unwrap()
        .missing
        .insert(Locator::id(&config.selectors.distributor_field_id));
    let logger = ScanLogger::silent();

    let mut scanner =
        Scanner::new(FakeLauncher(Arc::clone(&portal)), config.clone(), logger.clone()).with_clock(run_clock());
    let err = scanner.run(&request(ids(&["1", "2"]))).unwrap_err();

    assert!(matches!(err, ScanError::Driver(DriverError::ElementTimeout { .. })));
    assert_eq!(scanner.state(), ScanState::Failed);
    assert!(scanner.states().contains(&ScanState::FilteringRegion));
    assert!(!scanner.states().contains(&ScanState::QueryingIdentifier(0)));

    let p = portal.lock().unwrap();
    assert_eq!(p.stops, 1);
    assert!(p.queries().is_empty());
    let errors = logger.messages().into_iter().filter(|m| m.starts_with("ERROR: ")).count();
    assert_eq!(errors, 1);
}

#[test]
fn test_login_verification_is_opt_in() {
    let mut config = fast_config();
    config.portal.verify_login = true;
    config.selectors.logged_in_marker_id = "user-menu".to_string();
    let portal = shared_portal(&config);
    portal.lock().unwrap().missing.insert(Locator::id("user-menu"));

    let mut scanner = scanner(&config, &portal);
    let err = scanner.run(&request(ids(&["1"]))).unwrap_err();
    assert!(matches!(err, ScanError::AuthenticationFailed(DriverError::ElementTimeout { .. })));
    assert_eq!(portal.lock().unwrap().stops, 1);

    // Same portal, verification off: the missing marker goes unnoticed.
    config.portal.verify_login = false;
    let portal = shared_portal(&config);
    portal.lock().unwrap().missing.insert(Locator::id("user-menu"));
    assert!(self::scanner(&config, &portal).run(&request(ids(&["1"]))).is_ok());
}

#[test]
fn test_teardown_after_success() {
    let config = fast_config();
    let portal = shared_portal(&config);
    scanner(&config, &portal).run(&request(ids(&["1"]))).unwrap();

    let p = portal.lock().unwrap();
    assert_eq!(p.stops, 1);
    assert_eq!(p.actions.last(), Some(&Action::Stop));
}

#[test]
fn test_interrupt_saves_checkpoint_and_stops() {
    let config = fast_config();
    let portal = shared_portal(&config);
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(true));

    let mut scanner = scanner(&config, &portal)
        .with_checkpoint(dir.path(), None)
        .with_interrupt(flag);
    let err = scanner.run(&request(ids(&["1", "2"]))).unwrap_err();

    assert!(matches!(err, ScanError::Interrupted { completed: 0, total: 2 }));
    assert_eq!(scanner.state(), ScanState::Interrupted);
    assert_eq!(portal.lock().unwrap().stops, 1);
    assert!(portal.lock().unwrap().queries().is_empty());
    assert!(Checkpoint::exists(dir.path()));
}

#[test]
fn test_resume_skips_completed_identifiers() {
    let config = fast_config();
    let portal = shared_portal(&config);
    portal.lock().unwrap().rows.insert(
        "0000000002".to_string(),
        vec![grid_row("25/02/2025", "22", "OS", "ACME", "Aprovado")],
    );
    let dir = TempDir::new().unwrap();
    let list = ids(&["1", "2"]);
    let req = request(list.clone());

    let mut previous = Checkpoint::new(SessionKey::new("operator", Region::Niteroi, &list));
    let restored = aprscan::record::ResultRow {
        order_number: "OS".to_string(),
        record_id: "11".to_string(),
        company_name: "ACME".to_string(),
        created_at: "20/01/2025".to_string(),
        status_name: "Aprovado".to_string(),
        validity_end: "06/03/2025".to_string(),
        retrieved_at: "28/02/2025 17:00".to_string(),
    };
    previous.mark_completed(&list[0], std::slice::from_ref(&restored));
    previous.save(dir.path()).unwrap();
    let loaded = Checkpoint::load(dir.path()).unwrap();

    let outcome = scanner(&config, &portal)
        .with_checkpoint(dir.path(), Some(loaded))
        .run(&req)
        .unwrap();

    assert_eq!(portal.lock().unwrap().queries(), vec!["0000000002"]);
    assert_eq!(outcome.resumed, 1);
    let found: Vec<&str> = outcome.rows.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(found, vec!["11", "22"]);
    // Completed scans remove their checkpoint.
    assert!(!Checkpoint::exists(dir.path()));
}

#[test]
fn test_incompatible_checkpoint_is_ignored() {
    let config = fast_config();
    let portal = shared_portal(&config);
    let dir = TempDir::new().unwrap();
    let list = ids(&["1"]);

    let mut other = Checkpoint::new(SessionKey::new("someone-else", Region::Lagos, &list));
    other.mark_completed(&list[0], &[]);

    let outcome = scanner(&config, &portal)
        .with_checkpoint(dir.path(), Some(other))
        .run(&request(list))
        .unwrap();
    assert_eq!(outcome.resumed, 0);
    assert_eq!(portal.lock().unwrap().queries(), vec!["0000000001"]);
}

#[test]
fn test_interrupt_during_login_skips_filters() {
    let config = fast_config();
    let portal = shared_portal(&config);
    let flag = Arc::new(AtomicBool::new(false));
    portal.lock().unwrap().interrupt_on = Some(("operator".to_string(), Arc::clone(&flag)));

    let mut scanner = scanner(&config, &portal).with_interrupt(flag);
    let err = scanner.run(&request(ids(&["1", "2"]))).unwrap_err();

    assert!(matches!(err, ScanError::Interrupted { completed: 0, total: 2 }));
    assert_eq!(
        &scanner.states()[scanner.states().len() - 2..],
        &[ScanState::Authenticating, ScanState::Interrupted]
    );
    let p = portal.lock().unwrap();
    assert!(p.typed_filters().is_empty());
    assert!(p.queries().is_empty());
    assert_eq!(p.stops, 1);
}

#[test]
fn test_browser_killed_by_interrupt_keeps_identifier_pending() {
    let config = fast_config();
    let dir = TempDir::new().unwrap();
    let list = ids(&["1", "2", "3"]);
    let flag = Arc::new(AtomicBool::new(false));

    // Ctrl-C reaches Chrome too: it dies while "2" is being queried.
    let portal = shared_portal(&config);
    {
        let mut p = portal.lock().unwrap();
        p.crash_on_query = Some("0000000002".to_string());
        p.interrupt_on = Some(("0000000002".to_string(), Arc::clone(&flag)));
    }
    let mut first = scanner(&config, &portal)
        .with_checkpoint(dir.path(), None)
        .with_interrupt(flag);
    let err = first.run(&request(list.clone())).unwrap_err();

    assert!(matches!(err, ScanError::Interrupted { completed: 1, total: 3 }));
    assert_eq!(first.state(), ScanState::Interrupted);
    assert_eq!(portal.lock().unwrap().stops, 1);
    let saved = Checkpoint::load(dir.path()).unwrap();
    assert_eq!(saved.completed, vec!["0000000001".to_string()]);

    let portal = shared_portal(&config);
    scanner(&config, &portal)
        .with_checkpoint(dir.path(), Some(saved))
        .run(&request(list))
        .unwrap();
    assert_eq!(portal.lock().unwrap().queries(), vec!["0000000002", "0000000003"]);
}

#[test]
fn test_dead_browser_fails_the_scan() {
    let config = fast_config();
    let dir = TempDir::new().unwrap();
    let portal = shared_portal(&config);
    portal.lock().unwrap().crash_on_query = Some("0000000002".to_string());

    let mut scanner = scanner(&config, &portal).with_checkpoint(dir.path(), None);
    let err = scanner.run(&request(ids(&["1", "2", "3"]))).unwrap_err();

    assert!(matches!(err, ScanError::Driver(DriverError::SessionClosed)));
    assert_eq!(scanner.state(), ScanState::Failed);
    let p = portal.lock().unwrap();
    assert_eq!(p.queries(), vec!["0000000001", "0000000002"]);
    assert_eq!(p.stops, 1);

    // The failed scan keeps its checkpoint, without the identifier that was in flight.
    let saved = Checkpoint::load(dir.path()).unwrap();
    assert_eq!(saved.completed, vec!["0000000001".to_string()]);
}

#[test]
fn test_skipped_identifier_is_retried_on_resume() {
    let config = fast_config();
    let dir = TempDir::new().unwrap();
    let list = ids(&["1", "2", "3", "4"]);
    let flag = Arc::new(AtomicBool::new(false));

    let portal = shared_portal(&config);
    {
        let mut p = portal.lock().unwrap();
        p.stuck_queries.insert("0000000002".to_string());
        p.interrupt_on = Some(("0000000003".to_string(), Arc::clone(&flag)));
    }
    let err = scanner(&config, &portal)
        .with_checkpoint(dir.path(), None)
        .with_interrupt(flag)
        .run(&request(list.clone()))
        .unwrap_err();

    assert!(matches!(err, ScanError::Interrupted { completed: 3, total: 4 }));
    let saved = Checkpoint::load(dir.path()).unwrap();
    assert_eq!(saved.completed, vec!["0000000001".to_string(), "0000000003".to_string()]);

    let portal = shared_portal(&config);
    let outcome = scanner(&config, &portal)
        .with_checkpoint(dir.path(), Some(saved))
        .run(&request(list))
        .unwrap();
    assert_eq!(portal.lock().unwrap().queries(), vec!["0000000002", "0000000004"]);
    assert_eq!(outcome.resumed, 2);
}
