use super::helpers::*;
use crate::compare::pipeline::CompareParams;
use crate::compare::service::ScreenOutcome;
use crate::compare::status::{ScreenRecord, ScreenStatus};
use crate::diff::Severity;

fn compared(outcome: &ScreenOutcome) -> &ScreenRecord {
    match outcome {
        ScreenOutcome::Compared(record) => record,
        ScreenOutcome::Failed(failure) => panic!("{} failed: {}", failure.image_name, failure.error),
    }
}

// ── Verdicts ────────────────────────────────────────────────

#[tokio::test]
async fn test_red_vs_blue_fails_with_one_major_region() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(100, 100, RED)).await;
    let shot = h.candidate("home.png", solid_png(100, 100, BLUE));

    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![shot], CompareParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let record = compared(&outcome.results[0]);
    assert_eq!(record.image_name, "home");
    assert_eq!(record.result_status, ScreenStatus::Fail);
    assert_eq!(record.diff_percent, 100);
    assert_eq!(record.heatmap_url.as_deref(), Some("https://heatmaps.test/home.png"));

    let regions = record.coordinates.as_ref().unwrap();
    assert_eq!(regions.boxes.len(), 1);
    assert_eq!(regions.boxes[0].severity, Severity::Major);
    assert_eq!(regions.counts.major, 1);

    let stored = h.service.store().get_record("p", "b1", "home").await.unwrap().unwrap();
    assert_eq!(stored.result_status, ScreenStatus::Fail);
    assert_eq!(stored.heatmap_url, record.heatmap_url);
    assert_eq!(stored.coordinates.unwrap().boxes.len(), 1);
}

#[tokio::test]
async fn test_identical_screens_pass() {
    let h = harness().await;
    let page = page_with_block(120, 80, (10, 10, 30, 20), BLUE);
    h.baseline("p", "login", page.clone()).await;
    let shot = h.candidate("login.jpeg", page);

    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![shot], CompareParams::default())
        .await
        .unwrap();

    let record = compared(&outcome.results[0]);
    assert_eq!(record.image_name, "login");
    assert_eq!(record.result_status, ScreenStatus::Pass);
    assert_eq!(record.diff_percent, 0);
    assert!(record.coordinates.as_ref().unwrap().boxes.is_empty());
}

#[tokio::test]
async fn test_min_score_moves_the_pass_line() {
    // A 40x40 block on a 200x200 page: 4% of the pixels and 4% of the area.
    let baseline = solid_png(200, 200, WHITE);
    let candidate = page_with_block(200, 200, (20, 20, 40, 40), RED);

    let h = harness().await;
    h.baseline("p", "cart", baseline).await;

    let cases = [(None, ScreenStatus::Pass), (Some(95), ScreenStatus::Pass), (Some(99), ScreenStatus::Fail)];
    for (min_score, expected) in cases {
        let shot = h.candidate("cart", candidate.clone());
        let params = h.service.params(None, min_score).unwrap();
        let outcome = h
            .service
            .compare_build("p", Some("b1"), vec![shot], params)
            .await
            .unwrap();
        let record = compared(&outcome.results[0]);
        assert_eq!(record.diff_percent, 4, "min_score {:?}", min_score);
        assert_eq!(record.result_status, expected, "min_score {:?}", min_score);
    }
}

#[tokio::test]
async fn test_rerun_overwrites_previous_verdict() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(60, 60, RED)).await;

    let first = h.candidate("home", solid_png(60, 60, BLUE));
    h.service
        .compare_build("p", Some("b1"), vec![first], CompareParams::default())
        .await
        .unwrap();
    let before = h.service.store().get_record("p", "b1", "home").await.unwrap().unwrap();
    assert_eq!(before.result_status, ScreenStatus::Fail);

    let fixed = h.candidate("home", solid_png(60, 60, RED));
    h.service
        .compare_build("p", Some("b1"), vec![fixed], CompareParams::default())
        .await
        .unwrap();
    let after = h.service.store().get_record("p", "b1", "home").await.unwrap().unwrap();
    assert_eq!(after.result_status, ScreenStatus::Pass);
    assert_eq!(after.diff_percent, 0);
    assert_eq!(h.service.store().list_records("p", "b1").await.unwrap().len(), 1);
}

// ── Build reconciliation ────────────────────────────────────

#[tokio::test]
async fn test_baseline_only_screen_is_on_hold() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(40, 40, RED)).await;
    h.baseline("p", "settings", solid_png(40, 40, RED)).await;
    let shot = h.candidate("home.png", solid_png(40, 40, RED));

    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![shot], CompareParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.on_hold, vec!["settings".to_string()]);
    let held = h.service.store().get_record("p", "b1", "settings").await.unwrap().unwrap();
    assert_eq!(held.result_status, ScreenStatus::OnHold);
    assert_eq!(held.diff_percent, 0);
    assert!(held.coordinates.is_none());
}

#[tokio::test]
async fn test_generated_build_id_and_name() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(30, 30, RED)).await;
    let shot = h.candidate("home.png", solid_png(30, 30, RED));

    let outcome = h
        .service
        .compare_build("p", None, vec![shot], CompareParams::default())
        .await
        .unwrap();

    assert!(outcome.build_id.ends_with("build"));
    let build = h.service.store().get_build("p", &outcome.build_id).await.unwrap().unwrap();
    assert_eq!(build.build_name.as_deref(), Some(outcome.build_id.as_str()));
}

#[tokio::test]
async fn test_duplicate_uploads_compare_once_with_last_source() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(30, 30, RED)).await;
    let stale = h.candidate("home.png", solid_png(30, 30, BLUE));
    let fresh = h.candidate("home.jpg", solid_png(30, 30, RED));

    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![stale, fresh], CompareParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(compared(&outcome.results[0]).result_status, ScreenStatus::Pass);
}

#[tokio::test]
async fn test_many_screens_run_through_the_pool() {
    let config = crate::config::CompareConfig {
        max_concurrent: 2,
        ..Default::default()
    };
    let h = harness_with(RecordingPublisher::default(), config).await;

    let mut shots = Vec::new();
    for i in 0..6 {
        let name = format!("screen{}", i);
        h.baseline("p", &name, solid_png(40, 40, RED)).await;
        let colour = if i % 2 == 0 { RED } else { BLUE };
        shots.push(h.candidate(&format!("{}.png", name), solid_png(40, 40, colour)));
    }

    let outcome = h
        .service
        .compare_build("p", Some("b1"), shots, CompareParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 6);
    for result in &outcome.results {
        let record = compared(result);
        let index: usize = record.image_name.trim_start_matches("screen").parse().unwrap();
        let expected = if index % 2 == 0 { ScreenStatus::Pass } else { ScreenStatus::Fail };
        assert_eq!(record.result_status, expected);
    }
    assert_eq!(h.publisher.published.lock().unwrap().len(), 6);
}

// ── Uploads and reports ─────────────────────────────────────

#[tokio::test]
async fn test_upload_then_report() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(30, 30, RED)).await;
    let shot = h.candidate("about.png", solid_png(30, 30, RED));

    let upload = h
        .service
        .upload_screenshots("p", Some("b1"), vec![shot])
        .await
        .unwrap();
    assert_eq!(upload.image_names, vec!["about".to_string()]);

    let report = h.service.build_report("p", "b1").await.unwrap();
    assert_eq!(report.summary.on_hold, 1);
    let entry = &report.entries[0];
    assert_eq!(entry.record.image_name, "about");
    assert_eq!(entry.screenshot_url.as_deref(), Some("mem://candidate/about.png"));
    assert!(entry.reference_url.is_none());
}

#[tokio::test]
async fn test_register_baselines_for_a_build_holds_new_screens() {
    let h = harness().await;
    h.source.insert("mem://baseline/home", solid_png(30, 30, RED));
    let baselines = h
        .service
        .register_baselines(
            "p",
            Some("b1"),
            vec![crate::compare::service::BaselineUpload {
                screen_name: " home ".into(),
                source: "mem://baseline/home".into(),
            }],
        )
        .await
        .unwrap();
    assert_eq!(baselines[0].screen_name, "home");

    let record = h.service.store().get_record("p", "b1", "home").await.unwrap().unwrap();
    assert_eq!(record.result_status, ScreenStatus::OnHold);
}

#[tokio::test]
async fn test_dotted_baseline_name_matches_its_screenshot() {
    let h = harness().await;
    h.baseline("p", "checkout.v2", solid_png(30, 30, RED)).await;
    let shot = h.candidate("checkout.v2.png", solid_png(30, 30, RED));

    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![shot], CompareParams::default())
        .await
        .unwrap();

    let names: Vec<String> = h
        .service
        .store()
        .list_baselines("p")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.screen_name)
        .collect();
    assert_eq!(names, vec!["checkout.v2".to_string()]);

    let record = compared(&outcome.results[0]);
    assert_eq!(record.image_name, "checkout.v2");
    assert_eq!(record.result_status, ScreenStatus::Pass);
    assert!(outcome.on_hold.is_empty());
}

// ── Builds and baselines ────────────────────────────────────

#[tokio::test]
async fn test_created_builds_are_listed_with_their_names() {
    let h = harness().await;
    let named = h.service.create_build("p", Some("release 1.4")).await.unwrap();
    let unnamed = h.service.create_build("p", None).await.unwrap();

    assert_ne!(named.build_id, unnamed.build_id);
    assert!(named.build_id.ends_with("build"));
    assert_eq!(named.build_name.as_deref(), Some("release 1.4"));
    assert_eq!(unnamed.build_name.as_deref(), Some(unnamed.build_id.as_str()));

    let builds = h.service.list_builds("p").await.unwrap();
    assert_eq!(builds.len(), 2);
    assert!(h.service.list_builds("other").await.unwrap().is_empty());

    // Comparing into a created build keeps its name.
    h.baseline("p", "home", solid_png(20, 20, RED)).await;
    let shot = h.candidate("home.png", solid_png(20, 20, RED));
    h.service
        .compare_build("p", Some(&named.build_id), vec![shot], CompareParams::default())
        .await
        .unwrap();
    let report = h.service.build_report("p", &named.build_id).await.unwrap();
    assert_eq!(report.build_name.as_deref(), Some("release 1.4"));
}

#[tokio::test]
async fn test_removing_all_baselines_turns_screens_into_errors() {
    let h = harness().await;
    h.baseline("p", "home", solid_png(20, 20, RED)).await;
    h.baseline("p", "cart", solid_png(20, 20, RED)).await;
    h.baseline("q", "home", solid_png(20, 20, RED)).await;

    assert_eq!(h.service.remove_all_baselines("p").await.unwrap(), 2);
    assert_eq!(h.service.store().list_baselines("q").await.unwrap().len(), 1);

    let shot = h.candidate("home.png", solid_png(20, 20, RED));
    let outcome = h
        .service
        .compare_build("p", Some("b1"), vec![shot], CompareParams::default())
        .await
        .unwrap();
    assert!(matches!(outcome.results[0], ScreenOutcome::Failed(_)));
    assert!(outcome.on_hold.is_empty());
}
