mod support;

use std::collections::HashSet;
use std::time::Duration;

use instat_core::{InstaClient, ListKind, Session, Termination};
use support::{FakeBrowser, FakeNode, VirtualList, FOLLOWERS};

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user_{i:05}")).collect()
}

async fn logged_in(client: &InstaClient, browser: &FakeBrowser) -> Session {
    client
        .authenticate_with(browser.boxed(), "alice", "secret", None)
        .await
        .expect("fake login succeeds")
}

fn with_list(browser: &FakeBrowser, label: &str, items: Vec<String>, window: usize, step: usize) {
    let mut state = browser.state();
    let open_list = support::effect(|state| state.list.open = true);
    state.set_nodes(FOLLOWERS, vec![FakeNode::with_text(label).on_click(open_list)]);
    state.list = VirtualList::new(items, window, step);
}

#[tokio::test(start_paused = true)]
async fn collects_every_item_of_a_virtualized_list() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "30 followers", names(30), 6, 3);
    let mut session = logged_in(&client, &browser).await;

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Followers, None)
        .await;

    assert_eq!(outcome.termination, Termination::TargetReached);
    assert_eq!(outcome.expected, Some(30));
    let expected: HashSet<String> = names(30).into_iter().collect();
    let collected: HashSet<String> = outcome.handles.iter().map(|h| h.to_string()).collect();
    assert_eq!(collected, expected);
    assert!(browser.state().list.window * 2 < 30);
    assert!(browser
        .state()
        .actions
        .contains(&"navigate:https://www.instagram.com/bob/".to_string()));
    assert!(browser.state().clicked("Close"));
    assert_eq!(outcome.metrics.surfaces_opened, 1);
    assert_eq!(outcome.metrics.handles_collected, 30);
}

#[tokio::test(start_paused = true)]
async fn collected_set_never_shrinks_across_refreshes() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    // The count promises more than the list holds, so the run only ends at
    // the refresh ceiling; every refresh scrolls the list back to the top.
    with_list(&browser, "50 followers", names(20), 4, 2);
    let mut session = logged_in(&client, &browser).await;

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Followers, None)
        .await;

    assert_eq!(outcome.termination, Termination::RefreshCeilingReached);
    assert_eq!(outcome.refreshes, 3);
    assert_eq!(outcome.handles.len(), 20);
    assert_eq!(outcome.metrics.handles_collected, 20);
}

#[tokio::test(start_paused = true)]
async fn stalled_list_refreshes_up_to_the_ceiling() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "12 followers", Vec::new(), 5, 5);
    let mut session = logged_in(&client, &browser).await;

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Followers, None)
        .await;

    assert!(outcome.handles.is_empty());
    assert_eq!(outcome.termination, Termination::RefreshCeilingReached);
    assert_eq!(outcome.refreshes, 3);
    assert_eq!(browser.state().refreshes, 3);
    // Three stale rounds are tolerated, the fourth escalates.
    assert_eq!(outcome.rounds, 3 * 4);
    assert_eq!(outcome.metrics.stale_rounds, 12);
}

#[tokio::test(start_paused = true)]
async fn budget_stops_collection_between_rounds() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "100K followers", names(100_000), 5, 5);
    let mut session = logged_in(&client, &browser).await;
    let budget = Duration::from_secs(10);

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Followers, Some(budget))
        .await;

    assert_eq!(outcome.termination, Termination::BudgetExceeded);
    assert_eq!(outcome.expected, Some(100_000));
    assert!(outcome.elapsed > budget);
    assert!(outcome.elapsed < budget + Duration::from_secs(3));
    // Every round scrolls `max_attempts` times with `pause_time` between passes.
    let collection = &client.config().collection;
    let round_cost = collection.pause_time() * collection.max_attempts as u32;
    let max_rounds = budget.as_millis().div_ceil(round_cost.as_millis()) as usize + 1;
    assert!(outcome.rounds >= 1);
    assert!(outcome.rounds <= max_rounds, "{} rounds exceed {max_rounds}", outcome.rounds);
    assert!(!outcome.handles.is_empty());
    assert!(outcome.handles.len() < 100_000);
}

#[tokio::test(start_paused = true)]
async fn repeated_collection_of_a_static_list_is_stable() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "12 followers", names(12), 6, 3);
    let mut session = logged_in(&client, &browser).await;

    let first = client.followers(&mut session, "bob", None).await;
    let second = client.followers(&mut session, "bob", None).await;

    assert_eq!(first.len(), 12);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn unreadable_count_collects_without_target() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "Followers", names(8), 4, 2);
    let mut session = logged_in(&client, &browser).await;

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Followers, None)
        .await;

    assert_eq!(outcome.expected, None);
    assert_eq!(outcome.termination, Termination::RefreshCeilingReached);
    assert_eq!(outcome.handles.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn missing_entry_link_yields_empty_result() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    let mut session = logged_in(&client, &browser).await;
    browser.state().remove_nodes(support::FOLLOWING);

    let outcome = client
        .collect_detailed(&mut session, "bob", ListKind::Following, None)
        .await;

    assert!(outcome.handles.is_empty());
    assert_eq!(outcome.termination, Termination::SurfaceUnavailable);
    assert_eq!(outcome.rounds, 0);
}

#[tokio::test(start_paused = true)]
async fn closed_session_returns_nothing() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    with_list(&browser, "12 followers", names(12), 6, 3);
    let mut session = logged_in(&client, &browser).await;

    session.close().await.unwrap();
    assert!(!session.is_live());
    assert!(browser.state().closed);

    let navigations_before = browser.state().actions.len();
    let handles = client.following(&mut session, "bob", None).await;
    assert!(handles.is_empty());
    assert_eq!(browser.state().actions.len(), navigations_before);
}

#[tokio::test(start_paused = true)]
async fn teardown_closes_the_browser() {
    let diagnostics = tempfile::tempdir().unwrap();
    let client = InstaClient::new(support::test_config(diagnostics.path())).unwrap();
    let browser = FakeBrowser::instagram();
    let session = logged_in(&client, &browser).await;

    client.teardown(session).await;

    assert!(browser.state().closed);
}
