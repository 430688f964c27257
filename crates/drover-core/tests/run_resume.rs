//! End-to-end runs against the simulated page, including resume across
//! a simulated process death and durability through a real SQLite
//! store reopen.

use std::sync::Arc;
use std::time::Duration;

use drover_core::adapter::{PageAction, SimElement, SimulatedPage};
use drover_core::config::Config;
use drover_core::engine::{Engine, EngineConfig, EngineStatus};
use drover_core::script::parse_script;
use drover_core::session::{resume_session, SessionStart};
use drover_core::store::{MemoryStore, SqliteStore, Store};

fn test_config() -> EngineConfig {
    EngineConfig {
        default_tries: 15,
        settle_delay: Duration::from_millis(650),
        retry_delay: Duration::from_millis(500),
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_takes_exactly_the_scheduled_delays() {
    let page = SimulatedPage::new();
    page.insert(SimElement::new("#buy").appears_after(3));
    page.insert(SimElement::new(".receipt").text("Thanks"));
    let page = Arc::new(page);
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store, page.clone(), test_config());

    engine
        .submit("click #buy\nwait 500\nfind .receipt with Thanks")
        .await
        .expect("submit");

    let started = tokio::time::Instant::now();
    engine.run().await.expect("run");

    // click: 3 misses at 500ms each, then the hit settles for 650ms;
    // wait: 500ms plus its 650ms settle; find: hits at once, 650ms.
    assert_eq!(started.elapsed(), Duration::from_millis(3950));
    assert_eq!(page.actions(), vec![PageAction::Clicked("#buy".into())]);
    assert_eq!(engine.status(), EngineStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn completed_steps_never_rerun_after_process_death() {
    // Simulate a run killed by a navigation: the persisted queue has
    // the visit already done, the click not yet started.
    let store = Arc::new(MemoryStore::new());
    let mut queue = parse_script("visit /products\nclick #add");
    queue.items[0].done = true;
    store.save_queue(&queue).await.expect("seed");

    let page = SimulatedPage::new();
    page.insert(SimElement::new("#add"));
    let page = Arc::new(page);

    let start = resume_session(store, page.clone(), &Config::default())
        .await
        .expect("bootstrap");
    let SessionStart::Resumed(engine) = start else {
        panic!("expected a resumed engine");
    };
    engine.run().await.expect("run");

    // The visit must not fire again: exactly one action, the click.
    assert_eq!(page.actions(), vec![PageAction::Clicked("#add".into())]);
}

#[tokio::test(start_paused = true)]
async fn run_survives_store_reopen() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("drover.db");

    {
        let store = SqliteStore::open(&path).await.expect("open");
        let mut queue = parse_script("name checkout\nclick #pay\nfind .ok");
        queue.items[0].done = true;
        queue.items[1].done = true;
        queue.items[1].attempts = 2;
        store.save_queue(&queue).await.expect("seed");
        store.shutdown();
    }

    let store = Arc::new(SqliteStore::open(&path).await.expect("reopen"));
    let page = SimulatedPage::new();
    page.insert(SimElement::new(".ok"));
    let page = Arc::new(page);

    let start = resume_session(store.clone(), page.clone(), &Config::default())
        .await
        .expect("bootstrap");
    let SessionStart::Resumed(engine) = start else {
        panic!("expected a resumed engine");
    };
    engine.run().await.expect("run");

    assert!(page.actions().is_empty(), "done steps stay done");
    assert!(store.load_queue().await.expect("load").is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_report_cites_nearest_name_step() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        store,
        Arc::new(SimulatedPage::new()),
        EngineConfig {
            default_tries: 2,
            ..test_config()
        },
    );

    engine
        .submit("name login\nfind .session\nname checkout\nclick #pay\nclick #confirm")
        .await
        .expect("submit");

    // .session never appears; the failure is two budget-exhausting
    // retries into the queue, one line past "login".
    let err = engine.run().await.expect_err("exhausted");
    assert_eq!(
        err.to_string(),
        "Run error: Unable to complete: find .session. Error in login line 1"
    );
}

#[tokio::test(start_paused = true)]
async fn pause_during_intervention_ends_the_run() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(SimulatedPage::new()),
        test_config(),
    ));

    engine
        .submit("intervention swap the test SIM card\nclick #never")
        .await
        .expect("submit");

    let mut status = engine.subscribe();
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    status
        .wait_for(|s| matches!(s, EngineStatus::Blocked { .. }))
        .await
        .expect("blocked");

    // The operator gives up instead of resuming.
    engine.pause().await.expect("pause");
    runner.await.expect("join").expect("clean end");
    assert!(store.load_queue().await.expect("load").is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetched_script_runs_with_fresh_bookkeeping() {
    let page = SimulatedPage::new();
    page.insert(SimElement::new("#step1"));
    page.insert(SimElement::new("#step2"));
    page.set_fetched_script("click #step1\nclick #step2\n");
    let page = Arc::new(page);
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), page.clone(), test_config());

    engine.submit("test").await.expect("submit");
    engine.run().await.expect("run");

    assert_eq!(
        page.actions(),
        vec![
            PageAction::Clicked("#step1".into()),
            PageAction::Clicked("#step2".into()),
        ]
    );
}
