//! Session bootstrap
//!
//! Decides, at process start, whether a previously persisted queue
//! should resume. Three answers:
//!
//! - [`SessionStart::Idle`]: no pending work (leftover fully-done
//!   queues are swept away here)
//! - [`SessionStart::Deferred`]: pending work exists but resuming now
//!   would misbehave; leave the queue untouched for a later session
//! - [`SessionStart::Resumed`]: an engine, ready to `run()`
//!
//! The only deferral rule today is the resize one: a queue containing
//! a `resize` step only resumes in a window spawned by a controlling
//! parent, because a stand-alone window cannot honor resize requests.
//!
//! Operator-tunable overrides persisted in the store (`default_tries`,
//! `settle_delay_ms`, `retry_delay_ms`) are applied here, over the
//! file configuration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapter::PageAdapter;
use crate::config::Config;
use crate::engine::{Engine, EngineConfig};
use crate::error::Result;
use crate::store::Store;

/// Outcome of the resume decision.
pub enum SessionStart {
    /// Nothing to resume.
    Idle,
    /// Pending work exists but must wait for a capable window.
    Deferred,
    /// Resume now: run this engine.
    Resumed(Engine),
}

/// Inspect the durable store and decide whether to resume.
///
/// # Errors
/// Returns storage errors; a malformed stored setting is ignored with
/// a warning rather than blocking startup.
pub async fn resume_session(
    store: Arc<dyn Store>,
    adapter: Arc<dyn PageAdapter>,
    config: &Config,
) -> Result<SessionStart> {
    let queue = store.load_queue().await?;

    if queue.is_empty() {
        return Ok(SessionStart::Idle);
    }
    if !queue.is_active() {
        // A fully-done queue is a finished run the previous process
        // never got to sweep.
        info!("clearing leftover completed queue");
        store.clear_queue().await?;
        return Ok(SessionStart::Idle);
    }

    if config.resume.defer_for_resize && queue.has_resize() && !adapter.has_parent_window() {
        info!("deferring resume: queue resizes but window has no controlling parent");
        return Ok(SessionStart::Deferred);
    }

    let engine_config = effective_config(store.as_ref(), config).await?;
    info!(
        pending = queue.items.iter().filter(|i| !i.done).count(),
        "resuming persisted queue"
    );
    Ok(SessionStart::Resumed(Engine::new(
        store,
        adapter,
        engine_config,
    )))
}

/// File configuration with stored setting overrides applied.
async fn effective_config(store: &dyn Store, config: &Config) -> Result<EngineConfig> {
    let mut engine_config = config.run.engine_config();

    if let Some(tries) = setting(store, "default_tries").await? {
        if tries >= 1 {
            engine_config.default_tries = tries;
        } else {
            warn!("ignoring stored default_tries override of 0");
        }
    }
    if let Some(ms) = setting(store, "settle_delay_ms").await? {
        engine_config.settle_delay = std::time::Duration::from_millis(ms);
    }
    if let Some(ms) = setting(store, "retry_delay_ms").await? {
        engine_config.retry_delay = std::time::Duration::from_millis(ms);
    }

    Ok(engine_config)
}

async fn setting<T: std::str::FromStr>(store: &dyn Store, name: &str) -> Result<Option<T>> {
    let Some(text) = store.get_setting(name).await? else {
        return Ok(None);
    };
    match text.parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            warn!(name, value = %text, "ignoring unparseable stored setting");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimulatedPage;
    use crate::script::parse_script;
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn bootstrap(
        store: Arc<MemoryStore>,
        page: SimulatedPage,
        config: &Config,
    ) -> SessionStart {
        resume_session(store, Arc::new(page), config)
            .await
            .expect("bootstrap")
    }

    #[tokio::test]
    async fn empty_store_starts_idle() {
        let start = bootstrap(
            Arc::new(MemoryStore::new()),
            SimulatedPage::new(),
            &Config::default(),
        )
        .await;
        assert!(matches!(start, SessionStart::Idle));
    }

    #[tokio::test]
    async fn leftover_done_queue_is_swept() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = parse_script("click #a");
        queue.mark_all_done();
        store.save_queue(&queue).await.expect("seed");

        let start = bootstrap(store.clone(), SimulatedPage::new(), &Config::default()).await;
        assert!(matches!(start, SessionStart::Idle));
        assert!(store.load_queue().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn pending_queue_resumes() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_queue(&parse_script("click #a"))
            .await
            .expect("seed");

        let start = bootstrap(store, SimulatedPage::new(), &Config::default()).await;
        assert!(matches!(start, SessionStart::Resumed(_)));
    }

    #[tokio::test]
    async fn resize_queue_defers_without_parent_window() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_queue(&parse_script("resize 800 600\nclick #a"))
            .await
            .expect("seed");

        let start = bootstrap(store.clone(), SimulatedPage::new(), &Config::default()).await;
        assert!(matches!(start, SessionStart::Deferred));
        // Deferral leaves the queue for a later, capable session.
        assert!(store.load_queue().await.expect("load").is_active());
    }

    #[tokio::test]
    async fn resize_queue_resumes_with_parent_window() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_queue(&parse_script("resize 800 600"))
            .await
            .expect("seed");
        let page = SimulatedPage::new();
        page.set_parent_window(true);

        let start = bootstrap(store, page, &Config::default()).await;
        assert!(matches!(start, SessionStart::Resumed(_)));
    }

    #[tokio::test]
    async fn deferral_can_be_disabled() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_queue(&parse_script("resize 800 600"))
            .await
            .expect("seed");

        let mut config = Config::default();
        config.resume.defer_for_resize = false;
        let start = bootstrap(store, SimulatedPage::new(), &config).await;
        assert!(matches!(start, SessionStart::Resumed(_)));
    }

    #[tokio::test]
    async fn stored_settings_override_file_config() {
        let store = Arc::new(MemoryStore::new());
        store.save_queue(&parse_script("click #a")).await.expect("seed");
        store.set_setting("default_tries", "3").await.expect("set");
        store.set_setting("settle_delay_ms", "10").await.expect("set");
        store.set_setting("retry_delay_ms", "junk").await.expect("set");

        let start = bootstrap(store, SimulatedPage::new(), &Config::default()).await;
        let SessionStart::Resumed(engine) = start else {
            panic!("expected resumed engine");
        };
        let config = engine.config();
        assert_eq!(config.default_tries, 3);
        assert_eq!(config.settle_delay, Duration::from_millis(10));
        // Unparseable override falls back to the file value.
        assert_eq!(config.retry_delay, Duration::from_millis(500));
    }
}
