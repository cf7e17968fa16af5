//! Worker pool
//!
//! A fixed number of tasks pull routes from the frontier until it closes.
//! Every route is counted as processed exactly once, whether it was saved,
//! skipped, failed or panicked.

use super::session::Session;
use crate::state::RouteState;
use crate::url::Route;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs `concurrency` workers until the frontier closes
pub async fn run_workers(session: Arc<Session>, concurrency: usize) {
    let mut workers = JoinSet::new();
    for id in 0..concurrency.max(1) {
        workers.spawn(worker(id, session.clone()));
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::error!("Worker task ended abnormally: {}", e);
        }
    }
}

async fn worker(id: usize, session: Arc<Session>) {
    tracing::trace!("Worker {} started", id);

    while let Some(route) = session.frontier.next().await {
        let state = process(&session, &route).await;
        session.report().set_state(route.path(), state);

        if session.frontier.mark_processed() {
            let counters = session.frontier.counters();
            tracing::info!(
                "Closing as enqueued {} = processed {}",
                counters.enqueued,
                counters.processed
            );
            session.shutdown.close();
        }
    }

    tracing::trace!("Worker {} finished", id);
}

/// Renders one route, containing errors and panics to that route
async fn process(session: &Session, route: &Route) -> RouteState {
    session.report().set_state(route.path(), RouteState::Rendering);

    match AssertUnwindSafe(session.render_route(route)).catch_unwind().await {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            session.fail(route, &e.to_string());
            RouteState::Failed
        }
        Err(panic) => {
            session.fail(route, &format!("panic while rendering: {}", panic_message(&*panic)));
            RouteState::Failed
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
