// Live status watching for a single workflow

//! # Workflow Status Watcher
//!
//! Merges the engine's watch events for one workflow with a one-second ticker.
//! Every event and every tick re-emits the latest observed resource as a
//! [`Workflow`] snapshot, so a consumer sees progress even when the engine is
//! quiet.
//!
//! The stream ends:
//! - right after the first snapshot of a finished workflow
//! - when the watch stream errors, ends, or reports a server-side error
//! - when the consumer drops the stream

use std::time::Duration;

use futures::StreamExt;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::cluster::{WatchEvent, WatchStream};
use super::stream::TaskStream;
use crate::models::{Workflow, WorkflowResource};

/// Interval between snapshots while the engine is quiet
pub const WATCH_TICK: Duration = Duration::from_secs(1);

/// Spawn the watcher task over an established watch stream
pub fn watch_status(namespace: &str, name: &str, mut events: WatchStream) -> TaskStream<Workflow> {
    let namespace = namespace.to_string();
    let name = name.to_string();

    TaskStream::spawn(move |sender, cancel| async move {
        let mut ticker = interval_at(Instant::now() + WATCH_TICK, WATCH_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<WorkflowResource> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(namespace = %namespace, name = %name, "Watch cancelled by consumer");
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(WatchEvent::Error(status))) => {
                        error!(namespace = %namespace, name = %name, status = %status, "Watch reported an error");
                        break;
                    }
                    Some(Ok(event)) => {
                        if let Some(resource) = event.into_resource() {
                            current = Some(resource);
                        }
                    }
                    Some(Err(err)) => {
                        error!(namespace = %namespace, name = %name, error = %err, "Watch stream failed");
                        break;
                    }
                    None => {
                        warn!(namespace = %namespace, name = %name, "Watch stream ended");
                        break;
                    }
                },
                _ = ticker.tick() => {}
            }

            let Some(resource) = current.as_ref() else {
                continue;
            };
            let snapshot = match Workflow::snapshot(resource) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    error!(namespace = %namespace, name = %name, error = %err, "Error serializing workflow");
                    continue;
                }
            };

            let finished = resource.is_finished();
            if sender.send(snapshot).await.is_err() {
                break;
            }
            if finished {
                debug!(namespace = %namespace, name = %name, "Workflow finished, closing watch");
                break;
            }
        }
    })
}
