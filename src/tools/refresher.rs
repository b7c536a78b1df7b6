//! Scheduled registry refresh actor.
//!
//! `RegistryRefresher` owns no tool state of its own; it receives refresh
//! requests (typically from an interval in the host) and runs them
//! against a shared [`ToolRegistry`]. Overlapping requests are harmless:
//! the registry skips a refresh already in flight.

use crate::tools::registry::{RefreshOutcome, ToolRegistry};
use acton_reactive::prelude::*;
use std::sync::Arc;

/// Requests a refresh of the uploaded tool collection.
#[acton_message]
pub struct RefreshUploaded;

/// Requests a rescan of the builtin tool directory.
#[acton_message]
pub struct RefreshBuiltins;

/// The refresher actor state.
#[acton_actor]
pub struct RegistryRefresher {
    /// Registry refreshed by this actor
    pub registry: Option<Arc<ToolRegistry>>,
    /// Refresh requests received
    pub requests: u64,
}

impl RegistryRefresher {
    /// Spawns and starts the refresher for `registry`.
    pub async fn spawn(runtime: &mut ActorRuntime, registry: Arc<ToolRegistry>) -> ActorHandle {
        let mut builder =
            runtime.new_actor_with_name::<RegistryRefresher>("registry_refresher".to_string());
        builder.model.registry = Some(registry);

        builder
            .before_start(|_actor| {
                tracing::debug!("Registry refresher initializing");
                Reply::ready()
            })
            .after_start(|_actor| {
                tracing::info!("Registry refresher ready");
                Reply::ready()
            })
            .before_stop(|actor| {
                tracing::info!(requests = actor.model.requests, "Registry refresher stopping");
                Reply::ready()
            });

        configure_handlers(&mut builder);

        builder.start().await
    }
}

fn configure_handlers(builder: &mut ManagedActor<Idle, RegistryRefresher>) {
    builder.mutate_on::<RefreshUploaded>(|actor, _envelope| {
        actor.model.requests += 1;
        let Some(registry) = actor.model.registry.clone() else {
            tracing::warn!("Refresh requested before a registry was attached");
            return Reply::ready();
        };

        Reply::pending(async move {
            let task = tokio::spawn(async move {
                match registry.refresh_uploaded().await {
                    Ok(RefreshOutcome::Refreshed {
                        removed,
                        fetched,
                        total,
                    }) => {
                        tracing::info!(removed, fetched, total, "Uploaded tools refreshed");
                    }
                    Ok(RefreshOutcome::Skipped) => {
                        tracing::debug!("Uploaded tool refresh skipped");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Uploaded tool refresh failed");
                    }
                }
            });
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Uploaded tool refresh task failed");
            }
        })
    });

    builder.mutate_on::<RefreshBuiltins>(|actor, _envelope| {
        actor.model.requests += 1;
        let Some(registry) = actor.model.registry.clone() else {
            tracing::warn!("Refresh requested before a registry was attached");
            return Reply::ready();
        };

        Reply::pending(async move {
            let task = tokio::spawn(async move { registry.refresh_builtins().await });
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Builtin tool refresh task failed");
            }
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::loader::ModuleLoader;
    use crate::tools::registry::RegistryConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_messages_reach_the_registry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("clock.json"),
            r#"{"toolId": "clock", "name": "Clock", "versionList": [{"value": "1"}]}"#,
        )
        .unwrap();
        let registry = Arc::new(ToolRegistry::new(
            RegistryConfig::new(dir.path(), dir.path().join("uploaded")),
            Arc::new(ModuleLoader::default()),
        ));

        let mut runtime = ActonApp::launch_async().await;
        let refresher = RegistryRefresher::spawn(&mut runtime, registry.clone()).await;
        refresher.send(RefreshBuiltins).await;
        refresher.send(RefreshUploaded).await;

        let mut found = false;
        for _ in 0..50 {
            if registry.get_tool("clock").is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(found);

        runtime.shutdown_all().await.unwrap();
    }
}
