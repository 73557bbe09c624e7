//! Watch command: index project roots and report changes until Ctrl-C.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::events::{STORE_INSERT_CHANNEL, STORE_REMOVE_CHANNEL, StoreEvent};
use crate::repository::IndexRepository;
use crate::store::{ListOptions, Store};
use crate::watcher::{Watcher, WatcherConfig};

/// Print one line per store event.
fn report(
    dispatcher: &Dispatcher,
    scope: &CancellationToken,
    channel: &'static str,
    store: Weak<Store>,
) -> anyhow::Result<()> {
    dispatcher.subscribe(
        scope,
        channel,
        move |event: &mut StoreEvent| -> anyhow::Result<()> {
            let reference = store
                .upgrade()
                .and_then(|store| store.get(&CancellationToken::new(), event.id).ok())
                .map(|doc| doc.reference)
                .unwrap_or_default();
            println!("{channel:<13} {:<9} {} {reference}", event.kind, event.id);
            Ok(())
        },
        0,
    )?;
    Ok(())
}

/// Run watch command.
///
/// `paths` overrides `projects.paths` from the settings when non-empty.
pub async fn run_watch(settings: &Settings, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let roots = if paths.is_empty() {
        settings.projects.paths.clone()
    } else {
        paths
    };
    if roots.is_empty() {
        anyhow::bail!("No project roots given. Pass paths or set projects.paths in settings");
    }

    let scope = CancellationToken::new();
    let dispatcher = Dispatcher::new();
    let store = Arc::new(
        Store::new(dispatcher.clone(), settings.store.clone()).context("failed to create store")?,
    );

    report(&dispatcher, &scope, STORE_INSERT_CHANNEL, Arc::downgrade(&store))?;
    report(&dispatcher, &scope, STORE_REMOVE_CHANNEL, Arc::downgrade(&store))?;

    let repository = IndexRepository::projects(store.clone(), settings.projects.file_name.as_str())
        .with_scope(scope.child_token());
    let watcher = Watcher::builder(Arc::new(repository))
        .config(WatcherConfig::from(&settings.watcher))
        .paths(roots)
        .build()
        .await?;

    let indexed = store.count(&scope, &ListOptions::new())?;
    println!(
        "Watching {} root(s), {indexed} project(s) indexed. Press Ctrl-C to stop.",
        watcher.registered_paths().len()
    );

    tokio::signal::ctrl_c().await?;
    crate::log_event!("watch", "interrupted");

    watcher.close().await?;
    scope.cancel();
    dispatcher.close();
    store.close()?;
    Ok(())
}
