//! Optimist Todo Demo
//!
//! A five-item todo list behind an optimistic store:
//! - CREATE shows a pending item at once and confirms it after a delay
//! - DELETE is applied synchronously
//! - A faster create can confirm before a slower one started earlier
//!
//! Usage: `todo-demo [delay-ms]` (default 400)

mod items;

use std::time::Duration;

use optimist_runtime::{init_tracing, Dispatcher, Store, StoreConfig, TelemetryConfig};

use items::{render, seed, Action, TodoFactory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&TelemetryConfig::default())?;

    let delay = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(400));

    println!("Optimist Todo Demo (base delay {:?})", delay);
    println!();

    let initial = seed();
    let factory = TodoFactory::new(&initial);
    let store = Store::with_config(initial, StoreConfig::named("todos"));
    let dispatcher = Dispatcher::new(store, factory);

    println!("Initial list:");
    println!("{}", render(&dispatcher.current()));
    println!();

    // Print every snapshot the store publishes
    let mut updates = dispatcher.store().subscribe();
    let printer = tokio::spawn(async move {
        let mut seen = 0u32;
        while updates.changed().await.is_ok() {
            seen += 1;
            let snapshot = updates.borrow_and_update().clone();
            let pending = snapshot.pending_transactions();
            println!(
                "Snapshot {} ({} pending: {:?})",
                seen,
                pending.len(),
                pending
            );
            println!("{}", render(&snapshot.current));
            println!();
        }
        seen
    });

    let slow = dispatcher.dispatch(Action::Create {
        text: "Water the plants".to_string(),
        delay: delay * 2,
    })?;
    tokio::time::sleep(delay / 4).await;

    let fast = dispatcher.dispatch(Action::Create {
        text: "Pay the electricity bill".to_string(),
        delay,
    })?;
    tokio::time::sleep(delay / 4).await;

    dispatcher.dispatch(Action::Delete(2))?;

    for handle in [slow, fast].into_iter().filter_map(|d| d.into_handle()) {
        let id = handle.settled().await?;
        tracing::info!(transaction = %id, "create confirmed");
    }

    let stats = dispatcher.store().stats();
    let final_list = dispatcher.current();
    drop(dispatcher);
    let observed = printer.await?;

    println!("Final list after {} snapshots:", observed);
    println!("{}", render(&final_list));
    println!();
    println!(
        "commits={} optimistic={} settled={} normal={} failed={} kept={}",
        stats.commits, stats.optimistic, stats.settled, stats.normal, stats.failed, stats.kept
    );

    Ok(())
}
