//! Example: migrating a notes app's SQLite state at start-up.
//!
//! Run with `RUST_LOG=info cargo run --example startup -p state-migrate`.

use state_migrate::{migration, FnStep, MigrationConfig, MigrationRunner, StepError, StoreState};
use state_store::{KvStore, SqliteStore};

#[migration(version = "1.1.0", description = "add `pinned` to every note")]
fn add_pinned(mut state: StoreState) -> Result<StoreState, StepError> {
    let keys: Vec<String> = state
        .keys_with_prefix("app:note:")
        .map(str::to_string)
        .collect();
    for key in keys {
        state.update_json(&key, |note| note["pinned"] = false.into())?;
    }
    Ok(state)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    let mut store = SqliteStore::open(dir.path().join("notes.db"))?;
    store.set("app:note:1", r#"{"title":"groceries"}"#)?;
    store.set("app:note:2", r#"{"title":"call mom"}"#)?;

    let runner = MigrationRunner::builder(MigrationConfig::default())
        .register(register_add_pinned())
        .register(
            FnStep::new("1.2.0", |mut state: StoreState| {
                state.set("app:settings", r#"{"sort":"title"}"#);
                Ok(state)
            })?
            .with_description("default sort order")
            .boxed(),
        )
        .build()?;

    println!("pending: {:?}", runner.plan(&store, None, None)?);

    let report = runner.run(&mut store, None, None);
    if report.requires_intervention() {
        eprintln!("state is partially migrated, refusing to start");
        std::process::exit(2);
    }
    println!(
        "{} step(s) applied, schema at v{} ({})",
        report.steps_applied, report.final_version, report.outcome
    );
    report.into_result()?;

    for key in store.list_keys()? {
        println!("{key} = {}", store.get(&key)?.unwrap_or_default());
    }
    Ok(())
}
