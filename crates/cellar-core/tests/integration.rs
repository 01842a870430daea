#![allow(unsafe_code)]

use cellar_core::{
    AttributeValue, CommitFailure, CoreError, ObjectState, PersistenceStack, StackConfig,
    StageState,
};
use cellar_store::StoreError;
use chrono::{TimeZone, Utc};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Skip test if running as root: root bypasses filesystem permission checks,
/// so read-only directory tests are meaningless in containers running as uid 0.
fn skip_if_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

const TASKS: &str = r#"
schema_version = 1

[entities.Task]
unique = ["title"]

[entities.Task.attributes]
title = { type = "string" }
dueDate = { type = "date", optional = true }
done = { type = "boolean", default = false }
priority = { type = "integer", default = 0 }
weight = { type = "double", optional = true }

[entities.Tag.attributes]
label = { type = "string" }
"#;

fn write_schema(dir: &Path) -> PathBuf {
    let schemas = dir.join("schemas");
    fs::create_dir_all(&schemas).unwrap();
    fs::write(schemas.join("Tasks.schema.toml"), TASKS).unwrap();
    schemas
}

fn config(dir: &Path) -> StackConfig {
    StackConfig::new("Tasks")
        .with_data_dir(dir.join("data"))
        .with_schema_dir(write_schema(dir))
}

fn stack(dir: &Path) -> PersistenceStack {
    PersistenceStack::new(config(dir)).unwrap()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn construction_is_lazy_until_first_object() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let data = dir.path().join("data");
    assert!(!data.exists());

    stack.create_object("Task").unwrap();
    assert!(data.join("Tasks.cellar").is_file());
    assert_eq!(stack.status().session, StageState::Ready);
}

#[test]
fn task_scenario_round_trips_through_a_fresh_stack() {
    let dir = tempfile::tempdir().unwrap();
    let due = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    {
        let stack = stack(dir.path());
        let task = stack.create_object("Task").unwrap();
        task.set("title", "Buy milk").unwrap();
        task.set("dueDate", due).unwrap();
        stack.save().unwrap();
        assert_eq!(task.state(), ObjectState::Committed);
    }

    let stack = stack(dir.path());
    let tasks = stack.fetch("Task").unwrap();
    assert_eq!(tasks.len(), 1);
    let values = tasks[0].values().unwrap();
    assert_eq!(values["title"], AttributeValue::from("Buy milk"));
    assert_eq!(values["dueDate"], AttributeValue::Date(due));
    assert_eq!(values["done"], AttributeValue::Boolean(false));
    assert_eq!(values["priority"], AttributeValue::Integer(0));
}

#[test]
fn non_finite_doubles_never_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stack = stack(dir.path());
        let task = stack.create_object("Task").unwrap();
        task.set("title", "Weigh flour").unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                task.set("weight", bad),
                Err(CoreError::InvalidValue(_))
            ));
        }
        assert_eq!(task.get("weight").unwrap(), None);
        task.set("weight", 0.5).unwrap();
        stack.save().unwrap();
    }

    let stack = stack(dir.path());
    let tasks = stack.fetch("Task").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].get("weight").unwrap(),
        Some(AttributeValue::Double(0.5))
    );
}

#[test]
fn double_save_commits_once() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    stack
        .create_object("Task")
        .unwrap()
        .set("title", "once")
        .unwrap();

    stack.save().unwrap();
    stack.save().unwrap();
    assert_eq!(stack.coordinator().unwrap().generation(), 1);
}

#[test]
fn unknown_entity_keeps_pending_set() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    assert!(matches!(
        stack.create_object("Project"),
        Err(CoreError::UnknownEntity { .. })
    ));
    assert!(!stack.has_pending_changes());

    stack.create_object("Tag").unwrap().set("label", "home").unwrap();
    assert!(stack.has_pending_changes());
    assert!(stack.create_object("Project").is_err());
    assert!(stack.has_pending_changes());
    assert_eq!(stack.session().unwrap().pending_changes(), 1);
}

#[test]
fn failed_save_keeps_staged_edits_and_retry_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let first = stack.create_object("Task").unwrap();
    first.set("title", "same").unwrap();
    first.set("priority", 3_i64).unwrap();
    let second = stack.create_object("Task").unwrap();
    second.set("title", "same").unwrap();

    match stack.save() {
        Err(CoreError::Commit(e)) => assert_eq!(e.kind(), CommitFailure::Constraint),
        other => panic!("expected Commit error, got {other:?}"),
    }
    assert!(stack.has_pending_changes());
    assert_eq!(first.get("priority").unwrap(), Some(AttributeValue::Integer(3)));
    assert_eq!(second.state(), ObjectState::Unsaved);

    second.set("title", "different").unwrap();
    stack.save().unwrap();
    assert!(!stack.has_pending_changes());
}

#[test]
fn failed_write_keeps_pending_changes() {
    if skip_if_root() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let task = stack.create_object("Task").unwrap();
    task.set("title", "Buy milk").unwrap();

    let data = dir.path().join("data");
    fs::set_permissions(&data, fs::Permissions::from_mode(0o555)).unwrap();
    let result = stack.save();
    fs::set_permissions(&data, fs::Permissions::from_mode(0o755)).unwrap();

    match result {
        Err(CoreError::Commit(e)) => {
            assert_eq!(e.kind(), CommitFailure::Io);
            assert!(matches!(e.store_error(), StoreError::Io(_)));
        }
        other => panic!("expected Commit error, got {other:?}"),
    }
    assert!(stack.has_pending_changes());
    assert_eq!(task.get("title").unwrap(), Some(AttributeValue::from("Buy milk")));

    stack.save().unwrap();
    assert!(!stack.has_pending_changes());
}

#[test]
fn empty_identity_fails_before_touching_files() {
    let dir = tempfile::tempdir().unwrap();
    let result = PersistenceStack::new(
        StackConfig::new("").with_data_dir(dir.path().join("data")),
    );
    assert!(matches!(result, Err(CoreError::Configuration(_))));
    assert!(entries(dir.path()).is_empty());
}

#[test]
fn read_only_directory_is_store_unavailable() {
    if skip_if_root() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let schemas = write_schema(dir.path());
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::set_permissions(&data, fs::Permissions::from_mode(0o555)).unwrap();

    let stack = PersistenceStack::new(
        StackConfig::new("Tasks")
            .with_data_dir(&data)
            .with_schema_dir(schemas),
    )
    .unwrap();
    let result = stack.create_object("Task");
    fs::set_permissions(&data, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(result, Err(CoreError::StoreUnavailable(_))));
    assert!(entries(&data).is_empty());
    assert_eq!(stack.status().coordinator, StageState::Failed);
}

#[test]
fn second_stack_is_locked_out_until_first_drops() {
    let dir = tempfile::tempdir().unwrap();
    let first = stack(dir.path());
    first.session().unwrap();

    let second = stack(dir.path());
    match second.session() {
        Err(CoreError::StoreUnavailable(StoreError::Locked(_))) => {}
        other => panic!("expected locked store, got {other:?}"),
    }

    drop(first);
    let third = stack(dir.path());
    assert!(third.session().is_ok());
}

#[test]
fn failed_stage_stays_failed() {
    let dir = tempfile::tempdir().unwrap();
    let stack = PersistenceStack::new(
        StackConfig::new("Missing").with_data_dir(dir.path().join("data")),
    )
    .unwrap();

    assert!(matches!(
        stack.create_object("Task"),
        Err(CoreError::Schema(_))
    ));
    for _ in 0..2 {
        assert!(matches!(
            stack.create_object("Task"),
            Err(CoreError::StageFailed { .. })
        ));
    }
    assert!(matches!(stack.save(), Err(CoreError::StageFailed { .. })));
    assert_eq!(stack.status().schema, StageState::Failed);
    assert_eq!(stack.status().session, StageState::Failed);
    assert!(!dir.path().join("data").exists());
}

#[test]
fn schema_change_is_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stack = stack(dir.path());
        stack.session().unwrap();
    }
    fs::write(
        dir.path().join("schemas").join("Tasks.schema.toml"),
        TASKS.replace("schema_version = 1", "schema_version = 2"),
    )
    .unwrap();

    let stack = PersistenceStack::new(
        StackConfig::new("Tasks")
            .with_data_dir(dir.path().join("data"))
            .with_schema_dir(dir.path().join("schemas")),
    )
    .unwrap();
    assert!(matches!(
        stack.session(),
        Err(CoreError::SchemaMismatch(_))
    ));
}

#[test]
fn write_block_saves_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let ids = stack
        .write(true, |tx| {
            let a = tx.create_object("Task")?;
            a.set("title", "a")?;
            let b = tx.create_object("Task")?;
            b.set("title", "b")?;
            Ok([a.id(), b.id()])
        })
        .unwrap();

    let coordinator = stack.coordinator().unwrap();
    assert_eq!(coordinator.generation(), 1);
    for id in ids {
        assert!(coordinator.record(id).is_some());
    }
}

#[test]
fn dropped_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let inside = {
        let tx = stack.begin().unwrap();
        let task = tx.create_object("Task").unwrap();
        task.set("title", "never").unwrap();
        task
    };
    assert_eq!(inside.state(), ObjectState::Discarded);
    assert!(!stack.has_pending_changes());
    stack.save().unwrap();
    assert_eq!(stack.coordinator().unwrap().generation(), 0);
}

#[test]
fn delete_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stack = stack(dir.path());
        for title in ["keep", "drop"] {
            stack.create_object("Task").unwrap().set("title", title).unwrap();
        }
        stack.save().unwrap();

        let doomed = stack
            .fetch("Task")
            .unwrap()
            .into_iter()
            .find(|t| t.get("title").unwrap() == Some(AttributeValue::from("drop")))
            .unwrap();
        stack.delete(&doomed).unwrap();
        stack.save().unwrap();
    }

    let stack = stack(dir.path());
    let tasks = stack.fetch("Task").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].get("title").unwrap(),
        Some(AttributeValue::from("keep"))
    );
}

#[test]
fn handles_outlive_their_stack_as_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let stack = stack(dir.path());
    let task = stack.create_object("Task").unwrap();
    drop(stack);
    assert_eq!(task.state(), ObjectState::Discarded);
    assert!(matches!(task.get("title"), Err(CoreError::Detached(_))));
}

#[test]
fn config_file_drives_the_stack() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path());
    let path = dir.path().join("cellar.toml");
    fs::write(
        &path,
        "identity = \"Tasks\"\ndata_dir = \"data\"\nschema_dirs = [\"schemas\"]\ndebug_logging = true\n",
    )
    .unwrap();

    let stack = PersistenceStack::new(StackConfig::load(&path).unwrap()).unwrap();
    assert!(stack.debug_logging());
    assert_eq!(stack.data_dir(), dir.path().join("data"));
    stack.create_object("Task").unwrap().set("title", "x").unwrap();
    stack.save().unwrap();
    assert!(dir.path().join("data").join("Tasks.cellar").is_file());
}
