//! Scheduling properties checked through the public API against a live store.
//!
//! Every call takes a fresh snapshot; nothing derived is carried between calls.

use phasegate_core::{Priority, Task, WorkflowState};
use phasegate_scheduler::{
    completed_epics, epic_progress, ready_tasks, Scheduler, StateTable,
};
use phasegate_store::{MemoryTaskStore, TaskStore};

fn ids(tasks: &[&Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

#[tokio::test]
async fn test_breakpoint_toggle_reflected_on_next_call() {
    let store = MemoryTaskStore::new(
        vec!["e1".to_string()],
        vec![Task::new("a", "e1"), Task::new("b", "e1")],
    )
    .unwrap();

    store.set_breakpoint("a", true).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(ids(&ready_tasks(&snapshot)), vec!["b"]);

    store.set_breakpoint("a", false).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(ids(&ready_tasks(&snapshot)), vec!["a", "b"]);
}

#[tokio::test]
async fn test_breakpoint_never_changes_state() {
    let store = MemoryTaskStore::new(
        vec!["e1".to_string()],
        vec![Task::new("a", "e1").with_state(WorkflowState::CodeReview)],
    )
    .unwrap();

    store.set_breakpoint("a", true).await.unwrap();
    assert_eq!(store.state_of("a").await, Some(WorkflowState::CodeReview));
}

#[tokio::test]
async fn test_dependency_completion_appears_in_next_call() {
    let store = MemoryTaskStore::new(
        vec!["e1".to_string()],
        vec![
            Task::new("dep", "e1").with_state(WorkflowState::PrOpen),
            Task::new("child", "e1").with_dependency("dep"),
        ],
    )
    .unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert!(!ids(&ready_tasks(&snapshot)).contains(&"child".to_string()));

    store.write_state("dep", WorkflowState::Done).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(ids(&ready_tasks(&snapshot)), vec!["child"]);
}

#[tokio::test]
async fn test_epic_completion_is_derived_each_call() {
    let store = MemoryTaskStore::new(
        vec!["e1".to_string(), "e2".to_string()],
        vec![
            Task::new("t1", "e1").with_state(WorkflowState::Done),
            Task::new("t2", "e1").with_state(WorkflowState::Done),
            Task::new("t3", "e2").with_state(WorkflowState::Done),
        ],
    )
    .unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(completed_epics(&snapshot), vec!["e1", "e2"]);

    store.write_state("t2", WorkflowState::PrOpen).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(completed_epics(&snapshot), vec!["e2"]);

    let progress = epic_progress(&snapshot);
    assert_eq!((progress[0].done, progress[0].total), (1, 2));
}

#[test]
fn test_order_is_independent_of_record_order() {
    let make = |tasks: Vec<Task>| {
        phasegate_core::TaskSnapshot::new(vec!["a".into(), "b".into()], tasks).unwrap()
    };
    let tasks = vec![
        Task::new("b2", "b").with_priority(Priority::High),
        Task::new("a2", "a").with_priority(Priority::Low),
        Task::new("a1", "a").with_priority(Priority::Low),
        Task::new("a0", "a").with_priority(Priority::Critical),
        Task::new("b1", "b").with_priority(Priority::High),
    ];
    let mut reversed = tasks.clone();
    reversed.reverse();

    let forward = make(tasks);
    let backward = make(reversed);
    let scheduler = Scheduler::default();

    let expected = vec!["a0", "a1", "a2", "b1", "b2"];
    assert_eq!(ids(&scheduler.order(&forward)), expected);
    assert_eq!(ids(&scheduler.order(&backward)), expected);
}

#[test]
fn test_state_table_self_check_passes() {
    StateTable::new().validate().unwrap();
}
