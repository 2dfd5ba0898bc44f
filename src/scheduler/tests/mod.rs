use super::*;
use crate::retry::{failure_policy, retry_limit_policy};
use std::collections::HashMap;
use std::time::Duration;

/// Collect events until the channel closes after the terminal event
async fn collect<P>(mut rx: mpsc::UnboundedReceiver<SchedulerEvent<P>>) -> Vec<SchedulerEvent<P>> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("scheduler stalled")
    {
        events.push(event);
    }
    events
}

fn finishes<P: Clone>(events: &[SchedulerEvent<P>]) -> Vec<SchedulerTask<P>> {
    events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskFinish { task, .. } => Some(task.clone()),
            _ => None,
        })
        .collect()
}

fn errors<P: Clone>(events: &[SchedulerEvent<P>]) -> Vec<(SchedulerTask<P>, TaskFailDecision)> {
    events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskError { task, decision, .. } => Some((task.clone(), *decision)),
            _ => None,
        })
        .collect()
}

fn ok_task(name: &'static str, priority: i64) -> NewTask<&'static str> {
    NewTask::new(name, priority, |_| async { Ok(()) })
}

#[tokio::test]
async fn empty_scheduler_finishes_immediately() {
    let scheduler: TaskScheduler<()> = TaskScheduler::new(4);
    let rx = scheduler.subscribe();
    scheduler.start();

    let events = collect(rx).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SchedulerEvent::Finish));
    assert!(scheduler.is_finished());
}

#[tokio::test]
async fn one_failure_then_success_emits_error_then_three_finishes() {
    let scheduler = TaskScheduler::new(2);
    let rx = scheduler.subscribe();

    let b_attempts = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::clone(&b_attempts);

    scheduler
        .add_tasks([
            ok_task("a", 0),
            NewTask::new("b", -1, move |_| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Other("first attempt fails".into()))
                    } else {
                        Ok(())
                    }
                }
            }),
            ok_task("c", -2),
        ])
        .unwrap();
    scheduler.start();

    let events = collect(rx).await;

    let errs = errors(&events);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].0.payload, "b");
    assert_eq!(errs[0].1, TaskFailDecision::Retry);
    assert_eq!(errs[0].0.retry_count, 1);

    let mut finished: Vec<_> = finishes(&events).into_iter().map(|t| t.payload).collect();
    finished.sort_unstable();
    assert_eq!(finished, vec!["a", "b", "c"]);

    assert!(matches!(events.last(), Some(SchedulerEvent::Finish)));
    assert_eq!(
        events.iter().filter(|e| e.is_terminal()).count(),
        1,
        "finish must fire exactly once"
    );
    assert_eq!(b_attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    const LIMIT: usize = 3;
    let scheduler = TaskScheduler::new(LIMIT);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..20).map(|n| {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        NewTask::new(n, -n, move |_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    });
    scheduler.add_tasks(tasks).unwrap();
    scheduler.start();
    scheduler.wait_finished().await;

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= LIMIT, "peak concurrency {peak} exceeded {LIMIT}");
    assert!(peak >= 2, "window should actually fill up, peak was {peak}");
    assert_eq!(scheduler.stats().finished, 20);
    assert_eq!(scheduler.stats().in_flight, 0);
}

#[tokio::test]
async fn retry_limit_drops_after_third_failure() {
    let scheduler = TaskScheduler::new(1);
    scheduler.configure(1, retry_limit_policy(2));
    let rx = scheduler.subscribe();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    scheduler
        .add_tasks([NewTask::new("doomed", 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Other("always fails".into())) }
        })])
        .unwrap();
    scheduler.start();

    let events = collect(rx).await;
    let errs = errors(&events);

    let decisions: Vec<_> = errs.iter().map(|(_, d)| *d).collect();
    assert_eq!(
        decisions,
        vec![
            TaskFailDecision::Retry,
            TaskFailDecision::Retry,
            TaskFailDecision::Drop
        ]
    );
    let counts: Vec<_> = errs.iter().map(|(t, _)| t.retry_count).collect();
    assert_eq!(counts, vec![1, 2, 3], "retry_count grows on every failure");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let drop = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TaskDrop {
                task,
                drop_count,
                finish_count,
                total_count,
            } => Some((task.retry_count, *drop_count, *finish_count, *total_count)),
            _ => None,
        })
        .expect("drop event");
    assert_eq!(drop, (3, 1, 0, 1));
    assert!(matches!(events.last(), Some(SchedulerEvent::Finish)));
}

#[tokio::test]
async fn drop_event_follows_its_error_event() {
    let scheduler = TaskScheduler::new(1);
    scheduler.configure(1, failure_policy(|_, _| TaskFailDecision::Drop));
    let rx = scheduler.subscribe();
    scheduler
        .add_tasks([NewTask::new((), 0, |_| async {
            Err(Error::Other("nope".into()))
        })])
        .unwrap();
    scheduler.start();

    let events = collect(rx).await;
    assert!(matches!(
        events.as_slice(),
        [
            SchedulerEvent::TaskError {
                decision: TaskFailDecision::Drop,
                ..
            },
            SchedulerEvent::TaskDrop { .. },
            SchedulerEvent::Finish
        ]
    ));
}

#[tokio::test]
async fn increase_priority_bumps_priority_and_retry_count() {
    let scheduler = TaskScheduler::new(1);
    scheduler.configure(
        1,
        failure_policy(|_, task: &SchedulerTask<&'static str>| {
            if task.retry_count < 2 {
                TaskFailDecision::IncreasePriority
            } else {
                TaskFailDecision::Drop
            }
        }),
    );
    let rx = scheduler.subscribe();
    scheduler
        .add_tasks([NewTask::new("flaky", 10, |_| async {
            Err(Error::Other("down".into()))
        })])
        .unwrap();
    scheduler.start();

    let errs = errors(&collect(rx).await);
    let seen: Vec<_> = errs
        .iter()
        .map(|(t, d)| (t.priority, t.retry_count, *d))
        .collect();
    assert_eq!(
        seen,
        vec![
            (11, 1, TaskFailDecision::IncreasePriority),
            (12, 2, TaskFailDecision::IncreasePriority),
            (12, 3, TaskFailDecision::Drop),
        ]
    );
}

#[tokio::test]
async fn bumped_task_jumps_ahead_of_lower_priorities() {
    let scheduler = TaskScheduler::new(1);
    scheduler.configure(1, failure_policy(|_, _| TaskFailDecision::IncreasePriority));

    let order = Arc::new(Mutex::new(Vec::new()));
    let failed_once = Arc::new(AtomicBool::new(false));

    let make = |name: &'static str, priority: i64| {
        let order = Arc::clone(&order);
        let failed_once = Arc::clone(&failed_once);
        NewTask::new(name, priority, move |name| {
            let order = Arc::clone(&order);
            let failed_once = Arc::clone(&failed_once);
            async move {
                order.lock().unwrap().push(name);
                if name == "a" && !failed_once.swap(true, Ordering::SeqCst) {
                    return Err(Error::Other("retry me".into()));
                }
                Ok(())
            }
        })
    };
    // a and b share priority 0; a fails once and comes back at priority 1
    scheduler
        .add_tasks([make("a", 0), make("b", 0), make("c", -1)])
        .unwrap();
    scheduler.start();
    scheduler.wait_finished().await;

    assert_eq!(*order.lock().unwrap(), vec!["a", "a", "b", "c"]);
}

#[tokio::test]
async fn dequeues_by_priority_with_single_slot() {
    let scheduler = TaskScheduler::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let tasks = [5_i64, 1, 3].map(|p| {
        let order = Arc::clone(&order);
        NewTask::new(p, p, move |p| {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(p);
                Ok(())
            }
        })
    });
    scheduler.add_tasks(tasks).unwrap();
    scheduler.start();
    scheduler.wait_finished().await;

    assert_eq!(*order.lock().unwrap(), vec![5, 3, 1]);
}

#[tokio::test]
async fn panicking_handler_is_coerced_to_error() {
    let scheduler = TaskScheduler::new(1);
    scheduler.configure(1, failure_policy(|_, _| TaskFailDecision::Drop));
    let rx = scheduler.subscribe();
    scheduler
        .add_tasks([NewTask::new((), 0, |_| async {
            if true {
                panic!("handler exploded");
            }
            Ok(())
        })])
        .unwrap();
    scheduler.start();

    let events = collect(rx).await;
    let error = events
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TaskError { error, .. } => Some(Arc::clone(error)),
            _ => None,
        })
        .expect("error event");
    match error.as_ref() {
        Error::TaskPanicked(msg) => assert!(msg.contains("handler exploded")),
        other => panic!("expected TaskPanicked, got {other:?}"),
    }
    assert!(matches!(events.last(), Some(SchedulerEvent::Finish)));
}

#[tokio::test]
async fn tasks_added_while_running_are_picked_up() {
    let scheduler = TaskScheduler::new(2);
    let rx = scheduler.subscribe();

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
    scheduler
        .add_tasks([NewTask::new("slow", 0, move |_| {
            let release_rx = Arc::clone(&release_rx);
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            }
        })])
        .unwrap();
    scheduler.start();

    // The slow task keeps the scheduler alive while we add more work
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!scheduler.is_finished());
    scheduler
        .add_tasks([ok_task("late-1", 0), ok_task("late-2", 0)])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    release_tx.send(()).unwrap();

    let events = collect(rx).await;
    let mut names: Vec<_> = finishes(&events).into_iter().map(|t| t.payload).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["late-1", "late-2", "slow"]);
    assert_eq!(scheduler.stats().total, 3);
}

#[tokio::test]
async fn add_after_finish_is_rejected_and_start_is_idempotent() {
    let scheduler = TaskScheduler::new(1);
    scheduler.add_tasks([ok_task("only", 0)]).unwrap();
    scheduler.start();
    scheduler.start();
    scheduler.wait_finished().await;

    assert!(matches!(
        scheduler.add_tasks([ok_task("late", 0)]),
        Err(Error::SchedulerFinished)
    ));
    assert_eq!(scheduler.stats().finished, 1);

    // A late subscriber sees a closed channel, never a second finish
    let mut rx = scheduler.subscribe();
    assert!(rx.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_added_while_finishing_is_run_or_rejected() {
    for round in 0..2000 {
        let scheduler = TaskScheduler::new(2);
        let rx = scheduler.subscribe();
        scheduler.add_tasks([ok_task("first", 0)]).unwrap();
        scheduler.start();

        // Races the driver's "nothing left" check
        let late = scheduler.clone();
        let adder = tokio::spawn(async move {
            tokio::task::yield_now().await;
            late.add_tasks([ok_task("late", 0)])
        });

        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(SchedulerEvent::Finish)));
        let ran_late = finishes(&events).iter().any(|t| t.payload == "late");

        match adder.await.unwrap() {
            Ok(_) => assert!(ran_late, "round {round}: accepted task never ran"),
            Err(e) => {
                assert!(matches!(e, Error::SchedulerFinished), "round {round}: {e:?}");
                assert!(!ran_late);
            }
        }

        let stats = scheduler.stats();
        assert_eq!(stats.total, stats.finished + stats.dropped, "round {round}");
        assert_eq!(stats.queued, 0);
    }
}

#[tokio::test]
async fn accounting_covers_every_task() {
    let scheduler = TaskScheduler::new(4);
    scheduler.configure(4, retry_limit_policy(1));
    let rx = scheduler.subscribe();

    // Even payloads succeed, odd ones always fail
    let tasks = (0..30_i64).map(|n| {
        NewTask::new(n, -n, |n: i64| async move {
            if n % 2 == 0 {
                Ok(())
            } else {
                Err(Error::Other(format!("task {n} failed")))
            }
        })
    });
    scheduler.add_tasks(tasks).unwrap();
    scheduler.start();

    let events = collect(rx).await;
    let finished = finishes(&events).len();
    let dropped = events
        .iter()
        .filter(|e| matches!(e, SchedulerEvent::TaskDrop { .. }))
        .count();

    assert_eq!(finished, 15);
    assert_eq!(dropped, 15);
    assert_eq!(finished + dropped, 30);

    // Each failing task failed exactly twice (limit 1 => second failure drops)
    let mut failures: HashMap<i64, usize> = HashMap::new();
    for (task, _) in errors(&events) {
        *failures.entry(task.payload).or_default() += 1;
    }
    assert!(failures.values().all(|&n| n == 2), "{failures:?}");

    let stats = scheduler.stats();
    assert_eq!(
        stats,
        SchedulerStats {
            queued: 0,
            in_flight: 0,
            finished: 15,
            dropped: 15,
            total: 30,
        }
    );
}

#[tokio::test]
async fn cancellation_aborts_in_flight_and_emits_cancelled() {
    let token = CancellationToken::new();
    let scheduler = TaskScheduler::with_cancellation(2, token.clone());
    let rx = scheduler.subscribe();

    let tasks = (0..5).map(|n| {
        NewTask::new(n, -n, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
    });
    scheduler.add_tasks(tasks).unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let events = collect(rx).await;
    assert!(matches!(
        events.as_slice(),
        [SchedulerEvent::Cancelled {
            queued: 3,
            in_flight: 2
        }]
    ));
    scheduler.wait_finished().await;
    assert!(matches!(
        scheduler.add_tasks([NewTask::new(9, 0, |_| async { Ok(()) })]),
        Err(Error::ShuttingDown)
    ));
}

#[tokio::test]
async fn instances_are_independent() {
    let first = TaskScheduler::new(1);
    let second = TaskScheduler::new(1);

    first
        .add_tasks([ok_task("a", 0), ok_task("b", 0)])
        .unwrap();
    second.add_tasks([ok_task("c", 0)]).unwrap();
    first.start();
    second.start();
    first.wait_finished().await;
    second.wait_finished().await;

    assert_eq!(first.stats().finished, 2);
    assert_eq!(second.stats().finished, 1);
    assert_eq!(second.stats().total, 1);
}
