use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chainviz_layout::engine::LayoutFrame;
use chainviz_layout::graph::{Category, Graph, Node};
use chainviz_layout::worker::{Executor, Job, JobContext, Response};
use chainviz_layout::{
    Coordinator, EngineConfig, EngineError, ExecutionMode, LayoutResult, PinUpdate,
};
use emath::vec2;

/// Behaves according to the id of the first node in a layout job.
struct Scripted;

impl Executor for Scripted {
    fn execute(&self, job: &Job, ctx: &mut JobContext<'_>) -> chainviz_layout::Result<Response> {
        let Job::Layout { graph, width, .. } = job else {
            return Err(EngineError::UnexpectedResponse);
        };
        let mut graph = graph.clone();
        let script = graph
            .nodes()
            .first()
            .map(|node| node.id.clone())
            .unwrap_or_default();

        match script.as_str() {
            "stall" => thread::sleep(Duration::from_secs(3)),
            "panic" => panic!("scripted worker failure"),
            "wait-for-pin" => {
                for _ in 0..200 {
                    if let Some(PinUpdate::Pin { node, position }) = ctx.take_pins().pop()
                        && let Some(index) = graph.index_of(&node)
                    {
                        graph.nodes_mut()[index].pin(position);
                        break;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
            _ => thread::sleep(Duration::from_millis(*width as u64)),
        }

        ctx.report(LayoutFrame {
            tick: 1,
            alpha: 0.5,
            positions: Vec::new(),
        });
        Ok(Response::Layout(LayoutResult {
            graph,
            cluster_map: None,
            ticks: *width as usize,
            settled: true,
        }))
    }
}

fn single(id: &str) -> Graph {
    Graph::from_parts(vec![Node::new(id, Category::Address)], Vec::new()).0
}

fn coordinator(workers: usize, timeout: Duration) -> Coordinator {
    let mut config = EngineConfig::default();
    config.coordinator.workers = workers;
    config.coordinator.request_timeout = timeout;
    Coordinator::with_executor(config, Arc::new(Scripted))
}

#[test]
fn stalled_request_times_out_and_worker_recovers() {
    let coordinator = coordinator(1, Duration::from_millis(200));
    assert_eq!(coordinator.mode(), ExecutionMode::BackgroundCapable);

    let started = Instant::now();
    let stalled = coordinator.calculate_layout(single("stall"), 0.0, 0.0);
    let id = stalled.id();
    match stalled.wait() {
        Err(EngineError::RequestTimeout { id: timed_out, .. }) => assert_eq!(timed_out, id),
        Err(other) => panic!("expected a timeout, got {other}"),
        Ok(_) => panic!("expected a timeout"),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(180), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");

    let next = coordinator
        .calculate_layout(single("ok"), 5.0, 0.0)
        .wait()
        .expect("fresh worker answers");
    assert_eq!(next.ticks, 5);
}

#[test]
fn crashed_worker_fails_its_request_and_restarts() {
    let coordinator = coordinator(1, Duration::from_secs(5));

    let crashed = coordinator.calculate_layout(single("panic"), 0.0, 0.0);
    let id = crashed.id();
    match crashed.wait() {
        Err(EngineError::WorkerCrashed { id: failed }) => assert_eq!(failed, id),
        Err(other) => panic!("expected a crash, got {other}"),
        Ok(_) => panic!("expected a crash"),
    }

    let next = coordinator
        .calculate_layout(single("ok"), 1.0, 0.0)
        .wait()
        .expect("restarted worker answers");
    assert_eq!(next.ticks, 1);
}

#[test]
fn responses_resolve_their_own_requests_out_of_order() {
    let coordinator = coordinator(2, Duration::from_secs(5));

    let mut slow = coordinator.calculate_layout(single("slow"), 400.0, 0.0);
    let mut fast = coordinator.calculate_layout(single("fast"), 5.0, 0.0);

    let fast_result = fast
        .wait_timeout(Duration::from_secs(2))
        .expect("fast request finishes first")
        .expect("fast request succeeds");
    assert!(slow.try_result().is_none());
    assert_eq!(fast_result.graph.nodes()[0].id, "fast");
    assert_eq!(fast_result.ticks, 5);

    let slow_result = slow
        .wait_timeout(Duration::from_secs(2))
        .expect("slow request finishes")
        .expect("slow request succeeds");
    assert_eq!(slow_result.graph.nodes()[0].id, "slow");
    assert_eq!(slow_result.ticks, 400);
}

#[test]
fn pin_reaches_running_layout() {
    let coordinator = coordinator(1, Duration::from_secs(5));

    let pending = coordinator.calculate_layout(single("wait-for-pin"), 0.0, 0.0);
    coordinator
        .pin(
            pending.id(),
            PinUpdate::Pin {
                node: "wait-for-pin".to_owned(),
                position: vec2(12.0, -4.0),
            },
        )
        .expect("coordinator is running");

    let result = pending.wait().expect("layout succeeds");
    let node = &result.graph.nodes()[0];
    assert_eq!(node.fixed_x, Some(12.0));
    assert_eq!(node.fixed_y, Some(-4.0));
}

#[test]
fn synchronous_mode_answers_immediately() {
    let mut config = EngineConfig::default();
    config.coordinator.force_synchronous = true;
    let coordinator = Coordinator::with_executor(config, Arc::new(Scripted));
    assert_eq!(coordinator.mode(), ExecutionMode::SynchronousOnly);

    let mut pending = coordinator.calculate_layout(single("ok"), 0.0, 0.0);
    assert!(!pending.progress().is_empty());
    let result = pending
        .try_result()
        .expect("inline result is ready")
        .expect("inline layout succeeds");
    assert_eq!(result.graph.node_count(), 1);
    assert!(pending.try_result().is_none());
}

#[test]
fn shutdown_rejects_pending_and_later_requests() {
    let mut coordinator = coordinator(1, Duration::from_secs(5));

    let pending = coordinator.calculate_layout(single("slow"), 500.0, 0.0);
    // Let the dispatcher hand the job to the worker before shutting down.
    thread::sleep(Duration::from_millis(50));
    coordinator.shutdown();
    assert!(matches!(pending.wait(), Err(EngineError::ShutDown)));

    let later = coordinator.calculate_layout(single("ok"), 1.0, 0.0);
    assert!(matches!(
        coordinator.pin(
            later.id(),
            PinUpdate::Release {
                node: "ok".to_owned()
            }
        ),
        Err(EngineError::ShutDown)
    ));
    assert!(matches!(later.wait(), Err(EngineError::ShutDown)));
}

#[test]
fn default_executor_runs_the_real_engine() {
    let coordinator = Coordinator::start(EngineConfig::default());
    let graph = Graph::from_parts(
        vec![
            Node::new("a", Category::Address).at(590.0, 400.0),
            Node::new("b", Category::Address).at(610.0, 400.0),
        ],
        vec![chainviz_layout::Link::new("a", "b", 1.0)],
    )
    .0;

    let result = coordinator
        .calculate_layout(graph, 1200.0, 800.0)
        .wait()
        .expect("layout succeeds");
    assert!(result.settled);
    assert!(result.nodes().iter().all(|node| node.position.is_finite()));
}

fn linked_pair() -> Graph {
    Graph::from_parts(
        vec![
            Node::new("a", Category::Address).at(590.0, 400.0),
            Node::new("b", Category::Address).at(610.0, 400.0),
        ],
        vec![chainviz_layout::Link::new("a", "b", 1.0)],
    )
    .0
}

fn pin_after_settle_then_resume(coordinator: &Coordinator) {
    let pending = coordinator.calculate_layout(linked_pair(), 1200.0, 800.0);
    let id = pending.id();
    let first = pending.wait().expect("layout succeeds");
    assert!(first.settled);

    coordinator
        .pin(
            id,
            PinUpdate::Pin {
                node: "a".to_owned(),
                position: vec2(5.0, 5.0),
            },
        )
        .expect("coordinator is running");
    let mut resumed = coordinator.resume(id, Vec::new());
    let result = resumed
        .wait_timeout(Duration::from_secs(5))
        .expect("resume finishes")
        .expect("resume succeeds");

    assert!(result.settled);
    assert!(result.ticks > 0 && result.ticks < first.ticks);
    assert_eq!(result.graph.node("a").unwrap().position, vec2(5.0, 5.0));
    let b = result.graph.node("b").unwrap().position;
    assert!((b - vec2(5.0, 5.0)).length() < (first.graph.node("b").unwrap().position - vec2(5.0, 5.0)).length());

    // The resumed result is retained too and accepts further changes.
    let released = coordinator
        .resume(
            resumed.id(),
            vec![PinUpdate::Release {
                node: "a".to_owned(),
            }],
        )
        .wait()
        .expect("second resume succeeds");
    assert!(!released.graph.node("a").unwrap().is_pinned());
}

#[test]
fn settled_layout_resumes_after_pin() {
    let coordinator = Coordinator::start(EngineConfig::default());
    pin_after_settle_then_resume(&coordinator);
}

#[test]
fn settled_layout_resumes_after_pin_inline() {
    let mut config = EngineConfig::default();
    config.coordinator.force_synchronous = true;
    let coordinator = Coordinator::start(config);
    pin_after_settle_then_resume(&coordinator);
}

#[test]
fn resume_needs_a_retained_layout() {
    let coordinator = Coordinator::start(EngineConfig::default());
    let missing = chainviz_layout::RequestId(404);
    assert!(matches!(
        coordinator.resume(missing, Vec::new()).wait(),
        Err(EngineError::UnknownLayout(id)) if id == missing
    ));

    let pending = coordinator.calculate_layout(linked_pair(), 1200.0, 800.0);
    let id = pending.id();
    pending.wait().expect("layout succeeds");
    assert!(coordinator.release_layout(id));
    assert!(matches!(
        coordinator.resume(id, Vec::new()).wait(),
        Err(EngineError::UnknownLayout(_))
    ));
}
