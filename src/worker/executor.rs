use log::warn;

use super::protocol::{Job, PinUpdate, RequestId, Response};
use crate::engine::{LayoutEngine, LayoutFrame};
use crate::error::Result;
use crate::physics::Simulation;

/// Where a running job reports frames and picks up pin changes.
pub(crate) trait JobSink {
    fn report(&mut self, frame: LayoutFrame);
    fn take_pins(&mut self) -> Vec<PinUpdate>;
}

pub struct JobContext<'a> {
    id: RequestId,
    sink: &'a mut dyn JobSink,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(id: RequestId, sink: &'a mut dyn JobSink) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn report(&mut self, frame: LayoutFrame) {
        self.sink.report(frame);
    }

    /// Pin changes received since the last call, oldest first.
    pub fn take_pins(&mut self) -> Vec<PinUpdate> {
        self.sink.take_pins()
    }
}

/// Runs one job to completion, on a worker thread or on the caller's.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: &Job, ctx: &mut JobContext<'_>) -> Result<Response>;
}

pub struct EngineExecutor {
    engine: LayoutEngine,
}

impl EngineExecutor {
    pub fn new(engine: LayoutEngine) -> Self {
        Self { engine }
    }
}

fn apply_pin(simulation: &mut Simulation, update: PinUpdate, id: RequestId) {
    let (node, outcome) = match update {
        PinUpdate::Pin { node, position } => {
            let outcome = simulation.pin(&node, position);
            (node, outcome)
        }
        PinUpdate::Release { node } => {
            let outcome = simulation.release(&node);
            (node, outcome)
        }
    };
    if let Err(error) = outcome {
        warn!("request {id}: ignoring pin change for {node}: {error}");
    }
}

/// Applies live pin changes before each tick and streams a frame every `interval` ticks.
fn observe<'a, 'b>(ctx: &'a mut JobContext<'b>, interval: usize) -> impl FnMut(&mut Simulation) {
    let id = ctx.id();
    move |simulation: &mut Simulation| {
        for update in ctx.take_pins() {
            apply_pin(simulation, update, id);
        }
        let ticks = simulation.ticks();
        if ticks > 0 && ticks % interval == 0 {
            ctx.report(LayoutFrame::capture(simulation));
        }
    }
}

impl Executor for EngineExecutor {
    fn execute(&self, job: &Job, ctx: &mut JobContext<'_>) -> Result<Response> {
        match job {
            Job::Layout {
                graph,
                width,
                height,
            } => {
                let interval = self.engine.config().force.progress_interval.max(1);
                let result = self.engine.calculate_layout_with(
                    graph.clone(),
                    *width,
                    *height,
                    observe(ctx, interval),
                );
                Ok(Response::Layout(result))
            }
            Job::Resume {
                graph,
                width,
                height,
            } => {
                let interval = self.engine.config().force.progress_interval.max(1);
                let result = self.engine.resume_layout_with(
                    graph.clone(),
                    *width,
                    *height,
                    observe(ctx, interval),
                );
                Ok(Response::Layout(result))
            }
            Job::Cluster { graph, distance } => {
                Ok(Response::Cluster(self.engine.cluster_nodes(graph, *distance)))
            }
            Job::Optimize { graph, options } => Ok(Response::Optimize(
                self.engine.optimize_network(graph.clone(), options),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use emath::vec2;

    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::{Category, Graph, Link, Node};

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<LayoutFrame>,
        pins: Vec<PinUpdate>,
    }

    impl JobSink for RecordingSink {
        fn report(&mut self, frame: LayoutFrame) {
            self.frames.push(frame);
        }

        fn take_pins(&mut self) -> Vec<PinUpdate> {
            std::mem::take(&mut self.pins)
        }
    }

    fn pair() -> Graph {
        let nodes = vec![
            Node::new("a", Category::Address).at(0.0, 0.0),
            Node::new("b", Category::Address).at(30.0, 0.0),
        ];
        Graph::from_parts(nodes, vec![Link::new("a", "b", 1.0)]).0
    }

    #[test]
    fn layout_applies_pins_and_streams_frames() {
        let executor = EngineExecutor::new(LayoutEngine::new(EngineConfig::default()));
        let mut sink = RecordingSink {
            pins: vec![
                PinUpdate::Pin {
                    node: "a".to_owned(),
                    position: vec2(10.0, 20.0),
                },
                PinUpdate::Release {
                    node: "missing".to_owned(),
                },
            ],
            ..RecordingSink::default()
        };
        let job = Job::Layout {
            graph: pair(),
            width: 400.0,
            height: 400.0,
        };

        let response = executor
            .execute(&job, &mut JobContext::new(RequestId(1), &mut sink))
            .unwrap();
        let Response::Layout(result) = response else {
            panic!("expected a layout response");
        };

        assert_eq!(result.graph.node("a").unwrap().position, vec2(10.0, 20.0));
        assert_eq!(sink.frames.len(), (result.ticks - 1) / 10);
        assert!(sink.frames.windows(2).all(|pair| pair[0].tick < pair[1].tick));
    }

    #[test]
    fn resume_relaxes_from_restart_alpha() {
        let executor = EngineExecutor::new(LayoutEngine::new(EngineConfig::default()));
        let mut sink = RecordingSink::default();
        let first = executor
            .execute(
                &Job::Layout {
                    graph: pair(),
                    width: 400.0,
                    height: 400.0,
                },
                &mut JobContext::new(RequestId(1), &mut sink),
            )
            .unwrap();
        let Response::Layout(first) = first else {
            panic!("expected a layout response");
        };

        let mut graph = first.graph;
        PinUpdate::Pin {
            node: "b".to_owned(),
            position: vec2(300.0, 300.0),
        }
        .apply_to(&mut graph)
        .unwrap();
        let resumed = executor
            .execute(
                &Job::Resume {
                    graph,
                    width: 400.0,
                    height: 400.0,
                },
                &mut JobContext::new(RequestId(2), &mut sink),
            )
            .unwrap();
        let Response::Layout(resumed) = resumed else {
            panic!("expected a layout response");
        };

        assert!(resumed.settled);
        assert!(resumed.ticks > 0 && resumed.ticks < first.ticks);
        assert_eq!(resumed.graph.node("b").unwrap().position, vec2(300.0, 300.0));
    }
}
