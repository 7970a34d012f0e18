use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use super::protocol::{Job, PinUpdate, RequestId, Response};
use crate::error::{EngineError, Result};
use crate::graph::Graph;

struct RetainedLayout {
    graph: Graph,
    width: f32,
    height: f32,
}

/// Finished layouts kept so later pin changes can relax them again without a re-send.
pub(crate) struct LayoutStore {
    capacity: usize,
    layouts: HashMap<RequestId, RetainedLayout>,
    order: VecDeque<RequestId>,
}

impl LayoutStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            layouts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Keeps the graph of a successful layout or resume job.
    pub(crate) fn remember(&mut self, id: RequestId, job: &Job, result: &Result<Response>) {
        if self.capacity == 0 {
            return;
        }
        let (width, height) = match job {
            Job::Layout { width, height, .. } | Job::Resume { width, height, .. } => {
                (*width, *height)
            }
            Job::Cluster { .. } | Job::Optimize { .. } => return,
        };
        let Ok(Response::Layout(layout)) = result else {
            return;
        };

        self.layouts.insert(
            id,
            RetainedLayout {
                graph: layout.graph.clone(),
                width,
                height,
            },
        );
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.layouts.remove(&evicted);
                debug!("evicted retained layout {evicted}");
            }
        }
    }

    /// Records a pin change against a finished layout. Returns `false` if none is retained.
    pub(crate) fn record_pin(&mut self, id: RequestId, update: &PinUpdate) -> bool {
        let Some(layout) = self.layouts.get_mut(&id) else {
            return false;
        };
        if let Err(error) = update.apply_to(&mut layout.graph) {
            warn!("request {id}: ignoring pin change for {}: {error}", update.node());
        }
        true
    }

    /// Builds a job that continues layout `id` after applying `updates`.
    pub(crate) fn resume_job(&self, id: RequestId, updates: &[PinUpdate]) -> Result<Job> {
        let layout = self
            .layouts
            .get(&id)
            .ok_or(EngineError::UnknownLayout(id))?;
        let mut graph = layout.graph.clone();
        for update in updates {
            if let Err(error) = update.apply_to(&mut graph) {
                warn!("request {id}: ignoring pin change for {}: {error}", update.node());
            }
        }
        Ok(Job::Resume {
            graph,
            width: layout.width,
            height: layout.height,
        })
    }

    pub(crate) fn forget(&mut self, id: RequestId) -> bool {
        self.order.retain(|kept| *kept != id);
        self.layouts.remove(&id).is_some()
    }
}

pub(crate) type SharedLayouts = Arc<Mutex<LayoutStore>>;

pub(crate) fn lock(layouts: &SharedLayouts) -> MutexGuard<'_, LayoutStore> {
    layouts.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use emath::vec2;

    use super::*;
    use crate::engine::LayoutResult;
    use crate::graph::{Category, Node};

    fn layout_of(ids: &[&str]) -> (Job, Result<Response>) {
        let nodes = ids
            .iter()
            .map(|id| Node::new(*id, Category::Address))
            .collect::<Vec<_>>();
        let graph = Graph::from_parts(nodes, Vec::new()).0;
        let job = Job::Layout {
            graph: graph.clone(),
            width: 400.0,
            height: 300.0,
        };
        let result = Ok(Response::Layout(LayoutResult {
            graph,
            cluster_map: None,
            ticks: 1,
            settled: true,
        }));
        (job, result)
    }

    #[test]
    fn oldest_layouts_are_evicted() {
        let mut store = LayoutStore::new(2);
        for id in 1..=3 {
            let (job, result) = layout_of(&["a"]);
            store.remember(RequestId(id), &job, &result);
        }

        assert!(matches!(
            store.resume_job(RequestId(1), &[]),
            Err(EngineError::UnknownLayout(RequestId(1)))
        ));
        assert!(store.resume_job(RequestId(3), &[]).is_ok());
        assert!(store.forget(RequestId(2)));
        assert!(!store.forget(RequestId(2)));
    }

    #[test]
    fn recorded_pins_carry_into_resume() {
        let mut store = LayoutStore::new(4);
        let (job, result) = layout_of(&["a", "b"]);
        store.remember(RequestId(7), &job, &result);

        let pin = PinUpdate::Pin {
            node: "a".to_owned(),
            position: vec2(3.0, 4.0),
        };
        assert!(store.record_pin(RequestId(7), &pin));
        assert!(!store.record_pin(RequestId(8), &pin));

        let nan = PinUpdate::Pin {
            node: "b".to_owned(),
            position: vec2(f32::NAN, 0.0),
        };
        let Ok(Job::Resume { graph, width, .. }) = store.resume_job(RequestId(7), &[nan]) else {
            panic!("expected a resume job");
        };
        assert_eq!(width, 400.0);
        assert_eq!(graph.node("a").unwrap().fixed_x, Some(3.0));
        assert!(!graph.node("b").unwrap().is_pinned());
    }
}
