use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use emath::Vec2;

use crate::cluster::ClusterOutcome;
use crate::engine::{LayoutFrame, LayoutResult};
use crate::error::{EngineError, Result};
use crate::graph::{Graph, NodeId};
use crate::optimize::{OptimizeOptions, OptimizeOutcome};

/// Correlates a submitted job with its eventual response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub enum Job {
    Layout {
        graph: Graph,
        width: f32,
        height: f32,
    },
    Cluster {
        graph: Graph,
        distance: Option<f32>,
    },
    Optimize {
        graph: Graph,
        options: OptimizeOptions,
    },
    /// Relaxes a retained layout again after pin changes.
    Resume {
        graph: Graph,
        width: f32,
        height: f32,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Layout { .. } => "layout",
            Self::Cluster { .. } => "cluster",
            Self::Optimize { .. } => "optimize",
            Self::Resume { .. } => "resume",
        }
    }
}

pub enum Response {
    Layout(LayoutResult),
    Cluster(ClusterOutcome),
    Optimize(OptimizeOutcome),
}

impl TryFrom<Response> for LayoutResult {
    type Error = EngineError;

    fn try_from(response: Response) -> Result<Self> {
        match response {
            Response::Layout(result) => Ok(result),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }
}

impl TryFrom<Response> for ClusterOutcome {
    type Error = EngineError;

    fn try_from(response: Response) -> Result<Self> {
        match response {
            Response::Cluster(outcome) => Ok(outcome),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }
}

impl TryFrom<Response> for OptimizeOutcome {
    type Error = EngineError;

    fn try_from(response: Response) -> Result<Self> {
        match response {
            Response::Optimize(outcome) => Ok(outcome),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }
}

/// Interactive pin change forwarded to a running layout.
#[derive(Clone, Debug, PartialEq)]
pub enum PinUpdate {
    Pin { node: NodeId, position: Vec2 },
    Release { node: NodeId },
}

impl PinUpdate {
    pub fn node(&self) -> &str {
        match self {
            Self::Pin { node, .. } | Self::Release { node } => node,
        }
    }

    /// Writes the change into a graph that no simulation is running on.
    pub fn apply_to(&self, graph: &mut Graph) -> Result<()> {
        let node = graph
            .node_mut(self.node())
            .ok_or_else(|| EngineError::UnknownNode(self.node().to_owned()))?;
        match self {
            Self::Pin { position, .. } => {
                if !position.is_finite() {
                    return Err(EngineError::InvalidPin(node.id.clone()));
                }
                node.pin(*position);
                node.position = *position;
                node.velocity = Vec2::ZERO;
            }
            Self::Release { .. } => node.release(),
        }
        Ok(())
    }
}

/// Handle to a submitted job. Resolves exactly once.
pub struct Pending<T> {
    id: RequestId,
    reply: Receiver<Result<Response>>,
    progress: Receiver<LayoutFrame>,
    taken: bool,
    _output: std::marker::PhantomData<fn() -> T>,
}

impl<T> Pending<T>
where
    T: TryFrom<Response, Error = EngineError>,
{
    pub(crate) fn new(
        id: RequestId,
        reply: Receiver<Result<Response>>,
        progress: Receiver<LayoutFrame>,
    ) -> Self {
        Self {
            id,
            reply,
            progress,
            taken: false,
            _output: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    fn resolve(&mut self, response: Result<Response>) -> Result<T> {
        self.taken = true;
        response.and_then(T::try_from)
    }

    /// Returns the result once available. Later calls return `None`.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        if self.taken {
            return None;
        }
        match self.reply.try_recv() {
            Ok(response) => Some(self.resolve(response)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.resolve(Err(EngineError::ShutDown))),
        }
    }

    pub fn wait(mut self) -> Result<T> {
        let response = self.reply.recv().unwrap_or(Err(EngineError::ShutDown));
        self.resolve(response)
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<T>> {
        if self.taken {
            return None;
        }
        match self.reply.recv_timeout(timeout) {
            Ok(response) => Some(self.resolve(response)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.resolve(Err(EngineError::ShutDown))),
        }
    }

    /// Drains the frames streamed since the last call.
    pub fn progress(&self) -> Vec<LayoutFrame> {
        self.progress.try_iter().collect()
    }
}
