//! Scoped execution context.
//!
//! A [`Session`] borrows a graph and owns a private snapshot of parameter
//! values. Loading a checkpoint into a session never touches the network's
//! own parameters.

use crate::engine::checkpoint::{self, Checkpoint};
use crate::engine::graph::{Evaluation, Feeds, Gradients, Graph, NodeId};
use crate::engine::params::ParamStore;
use crate::error::Result;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session<'g> {
    id: u64,
    graph: &'g Graph,
    params: ParamStore,
}

impl<'g> Session<'g> {
    pub fn new(graph: &'g Graph, params: ParamStore) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, params = params.len(), "Session opened");
        Self { id, graph, params }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    /// Hand the parameter snapshot back, ending the session.
    pub fn into_params(mut self) -> ParamStore {
        std::mem::take(&mut self.params)
    }

    /// Evaluate `fetches` and keep every intermediate value.
    pub fn evaluate(&self, feeds: &Feeds<'_>, fetches: &[NodeId]) -> Result<Evaluation> {
        self.graph.forward(&self.params, feeds, fetches)
    }

    /// Evaluate a single node and return its value.
    pub fn run(&self, feeds: &Feeds<'_>, fetch: NodeId) -> Result<ndarray::ArrayD<f32>> {
        self.evaluate(feeds, &[fetch])?.take(fetch)
    }

    /// Gradients of the scalar node `seed` for an evaluation of this session.
    pub fn gradients(&self, eval: &Evaluation, seed: NodeId) -> Result<Gradients> {
        self.graph.backward(eval, &self.params, seed)
    }

    pub fn load_params(&mut self, addr: &Path) -> Result<Checkpoint> {
        let checkpoint = checkpoint::restore(addr, &mut self.params)?;
        tracing::debug!(
            session = self.id,
            addr = %addr.display(),
            epoch = checkpoint.epoch,
            "Parameters loaded"
        );
        Ok(checkpoint)
    }

    pub fn save_params(&self, addr: &Path, epoch: usize, loss: Option<f64>) -> Result<Checkpoint> {
        checkpoint::save(addr, &self.params, epoch, loss)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        tracing::debug!(session = self.id, "Session released");
    }
}
