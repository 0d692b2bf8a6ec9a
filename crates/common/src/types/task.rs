use std::time::{Duration, Instant};

use crate::error::TheodoreError;
use crate::ids::TaskId;

/// What a unit of LLM work is for. Drives per-call timeout selection and
/// metrics labels; nothing else branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    PageSelection,
    Aggregation,
    Expansion,
    SurfaceAnalysis,
    Embedding,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageSelection => "page_selection",
            Self::Aggregation => "aggregation",
            Self::Expansion => "expansion",
            Self::SurfaceAnalysis => "surface_analysis",
            Self::Embedding => "embedding",
        }
    }
}

/// A completion task submitted to the worker pool. Immutable once built.
#[derive(Clone, Debug)]
pub struct LlmTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub prompt: String,
    /// System context for the provider call.
    pub system: Option<String>,
    /// Hard ceiling on everything this task does: rate-limiter wait,
    /// provider call, and parsing must all finish by this instant.
    pub deadline: Instant,
}

impl LlmTask {
    pub fn new(kind: TaskKind, prompt: String, system: Option<String>, deadline: Instant) -> Self {
        Self {
            task_id: TaskId::new(),
            kind,
            prompt,
            system,
            deadline,
        }
    }
}

/// An embedding task. Travels through the same pool and rate limiter as
/// completions so no provider call ever happens outside a worker.
#[derive(Clone, Debug)]
pub struct EmbeddingTask {
    pub task_id: TaskId,
    pub text: String,
    pub deadline: Instant,
}

impl EmbeddingTask {
    pub fn new(text: String, deadline: Instant) -> Self {
        Self {
            task_id: TaskId::new(),
            text,
            deadline,
        }
    }
}

/// Successful payload of a task: completion text or embedding vector.
#[derive(Clone, Debug)]
pub enum TaskContent {
    Text(String),
    Vector(Vec<f32>),
}

/// Result of one pool-executed task. Exactly one of content or error is
/// present, via the inner Result.
#[derive(Clone, Debug)]
pub struct LlmResult {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub content: Result<TaskContent, TheodoreError>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub duration: Duration,
}

impl LlmResult {
    pub fn success(&self) -> bool {
        self.content.is_ok()
    }

    /// Completion text, or the task's error, or InvalidResponse when the
    /// payload was a vector.
    pub fn text(&self) -> Result<&str, TheodoreError> {
        match &self.content {
            Ok(TaskContent::Text(text)) => Ok(text),
            Ok(TaskContent::Vector(_)) => Err(TheodoreError::invalid_response(
                "expected completion text, got embedding vector",
            )),
            Err(e) => Err(e.clone()),
        }
    }

    /// Embedding vector, or the task's error, or InvalidResponse when the
    /// payload was text.
    pub fn vector(&self) -> Result<&[f32], TheodoreError> {
        match &self.content {
            Ok(TaskContent::Vector(v)) => Ok(v),
            Ok(TaskContent::Text(_)) => Err(TheodoreError::invalid_response(
                "expected embedding vector, got completion text",
            )),
            Err(e) => Err(e.clone()),
        }
    }
}
