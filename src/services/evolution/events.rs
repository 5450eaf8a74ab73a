use crate::models::Conclusion;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber before the slowest one starts lagging.
pub(crate) const EVENT_CAPACITY: usize = 1024;

pub trait Event {
    const NAME: &'static str;
}

// ============================================================
// SampleFailed
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFailedEvent {
    pub chromosome_id: Uuid,
    pub consecutive_failures: u32,
    pub error: String,
}

impl Event for SampleFailedEvent {
    const NAME: &'static str = "SampleFailed";
}

// ============================================================
// EstimatorFailed
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorFailedEvent {
    pub chromosome_id: Uuid,
    pub failures: u32,
}

impl Event for EstimatorFailedEvent {
    const NAME: &'static str = "EstimatorFailed";
}

// ============================================================
// GenerationCompleted
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCompletedEvent {
    pub generation: u32,
    pub best_mean: Option<f64>,
    /// Whether the duration cap ended the generation before the estimates matured.
    pub forced: bool,
}

impl Event for GenerationCompletedEvent {
    const NAME: &'static str = "GenerationCompleted";
}

// ============================================================
// Concluded
// ============================================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcludedEvent {
    pub generations: u32,
    pub conclusion: Conclusion,
}

impl Event for ConcludedEvent {
    const NAME: &'static str = "Concluded";
}

/// Everything observable about a run besides the snapshots themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvolutionEvent {
    SampleFailed(SampleFailedEvent),
    EstimatorFailed(EstimatorFailedEvent),
    GenerationCompleted(GenerationCompletedEvent),
    Concluded(ConcludedEvent),
}

impl EvolutionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SampleFailed(_) => SampleFailedEvent::NAME,
            Self::EstimatorFailed(_) => EstimatorFailedEvent::NAME,
            Self::GenerationCompleted(_) => GenerationCompletedEvent::NAME,
            Self::Concluded(_) => ConcludedEvent::NAME,
        }
    }
}

impl From<SampleFailedEvent> for EvolutionEvent {
    fn from(event: SampleFailedEvent) -> Self {
        Self::SampleFailed(event)
    }
}

impl From<EstimatorFailedEvent> for EvolutionEvent {
    fn from(event: EstimatorFailedEvent) -> Self {
        Self::EstimatorFailed(event)
    }
}

impl From<GenerationCompletedEvent> for EvolutionEvent {
    fn from(event: GenerationCompletedEvent) -> Self {
        Self::GenerationCompleted(event)
    }
}

impl From<ConcludedEvent> for EvolutionEvent {
    fn from(event: ConcludedEvent) -> Self {
        Self::Concluded(event)
    }
}

/// Fire-and-forget publisher. Publishing without subscribers is not an error.
#[derive(Debug, Clone)]
pub(crate) struct Publisher {
    sender: broadcast::Sender<EvolutionEvent>,
}

impl Publisher {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub(crate) fn publish(&self, event: impl Into<EvolutionEvent>) {
        let event = event.into();
        tracing::trace!(event = event.name(), "Publishing event");
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EvolutionEvent> {
        self.sender.subscribe()
    }
}
