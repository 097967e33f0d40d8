//! Core data types shared across the pipeline.

use crate::narrative::NarrativeElement;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reference to one narrated sentence within a book.
///
/// The sequence number is the only ordering key; the id is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentenceRef {
    /// Opaque identifier assigned by the content parser.
    pub id: String,
    /// Monotonically increasing position within the book.
    pub seq: u64,
}

impl SentenceRef {
    /// Create a new sentence reference.
    pub fn new(id: impl Into<String>, seq: u64) -> Self {
        Self { id: id.into(), seq }
    }

    /// Convenience constructor using the sequence number as id.
    pub fn at(seq: u64) -> Self {
        Self::new(format!("s{seq}"), seq)
    }
}

impl PartialOrd for SentenceRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SentenceRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for SentenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.seq, self.id)
    }
}

/// Discrete fidelity/cost level for generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Fast, low-resolution preview quality.
    Draft,
    /// Balanced quality.
    Standard,
    /// Full quality.
    #[default]
    High,
}

impl QualityTier {
    /// All tiers from lowest to highest.
    pub const ALL: [QualityTier; 3] = [QualityTier::Draft, QualityTier::Standard, QualityTier::High];

    /// The next tier down, saturating at `Draft`.
    pub fn lower(self) -> Self {
        match self {
            QualityTier::High => QualityTier::Standard,
            QualityTier::Standard | QualityTier::Draft => QualityTier::Draft,
        }
    }

    /// Output resolution for this tier.
    pub fn resolution(self) -> (u32, u32) {
        match self {
            QualityTier::Draft => (768, 432),
            QualityTier::Standard => (1280, 720),
            QualityTier::High => (1920, 1080),
        }
    }

    /// Sampler steps for this tier.
    pub fn steps(self) -> u32 {
        match self {
            QualityTier::Draft => 8,
            QualityTier::Standard => 20,
            QualityTier::High => 32,
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Draft => "draft",
            QualityTier::Standard => "standard",
            QualityTier::High => "high",
        }
    }
}

/// Priority of a scene request. Greater values are dispatched first.
///
/// Ordering: urgent requests first, then requests with narrative elements,
/// then the lower sequence number, then the higher element count, then
/// the shorter distance. Every field takes part, so equality agrees with
/// the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestPriority {
    /// Within the urgent horizon of the current position.
    pub urgent: bool,
    /// Number of narrative elements referenced by the sentence.
    pub element_count: usize,
    /// Sentence sequence number.
    pub seq: u64,
    /// Distance from the current position when the request was built.
    pub distance: u64,
}

impl RequestPriority {
    /// Whether the sentence carries any narrative element.
    pub fn has_elements(&self) -> bool {
        self.element_count > 0
    }
}

impl PartialOrd for RequestPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RequestPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgent
            .cmp(&other.urgent)
            .then_with(|| self.has_elements().cmp(&other.has_elements()))
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.element_count.cmp(&other.element_count))
            .then_with(|| other.distance.cmp(&self.distance))
    }
}

/// A request to generate the scene for one sentence.
///
/// The element list is a snapshot taken at build time; later updates to
/// the narrative context do not change an in-flight request.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub sentence: SentenceRef,
    pub fragments: Vec<String>,
    pub elements: Vec<NarrativeElement>,
    pub tier: QualityTier,
    pub priority: RequestPriority,
}

impl SceneRequest {
    /// Number of resolved narrative elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Narrative element density in `[0, 1]`, used as cache priority.
    pub fn density(&self) -> f64 {
        element_density(self.elements.len())
    }
}

/// Element count at which density saturates.
const DENSITY_SATURATION: usize = 4;

/// Map an element count onto `[0, 1]`.
pub fn element_density(count: usize) -> f64 {
    (count.min(DENSITY_SATURATION) as f64) / DENSITY_SATURATION as f64
}

/// Image encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpeg,
    Png,
}

impl From<scenegen::ImageFormat> for ImageFormat {
    fn from(format: scenegen::ImageFormat) -> Self {
        match format {
            scenegen::ImageFormat::Webp => ImageFormat::Webp,
            scenegen::ImageFormat::Jpeg => ImageFormat::Jpeg,
            scenegen::ImageFormat::Png => ImageFormat::Png,
        }
    }
}

/// Metadata describing a generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub compression_ratio: f32,
}

/// A generated scene for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScene {
    pub sentence: SentenceRef,
    pub payload: Vec<u8>,
    pub metadata: SceneMetadata,
    pub generation_time: Duration,
    /// Tier actually delivered, possibly lower than requested.
    pub tier: QualityTier,
}

impl GeneratedScene {
    /// Payload size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Visual transition requested from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Seamless cut to the scene.
    None,
    /// Fade while holding the previous frame.
    Fade,
    /// Cross-dissolve while holding the previous frame.
    Dissolve,
    /// Freeze any running transition.
    Freeze,
}

/// Instruction for the renderer.
///
/// A `None` scene means "hold the previous frame".
#[derive(Debug, Clone)]
pub struct RenderDirective {
    pub sentence: Option<SentenceRef>,
    pub scene: Option<Arc<GeneratedScene>>,
    pub transition: TransitionType,
    pub duration_ms: u32,
}

impl RenderDirective {
    /// Show a cached scene without a transition.
    pub fn show(scene: Arc<GeneratedScene>) -> Self {
        Self {
            sentence: Some(scene.sentence.clone()),
            scene: Some(scene),
            transition: TransitionType::None,
            duration_ms: 0,
        }
    }

    /// Hold the previous frame and run a degraded transition.
    pub fn hold(sentence: SentenceRef, transition: TransitionType, duration_ms: u32) -> Self {
        Self {
            sentence: Some(sentence),
            scene: None,
            transition,
            duration_ms,
        }
    }

    /// Freeze the renderer in place.
    pub fn freeze() -> Self {
        Self {
            sentence: None,
            scene: None,
            transition: TransitionType::Freeze,
            duration_ms: 0,
        }
    }

    /// Whether this directive degrades (no scene available).
    pub fn is_degraded(&self) -> bool {
        self.scene.is_none() && matches!(self.transition, TransitionType::Fade | TransitionType::Dissolve)
    }
}
