//! Prompt assembly for scene requests.

use crate::model::SceneRequest;
use crate::narrative::ElementKind;

const NEGATIVE_PROMPT: &str = "text, watermark, caption, blurry, deformed, duplicate figures";

/// Rendered prompt for one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenePrompt {
    pub prompt: String,
    pub negative: String,
    /// Stable seed so regenerating a sentence yields the same framing.
    pub seed: u64,
}

impl ScenePrompt {
    /// Build a deterministic prompt from the request's fragments and its
    /// element snapshot. Settings come first, then characters and objects.
    pub fn from_request(request: &SceneRequest) -> Self {
        let mut parts: Vec<String> = Vec::new();

        let settings: Vec<String> = request
            .elements
            .iter()
            .filter(|e| e.kind == ElementKind::Setting)
            .map(|e| e.describe())
            .collect();
        if !settings.is_empty() {
            parts.push(format!("Setting: {}", settings.join("; ")));
        }

        for fragment in &request.fragments {
            let fragment = fragment.trim();
            if !fragment.is_empty() {
                parts.push(fragment.to_string());
            }
        }

        let subjects: Vec<String> = request
            .elements
            .iter()
            .filter(|e| e.kind != ElementKind::Setting)
            .map(|e| format!("{} {}", e.kind.name(), e.describe()))
            .collect();
        if !subjects.is_empty() {
            parts.push(format!("Featuring: {}", subjects.join("; ")));
        }

        Self {
            prompt: parts.join(". "),
            negative: NEGATIVE_PROMPT.to_string(),
            seed: seed_for(&request.sentence.id, request.sentence.seq),
        }
    }
}

// FNV-1a; std's hasher is not stable across releases.
fn seed_for(id: &str, seq: u64) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes().iter().chain(seq.to_le_bytes().iter()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QualityTier, RequestPriority, SentenceRef};
    use crate::narrative::{AttributeMap, NarrativeElement};

    fn request(elements: Vec<NarrativeElement>) -> SceneRequest {
        SceneRequest {
            sentence: SentenceRef::at(4),
            fragments: vec!["rain on the window ".into(), "".into()],
            elements,
            tier: QualityTier::High,
            priority: RequestPriority {
                urgent: false,
                element_count: 0,
                seq: 4,
                distance: 0,
            },
        }
    }

    #[test]
    fn test_prompt_orders_settings_first() {
        let mut attrs = AttributeMap::new();
        attrs.insert("color".into(), "blue".into());
        let prompt = ScenePrompt::from_request(&request(vec![
            NarrativeElement::new(ElementKind::Character, "dog", attrs),
            NarrativeElement::minimal(ElementKind::Setting, "kitchen"),
        ]));
        assert_eq!(
            prompt.prompt,
            "Setting: kitchen. rain on the window. Featuring: character dog (color: blue)"
        );
    }

    #[test]
    fn test_seed_is_stable() {
        let a = ScenePrompt::from_request(&request(Vec::new()));
        let b = ScenePrompt::from_request(&request(Vec::new()));
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.prompt, "rain on the window");
    }
}
