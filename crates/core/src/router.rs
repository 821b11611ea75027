use crate::embeddings::Embedder;
use crate::error::PipelineError;
use crate::models::CollectionProfile;

/// Routes a question embedding to the collections worth searching. Each
/// profile's description strings are embedded once at construction and
/// averaged into a centroid.
pub struct CollectionRouter {
    threshold: f32,
    profiles: Vec<RoutingProfile>,
}

struct RoutingProfile {
    name: String,
    centroid: Vec<f32>,
}

impl CollectionRouter {
    pub fn new(
        profiles: &[CollectionProfile],
        embedder: &dyn Embedder,
        threshold: f32,
    ) -> Result<Self, PipelineError> {
        if profiles.is_empty() {
            return Err(PipelineError::Validation(
                "at least one collection profile is required for routing".to_string(),
            ));
        }

        let mut routing = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if profile.descriptions.is_empty() {
                return Err(PipelineError::Validation(format!(
                    "collection profile '{}' has no descriptions",
                    profile.name
                )));
            }
            let vectors = embedder.embed_batch(&profile.descriptions);
            routing.push(RoutingProfile {
                name: profile.name.clone(),
                centroid: mean_vector(&vectors),
            });
        }

        Ok(Self {
            threshold,
            profiles: routing,
        })
    }

    /// Every collection whose centroid similarity clears the threshold, or
    /// the single closest one when none does. Never empty.
    pub fn select_collections(&self, question_vector: &[f32]) -> Vec<String> {
        let scored = self.similarities(question_vector);

        let selected: Vec<String> = scored
            .iter()
            .filter(|(_, similarity)| *similarity >= self.threshold)
            .map(|(name, _)| name.clone())
            .collect();
        if !selected.is_empty() {
            return selected;
        }

        scored
            .into_iter()
            .max_by(|left, right| left.1.total_cmp(&right.1))
            .map(|(name, _)| vec![name])
            .unwrap_or_default()
    }

    /// Cosine similarity of the question against every profile centroid.
    pub fn similarities(&self, question_vector: &[f32]) -> Vec<(String, f32)> {
        self.profiles
            .iter()
            .map(|profile| {
                (
                    profile.name.clone(),
                    cosine_similarity(question_vector, &profile.centroid),
                )
            })
            .collect()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let length = left.len().min(right.len());
    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for index in 0..length {
        dot += left[index] * right[index];
        left_norm += left[index] * left[index];
        right_norm += right[index] * right[index];
    }

    let magnitude = left_norm.sqrt() * right_norm.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    dot / magnitude
}

fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let mut mean = vec![0f32; first.len()];
    for vector in vectors {
        for (slot, value) in mean.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    for slot in &mut mean {
        *slot /= vectors.len() as f32;
    }
    mean
}
