//! Local-LLM classifier over the Ollama HTTP API.
//!
//! One generate call per sequence: the prompt carries the first 200bp and
//! asks for a JSON verdict. Responses are parsed JSON-first; when the
//! model rambles in plain text we fall back to scanning for a binomial
//! species name at reduced confidence. Parsing is pure and unit-tested;
//! the HTTP plumbing stays thin.

use crate::backend::{
    BackendDescriptor, ClassifierBackend, ClassifyParams, ClassifyResponse, Prediction,
    SequenceRecord, Taxonomy,
};
use crate::error::BackendError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const PROMPT_SEQUENCE_PREFIX: usize = 200;
/// Confidence assigned when the species had to be scraped out of prose.
const TEXT_FALLBACK_CONFIDENCE: f64 = 0.65;
const DEFAULT_JSON_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama2:7b".to_string(),
        }
    }
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

pub struct OllamaBackend {
    descriptor: BackendDescriptor,
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(descriptor: BackendDescriptor, config: OllamaConfig) -> Self {
        Self {
            descriptor,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// GET /api/tags as a liveness probe.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn classify_one(
        &self,
        seq: &SequenceRecord,
        params: &ClassifyParams,
    ) -> Result<Prediction, BackendError> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = GenerateRequest {
            model: &self.config.model,
            prompt: build_prompt(seq),
            stream: false,
            options: GenerateOptions {
                temperature: params.temperature.unwrap_or(0.3),
                top_p: params.top_p.unwrap_or(0.9),
                num_predict: params.max_tokens.unwrap_or(200),
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "ollama returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        let text = body
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::MalformedResponse("missing 'response' field".to_string())
            })?;

        Ok(parse_species_response(text))
    }
}

#[async_trait]
impl ClassifierBackend for OllamaBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn classify(
        &self,
        sequences: &[SequenceRecord],
        task: &str,
        params: &ClassifyParams,
    ) -> Result<ClassifyResponse, BackendError> {
        if sequences.is_empty() {
            return Err(BackendError::MalformedInput("empty batch".to_string()));
        }
        if !self.is_available().await {
            return Err(BackendError::Unavailable(
                "ollama service not reachable".to_string(),
            ));
        }
        debug!(model = %self.config.model, task, sequences = sequences.len(), "ollama classify");

        let mut predictions = Vec::with_capacity(sequences.len());
        for seq in sequences {
            predictions.push(self.classify_one(seq, params).await?);
        }

        let confidence = predictions.iter().map(|p| p.confidence).sum::<f64>()
            / predictions.len() as f64;
        Ok(ClassifyResponse {
            predictions,
            confidence,
            embeddings: None,
        })
    }
}

fn build_prompt(seq: &SequenceRecord) -> String {
    let prefix: String = seq.sequence.chars().take(PROMPT_SEQUENCE_PREFIX).collect();
    format!(
        "You are a bioinformatics expert. Identify the most likely species for \
         this DNA sequence.\n\nDNA sequence (first {}bp): {}\nSequence length: {} \
         base pairs\n\nRespond ONLY in valid JSON, for example:\n{{\"species\": \
         \"Homo sapiens\", \"confidence\": 0.85, \"kingdom\": \"Animalia\", \
         \"phylum\": \"Chordata\", \"class\": \"Mammalia\"}}",
        PROMPT_SEQUENCE_PREFIX,
        prefix,
        seq.len()
    )
}

/// JSON-first parse of a model reply, falling back to scanning prose for a
/// binomial name.
pub fn parse_species_response(text: &str) -> Prediction {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if let Some(species) = value.get("species").and_then(Value::as_str) {
            let confidence = value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_JSON_CONFIDENCE)
                .clamp(0.0, 1.0);
            let taxonomy = Taxonomy {
                kingdom: value
                    .get("kingdom")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                phylum: value
                    .get("phylum")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                class: value
                    .get("class")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            let mut prediction = Prediction::new(species, confidence);
            prediction.taxonomy = Some(taxonomy);
            return prediction;
        }
    }

    match extract_species_from_text(text) {
        Some(species) => Prediction::new(species, TEXT_FALLBACK_CONFIDENCE),
        None => Prediction::new("Unknown species", TEXT_FALLBACK_CONFIDENCE),
    }
}

/// Find the first "Genus species" binomial in free text: a capitalized
/// lowercase-tailed word followed by an all-lowercase word.
pub fn extract_species_from_text(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for pair in words.windows(2) {
        let genus = pair[0].trim_matches(|c: char| !c.is_ascii_alphabetic());
        let species = pair[1].trim_matches(|c: char| !c.is_ascii_alphabetic());
        if is_genus_word(genus) && is_species_word(species) {
            return Some(format!("{} {}", genus, species));
        }
    }
    None
}

fn is_genus_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    let tail: Vec<char> = chars.collect();
    tail.len() >= 2 && tail.iter().all(|c| c.is_ascii_lowercase())
}

fn is_species_word(word: &str) -> bool {
    word.len() >= 3 && word.chars().all(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_response() {
        let text = r#"{"species": "Penaeus indicus", "confidence": 0.92,
            "kingdom": "Animalia", "phylum": "Arthropoda", "class": "Malacostraca"}"#;
        let p = parse_species_response(text);
        assert_eq!(p.label, "Penaeus indicus");
        assert_eq!(p.confidence, 0.92);
        let tax = p.taxonomy.unwrap();
        assert_eq!(tax.kingdom.as_deref(), Some("Animalia"));
        assert_eq!(tax.class.as_deref(), Some("Malacostraca"));
    }

    #[test]
    fn test_parse_json_missing_confidence_uses_default() {
        let p = parse_species_response(r#"{"species": "Gadus morhua"}"#);
        assert_eq!(p.label, "Gadus morhua");
        assert_eq!(p.confidence, DEFAULT_JSON_CONFIDENCE);
    }

    #[test]
    fn test_parse_json_clamps_confidence() {
        let p = parse_species_response(r#"{"species": "Gadus morhua", "confidence": 3.0}"#);
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn test_text_fallback_extracts_binomial() {
        let text =
            "Based on the GC content this sequence is most likely Rastrelliger kanagurta, \
             a coastal mackerel.";
        let p = parse_species_response(text);
        assert_eq!(p.label, "Rastrelliger kanagurta");
        assert_eq!(p.confidence, TEXT_FALLBACK_CONFIDENCE);
        assert!(p.taxonomy.is_none());
    }

    #[test]
    fn test_text_fallback_strips_punctuation() {
        let species = extract_species_from_text("identified as: Melanocetus johnsonii.");
        assert_eq!(species.as_deref(), Some("Melanocetus johnsonii"));
    }

    #[test]
    fn test_unparseable_text_yields_unknown() {
        let p = parse_species_response("UNKNOWN ##");
        assert_eq!(p.label, "Unknown species");
    }

    #[test]
    fn test_acronyms_are_not_binomials() {
        // "DNA sequence" must not look like "Genus species".
        assert_eq!(extract_species_from_text("The DNA sequence was short"), None);
    }

    #[test]
    fn test_prompt_truncates_long_sequences() {
        let seq = SequenceRecord::new("s1", "A".repeat(5000));
        let prompt = build_prompt(&seq);
        assert!(prompt.contains(&"A".repeat(PROMPT_SEQUENCE_PREFIX)));
        assert!(!prompt.contains(&"A".repeat(PROMPT_SEQUENCE_PREFIX + 1)));
        assert!(prompt.contains("5000 base pairs"));
    }
}
