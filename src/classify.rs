//! Taxonomy-grounded classification.
//!
//! A classification request moves through fixed steps: fetch the taxonomy
//! (unknown namespace is fatal), assemble evidence ("no similar incidents"
//! is a valid state folded into the prompt), build the prompt, generate,
//! parse. Two prompt modes exist: full-taxonomy asks for every field in one
//! call; single-attribute asks for exactly one field per call and merges the
//! results afterward. Large taxonomies overflow reliable single-call output,
//! so decomposition trades extra calls for per-field precision.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::evidence::{render_evidence, EvidenceAssembler};
use crate::generation::TextGenerator;
use crate::models::{ClassificationAttribute, TaxonomyDefinition};
use crate::resolver::EntityResolver;

/// Parsed generation output for one classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: GeneratedClassification,
    #[serde(default)]
    pub explanation: Option<String>,
    /// The model is asked for a score between 0 and 1 but sometimes returns
    /// it as a string; kept as raw JSON.
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedClassification {
    pub namespace: String,
    #[serde(default)]
    pub attributes: Vec<ClassificationAttribute>,
}

/// Full classification outcome, with the prompt and raw generation output
/// retained for diagnostics.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub prompt: String,
    pub raw: String,
    pub result: ClassificationResult,
}

/// One merged entry from decomposed per-attribute classification.
#[derive(Debug, Clone)]
pub struct AttributeOutcome {
    pub short_name: String,
    pub prompt: String,
    pub result: ClassificationResult,
}

pub struct Classifier {
    assembler: EvidenceAssembler,
    resolver: EntityResolver,
    generator: Arc<dyn TextGenerator>,
    /// Ceiling on simultaneous generation calls in decomposed mode.
    concurrency: usize,
}

impl Classifier {
    pub fn new(
        assembler: EvidenceAssembler,
        resolver: EntityResolver,
        generator: Arc<dyn TextGenerator>,
        concurrency: usize,
    ) -> Self {
        Self {
            assembler,
            resolver,
            generator,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the full-taxonomy prompt for a text. Exposed separately so the
    /// prompt can be inspected without spending a generation call.
    pub async fn build_prompt(&self, text: &str, taxonomy: &str) -> Result<String> {
        validate_request(text, taxonomy)?;
        let taxonomy_data = self.resolver.fetch_taxonomy_details(taxonomy).await?;
        let evidence = self
            .assembler
            .similar_incidents_classifications(text, taxonomy)
            .await?;
        Ok(full_taxonomy_prompt(
            text,
            &taxonomy_data,
            &render_evidence(&evidence),
        ))
    }

    /// Classify a text against a full taxonomy in one generation call.
    pub async fn classify(&self, text: &str, taxonomy: &str) -> Result<ClassificationOutcome> {
        let prompt = self.build_prompt(text, taxonomy).await?;
        let raw = self.generator.generate(&prompt).await?;
        let result = parse_classification(&raw)?;
        Ok(ClassificationOutcome { prompt, raw, result })
    }

    /// Decomposed classification: one generation call per requested
    /// attribute, fanned out under the concurrency ceiling. One attribute's
    /// failure does not abort the others; failed attributes are logged and
    /// absent from the result.
    pub async fn classify_attributes(
        &self,
        text: &str,
        taxonomy: &str,
        attribute_names: &[String],
    ) -> Result<Vec<AttributeOutcome>> {
        validate_request(text, taxonomy)?;
        if attribute_names.is_empty() {
            bail!("Please provide at least one attribute short_name");
        }

        let taxonomy_data = self.resolver.fetch_taxonomy_details(taxonomy).await?;
        let evidence = self
            .assembler
            .similar_incidents_classifications(text, taxonomy)
            .await?;
        let evidence_rendered = render_evidence(&evidence);

        let mut fields = Vec::new();
        for name in attribute_names {
            match taxonomy_data.field_list.iter().find(|f| &f.short_name == name) {
                Some(field) => fields.push(field.clone()),
                None => eprintln!(
                    "Warning: attribute '{}' not in taxonomy '{}', skipping",
                    name, taxonomy
                ),
            }
        }
        if fields.is_empty() {
            bail!("None of the requested attributes exist in taxonomy '{}'", taxonomy);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, String, String, Result<String>)> = JoinSet::new();

        for (position, field) in fields.iter().enumerate() {
            let prompt =
                single_attribute_prompt(text, &taxonomy_data, field, &evidence_rendered);
            let short_name = field.short_name.clone();
            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let raw = generator.generate(&prompt).await;
                (position, short_name, prompt, raw)
            });
        }

        let mut slots: Vec<Option<AttributeOutcome>> = vec![None; fields.len()];
        while let Some(joined) = tasks.join_next().await {
            let (position, short_name, prompt, raw) = joined?;
            match raw.and_then(|text| parse_classification(&text)) {
                Ok(result) => {
                    slots[position] = Some(AttributeOutcome {
                        short_name,
                        prompt,
                        result,
                    });
                }
                Err(err) => {
                    eprintln!("Warning: attribute '{}' failed: {:#}", short_name, err);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

fn validate_request(text: &str, taxonomy: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Please provide a valid text");
    }
    if taxonomy.trim().is_empty() {
        bail!("Please provide a valid taxonomy namespace");
    }
    Ok(())
}

/// Merge decomposed outcomes into one classification, taking the first
/// attribute of each per-attribute result in request order.
pub fn merge_attribute_outcomes(
    namespace: &str,
    outcomes: &[AttributeOutcome],
) -> GeneratedClassification {
    let attributes = outcomes
        .iter()
        .filter_map(|outcome| outcome.result.classification.attributes.first().cloned())
        .collect();
    GeneratedClassification {
        namespace: namespace.to_string(),
        attributes,
    }
}

pub fn full_taxonomy_prompt(
    text: &str,
    taxonomy_data: &TaxonomyDefinition,
    evidence_rendered: &str,
) -> String {
    let taxonomy = &taxonomy_data.namespace;
    let taxonomy_json = serde_json::to_string_pretty(taxonomy_data)
        .unwrap_or_else(|_| "{}".to_string());
    let required_fields = taxonomy_data.field_names().join(", ");

    format!(
        r#"You are an AI assistant that helps classify AI incidents according to a taxonomy.

Your task is to analyze the provided incident text and classify it according to the specified taxonomy.

Always require both the incident text and the taxonomy namespace to perform classification.

Here is the incident text to classify:
{text}

Here is the taxonomy namespace to use for classification:
{taxonomy}

Here is the taxonomy data:
{taxonomy_json}

Here are similar incidents and their classifications:
{evidence_rendered}

Based on the incident text and the taxonomy, provide a classification for this incident.

IMPORTANT: Your classification MUST include ALL of the following taxonomy attributes:
{required_fields}

For maximum accuracy and completeness:
1. Include EVERY single required field listed above in your response
2. Do not omit any attributes from the taxonomy field_list
3. Use the permitted_values from the taxonomy when provided
4. Review similar incidents to understand how each field is typically used

Return your response as a JSON object with the following structure:

{{
  "classification": {{
    "namespace": "{taxonomy}",
    "attributes": [
      {{"short_name": "attribute1", "value_json": "\"value1\""}},
      {{"short_name": "attribute2", "value_json": "\"value2\""}}
    ]
  }},
  "explanation": "A detailed explanation of your classification choices.",
  "confidence": "A confidence score between 0 and 1"
}}

DO NOT include any other text in your response, nor any other characters.
DO NOT start your response with ```json or ```
Ensure that each attribute in the field_list is included in your classification, even if you need to use a default or "unknown" value.
"#
    )
}

pub fn single_attribute_prompt(
    text: &str,
    taxonomy_data: &TaxonomyDefinition,
    field: &crate::models::TaxonomyField,
    evidence_rendered: &str,
) -> String {
    let taxonomy = &taxonomy_data.namespace;
    let field_json = serde_json::to_string_pretty(field).unwrap_or_else(|_| "{}".to_string());
    let short_name = &field.short_name;

    format!(
        r#"You are an AI assistant that helps classify AI incidents according to a taxonomy.

Your task is to analyze the provided incident text and classify exactly ONE attribute of the specified taxonomy.

Here is the incident text to classify:
{text}

Here is the taxonomy namespace to use for classification:
{taxonomy}

Here is the single taxonomy attribute to classify:
{field_json}

Here are similar incidents and their classifications:
{evidence_rendered}

Based on the incident text, provide a value for the "{short_name}" attribute only.

Use the permitted_values from the attribute definition when provided, and review similar incidents to understand how this field is typically used.

Return your response as a JSON object with the following structure:

{{
  "classification": {{
    "namespace": "{taxonomy}",
    "attributes": [
      {{"short_name": "{short_name}", "value_json": "\"value\""}}
    ]
  }},
  "explanation": "A detailed explanation of your classification choice.",
  "confidence": "A confidence score between 0 and 1"
}}

DO NOT include any other text in your response, nor any other characters.
DO NOT start your response with ```json or ```
"#
    )
}

/// Strip an optional Markdown code fence. Models add one despite the prompt
/// telling them not to.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parse a generation output into a classification result. A parse failure
/// carries the raw text for diagnostics; it is never coerced to an empty
/// result.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult> {
    let stripped = strip_code_fence(raw);
    serde_json::from_str(stripped)
        .with_context(|| format!("Failed to parse classification output: {}", raw))
}
