//! LLM collaborator for convention extraction.
//!
//! Defines the [`ConventionModel`] seam the pipeline calls through, and
//! an Ollama-backed implementation speaking the `/api/chat` endpoint.
//! The pipeline treats every call as an opaque unit of work to be
//! wrapped by the rate limiter.

use crate::models::{FileAnalysis, FileRecord, RuleCandidate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// The model-facing seam: file content in, structured rule candidates
/// out. Implemented by the Ollama client in production and by mocks in
/// pipeline tests.
#[async_trait]
pub trait ConventionModel: Send + Sync {
    /// Check that the model endpoint is reachable.
    async fn check_availability(&self) -> Result<()>;

    /// Extract rule candidates from one file.
    async fn extract_rules(&self, file: &FileRecord) -> Result<FileAnalysis>;

    /// Audit a merged rule against the originals it was merged from,
    /// returning a refined version.
    async fn audit_cluster(
        &self,
        cluster_key: &str,
        merged: &RuleCandidate,
        originals: &[RuleCandidate],
    ) -> Result<RuleCandidate>;
}

/// Connection settings for the Ollama-backed model.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// Message in the chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Ollama-backed [`ConventionModel`].
pub struct OllamaModel {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        info!(
            "Initializing model client: {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Send one prompt and return the raw response text.
    async fn send_prompt(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Request timed out after {}s",
                        self.config.timeout_seconds
                    )
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl ConventionModel for OllamaModel {
    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.ollama_url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                anyhow::anyhow!(
                    "Cannot connect to Ollama at {}. Is Ollama running?",
                    self.config.ollama_url
                )
            } else {
                anyhow::anyhow!("Failed to reach Ollama: {}", e)
            }
        })?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Ollama returned {} for availability check",
                response.status()
            ));
        }

        Ok(())
    }

    async fn extract_rules(&self, file: &FileRecord) -> Result<FileAnalysis> {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Extract the coding conventions demonstrated by this {} file.\n\n",
            file.extension
        ));
        prompt.push_str("For each convention, output one JSON object on its own line:\n");
        prompt.push_str(
            r#"{"slug": "kebab-case-name", "description": "One sentence.", "scope_glob": "**/*.ext", "bullets": ["guidance"], "evidence_lines": [12, 40]}"#,
        );
        prompt.push_str("\n\nOnly output JSON lines, no other text.\n\n");
        prompt.push_str(&format!(
            "### FILE: {}\n```\n{}\n```\n",
            file.relative_path, file.content
        ));

        let response = self.send_prompt(EXTRACT_SYSTEM_PROMPT, &prompt).await?;
        let rules = parse_rule_lines(&response);
        debug!(
            "Extracted {} rule candidates from {}",
            rules.len(),
            file.relative_path
        );

        Ok(FileAnalysis {
            file: file.relative_path.clone(),
            rules,
        })
    }

    async fn audit_cluster(
        &self,
        cluster_key: &str,
        merged: &RuleCandidate,
        originals: &[RuleCandidate],
    ) -> Result<RuleCandidate> {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "The following rules about \"{}\" were merged into one:\n\n",
            cluster_key
        ));
        prompt.push_str("Merged rule:\n");
        prompt.push_str(&serde_json::to_string_pretty(merged)?);
        prompt.push_str("\n\nOriginal rules:\n");
        prompt.push_str(&serde_json::to_string_pretty(originals)?);
        prompt.push_str(
            "\n\nImprove the merged rule: fix contradictions, tighten wording, drop \
             redundant bullets. Output the improved rule as a single JSON object \
             with the same fields, and nothing else.",
        );

        let response = self.send_prompt(AUDIT_SYSTEM_PROMPT, &prompt).await?;
        parse_rule_lines(&response)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Audit response contained no rule for {}", cluster_key))
    }
}

/// Parse rule candidates from a JSON-lines model response. Lines that
/// are not valid JSON objects are skipped.
pub fn parse_rule_lines(response: &str) -> Vec<RuleCandidate> {
    let mut rules = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('{') {
            continue;
        }

        if let Ok(json) = serde_json::from_str::<Value>(line) {
            if let Some(rule) = value_to_rule(&json) {
                rules.push(rule);
            }
        }
    }

    rules
}

fn value_to_rule(json: &Value) -> Option<RuleCandidate> {
    Some(RuleCandidate {
        slug: json["slug"].as_str()?.to_string(),
        description: json["description"].as_str().unwrap_or("").to_string(),
        scope_glob: json["scope_glob"].as_str().unwrap_or("**/*").to_string(),
        bullets: json["bullets"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| b.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        evidence_lines: json["evidence_lines"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|n| n.as_u64()).collect())
            .unwrap_or_default(),
    })
}

const EXTRACT_SYSTEM_PROMPT: &str = r#"You are an expert code reviewer who documents the coding conventions a codebase already follows.
Extract conventions demonstrated by the provided file, not generic best practices.
Output each convention as a JSON object on its own line.
Only output valid JSON, no explanations or markdown."#;

const AUDIT_SYSTEM_PROMPT: &str = r#"You are an expert editor of coding-convention rules.
You refine merged rules so they are consistent, specific, and non-redundant.
Only output a single valid JSON object, no explanations or markdown."#;
