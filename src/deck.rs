//! Working set of reports and the generate-then-replace flow.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::model::{Citation, Report};
use crate::parser::parse_generated;
use crate::synthesis::{
    build_prompt, generate_with_retry, ContentSynthesizer, GenerationConfig, Generated,
    ServiceError,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("unknown report id: {0}")]
    UnknownReport(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// User-visible message for a generation that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub report_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Updated {
        report_id: String,
        sections: usize,
        sources: Vec<Citation>,
    },
    Failed(Notice),
}

/// Parsed reports plus the current selection. Built once from parser output
/// and handed to whoever renders or generates.
#[derive(Debug, Clone)]
pub struct ReportDeck {
    reports: Vec<Report>,
    selected: Option<String>,
}

impl ReportDeck {
    pub fn new(reports: Vec<Report>) -> Self {
        let selected = reports.first().map(|r| r.id.clone());
        Self { reports, selected }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn get(&self, id: &str) -> Option<&Report> {
        self.reports.iter().find(|r| r.id == id)
    }

    pub fn select(&mut self, id: &str) -> Result<(), DeckError> {
        if self.get(id).is_none() {
            return Err(DeckError::UnknownReport(id.to_string()));
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn selected(&self) -> Option<&Report> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// Re-parse generated text and swap it in as the report's sections.
    /// Blank text is an `EmptyResponse` and leaves the report untouched.
    pub fn apply_generated(&mut self, id: &str, text: &str) -> Result<usize, DeckError> {
        let report = self
            .reports
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DeckError::UnknownReport(id.to_string()))?;

        let sections = parse_generated(text);
        if sections.is_empty() {
            return Err(ServiceError::EmptyResponse.into());
        }
        let count = sections.len();
        report.replace_sections(sections);
        Ok(count)
    }

    /// Generate content for one report. A service failure is reported as a
    /// [`Notice`]; the report keeps its previous sections.
    pub async fn generate<S: ContentSynthesizer>(
        &mut self,
        id: &str,
        synth: &S,
        config: &GenerationConfig,
    ) -> Result<GenerationOutcome, DeckError> {
        let report = self
            .get(id)
            .ok_or_else(|| DeckError::UnknownReport(id.to_string()))?;
        let prompt = build_prompt(report);

        info!("Generating content for {}", id);
        let result = generate_with_retry(synth, &prompt, config).await;
        Ok(self.settle(id, result))
    }

    /// Generate every report, at most `concurrency` requests in flight and
    /// one per report. Outcomes come back in deck order. `concurrency` is
    /// clamped to `1..=reports`.
    pub async fn generate_all<S: ContentSynthesizer + 'static>(
        &mut self,
        synth: Arc<S>,
        config: &GenerationConfig,
        concurrency: usize,
    ) -> Vec<GenerationOutcome> {
        let total = self.reports.len();
        let concurrency = concurrency.clamp(1, total.max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        // Workers send results, this loop applies them
        let (tx, mut rx) = mpsc::channel::<(String, Result<Generated, ServiceError>)>(concurrency.saturating_mul(2));

        for report in &self.reports {
            let id = report.id.clone();
            let prompt = build_prompt(report);
            let synth = Arc::clone(&synth);
            let sem = Arc::clone(&semaphore);
            let config = config.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let result = generate_with_retry(synth.as_ref(), &prompt, &config).await;
                let _ = tx.send((id, result)).await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some((id, result)) = rx.recv().await {
            outcomes.push(self.settle(&id, result));
            pb.inc(1);
        }
        pb.finish_and_clear();

        let updated = outcomes
            .iter()
            .filter(|o| matches!(o, GenerationOutcome::Updated { .. }))
            .count();
        info!("Generated {} reports ({} ok, {} failed)", total, updated, outcomes.len() - updated);

        outcomes.sort_by_key(|o| self.position(outcome_id(o)));
        outcomes
    }

    fn settle(&mut self, id: &str, result: Result<Generated, ServiceError>) -> GenerationOutcome {
        let applied = result
            .map_err(DeckError::from)
            .and_then(|g| self.apply_generated(id, &g.text).map(|n| (n, g.sources)));

        match applied {
            Ok((sections, sources)) => {
                info!("Updated {} with {} generated sections", id, sections);
                GenerationOutcome::Updated {
                    report_id: id.to_string(),
                    sections,
                    sources,
                }
            }
            Err(e) => {
                warn!("Generation failed for {}: {} (keeping previous sections)", id, e);
                GenerationOutcome::Failed(Notice {
                    report_id: id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn position(&self, id: &str) -> usize {
        self.reports
            .iter()
            .position(|r| r.id == id)
            .unwrap_or(usize::MAX)
    }
}

fn outcome_id(outcome: &GenerationOutcome) -> &str {
    match outcome {
        GenerationOutcome::Updated { report_id, .. } => report_id,
        GenerationOutcome::Failed(notice) => &notice.report_id,
    }
}

// ── Tests ──
