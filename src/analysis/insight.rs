//! Narrative analysis of a turbidity sample batch.

use crate::analysis::gemini::TextService;
use crate::analysis::predictor::{LifespanPredictor, ProcessParameters};
use crate::error::{Result, SystemError};
use std::sync::Arc;
use tracing::{error, info};

/// Returned in place of an analysis when the text service is unusable.
pub const FALLBACK_ANALYSIS: &str = "Failed to get analysis from Gemini API.";

/// Summary statistics embedded in the prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub count: usize,
    pub mean: f64,
    pub first: f64,
    pub last: f64,
}

impl BatchSummary {
    /// Summarize a non-empty batch.
    pub fn from_samples(samples: &[f64]) -> Result<Self> {
        let (Some(&first), Some(&last)) = (samples.first(), samples.last()) else {
            return Err(SystemError::internal_error(
                "cannot summarize an empty sample batch",
            ));
        };

        Ok(Self {
            count: samples.len(),
            mean: samples.iter().sum::<f64>() / samples.len() as f64,
            first,
            last,
        })
    }

    /// Rough direction of travel between the first and last sample.
    pub fn trend(&self) -> &'static str {
        // Higher turbidity means dirtier water.
        let delta = self.last - self.first;
        if delta.abs() < 0.01 {
            "stable"
        } else if delta < 0.0 {
            "improving"
        } else {
            "degrading"
        }
    }
}

/// Build the analysis prompt.
pub fn build_prompt(
    samples: &[f64],
    summary: &BatchSummary,
    params: &ProcessParameters,
    predicted_life_hours: Option<f64>,
) -> String {
    let (prediction_line, filter_task) = match predicted_life_hours {
        Some(hours) => (
            format!("Predicted remaining filter life from our regression model: {hours:.2} hours\n"),
            "Explain what the predicted filter life means and whether the filter is wearing out",
        ),
        None => (
            String::new(),
            "Predict if the filter is wearing out or has already worn out",
        ),
    };

    format!(
        "You are a smart water quality expert who is part of an algae-based nanoparticle \
         filtration system. Analyze this turbidity data ({count} readings, collected every second):\n\
         \n\
         {samples:?}\n\
         \n\
         Average turbidity: {mean:.2} NTU\n\
         Trend from first to last reading: {first:.2} -> {last:.2} NTU ({trend})\n\
         Operating conditions: TDS {tds:.1} ppm, pH {ph:.2}, equipment depth {depth:.2} m, \
         flow rate {flow_rate:.2} L/min\n\
         {prediction_line}\
         \n\
         Your tasks:\n\
         - Mention average turbidity and interpret it clearly\n\
         - Identify whether water quality is improving or degrading\n\
         - {filter_task}\n\
         - Give a conversational, detailed explanation like you're speaking to a common man \
         about a water quality demo\n\
         - Add preventive suggestions and impress them with your analysis\n",
        count = summary.count,
        mean = summary.mean,
        first = summary.first,
        last = summary.last,
        trend = summary.trend(),
        tds = params.tds,
        ph = params.ph,
        depth = params.depth,
        flow_rate = params.flow_rate,
    )
}

/// Produces prose analysis for sample batches.
///
/// With a predictor attached, the batch mean is run through the lifespan model
/// and the estimate is included in the prompt.
pub struct InsightGenerator {
    service: Arc<dyn TextService>,
    predictor: Option<Arc<LifespanPredictor>>,
    params: ProcessParameters,
}

impl InsightGenerator {
    pub fn new(
        service: Arc<dyn TextService>,
        predictor: Option<Arc<LifespanPredictor>>,
        params: ProcessParameters,
    ) -> Self {
        Self {
            service,
            predictor,
            params,
        }
    }

    /// Whether predictions are folded into the prompt.
    pub fn is_enriched(&self) -> bool {
        self.predictor.is_some()
    }

    /// Generate an analysis for the batch.
    ///
    /// Failures of the text service yield [`FALLBACK_ANALYSIS`]; any other
    /// error is returned.
    pub async fn generate(&self, samples: &[f64]) -> Result<String> {
        let summary = BatchSummary::from_samples(samples)?;

        let predicted = match &self.predictor {
            Some(predictor) => Some(predictor.predict(summary.mean)?),
            None => None,
        };
        let params = self
            .predictor
            .as_ref()
            .map_or(&self.params, |p| p.params());

        let prompt = build_prompt(samples, &summary, params, predicted);

        match self.service.complete(&prompt).await {
            Ok(text) => {
                info!("Received {} byte analysis", text.len());
                Ok(text)
            }
            Err(e) if e.is_upstream() => {
                error!("Gemini API error: {}", e);
                Ok(FALLBACK_ANALYSIS.to_string())
            }
            Err(e) => Err(e),
        }
    }
}
