use anyhow::Result;

use serde_json::Value;

use crate::data_types::AnalysisOutput;
use crate::web::config::Config;

/// PCA projections come from the external stats service; the heavy numerics
/// are never computed in this process.
pub struct PcaPlots {
    stats_service_url: Option<String>,
    client: reqwest::Client,
}

impl PcaPlots {
    pub fn new(config: &Config) -> PcaPlots {
        PcaPlots {
            stats_service_url: config.server.stats_service_url.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a 2-D or 3-D PCA projection of the analysis' samples, grouped
    /// by the first condition token, as JSON from the stats service.
    pub async fn pca_projection(&self, analysis: &AnalysisOutput, dimensions: u8)
        -> Result<Value>
    {
        let Some(ref stats_service_url) = self.stats_service_url
        else {
            anyhow::bail!("no stats service configured");
        };

        let plot_url = format!("{}/pca/{}", stats_service_url, dimensions);
        let params = [("source", analysis.file_path.as_str())];

        let response =
            self.client.get(plot_url).query(&params).send().await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
