//! Request and response bodies at the service boundary.
//!
//! Optional request fields fall back to the configured series defaults.

use crate::domain::SymbolSpec;
use crate::error::ServiceError;
use crate::refresh::RefreshReport;
use crate::service::MarketView;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Candlestick,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRequest {
    pub symbol: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub chart_type: Option<ChartType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRatioRequest {
    pub symbol1: String,
    pub symbol2: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub asset: String,
}

impl AssetRequest {
    pub fn spec(&self) -> Result<SymbolSpec, ServiceError> {
        Ok(SymbolSpec::parse(&self.asset)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotResponse {
    pub chart_type: ChartType,
    pub view: MarketView,
}

/// Reply to add/remove: whether anything changed, and the list afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetResponse {
    pub asset: SymbolSpec,
    pub changed: bool,
    pub assets: Vec<SymbolSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: RefreshReport,
}

impl From<RefreshReport> for RefreshResponse {
    fn from(report: RefreshReport) -> Self {
        Self {
            success: report.all_succeeded(),
            report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&ServiceError> for ErrorBody {
    fn from(e: &ServiceError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
