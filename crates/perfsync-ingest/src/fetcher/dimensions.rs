//! Grouping dimensions understood by the reporting API

use perfsync_common::PerfsyncError;
use serde::{Deserialize, Serialize};

/// A single API grouping axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingDimension {
    Campaign,
    SubId,
    Country,
    Zone,
    Isp,
}

impl GroupingDimension {
    /// Value of the `groupBy` query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            GroupingDimension::Campaign => "campaign",
            GroupingDimension::SubId => "subid",
            GroupingDimension::Country => "country",
            GroupingDimension::Zone => "zone",
            GroupingDimension::Isp => "isp",
        }
    }
}

/// The report types a sync pass can request. Each maps to a fixed set of
/// one or two grouping dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReportDimensions {
    CampaignSubId,
    Country,
    SubIdZone,
    Isp,
    Zone,
}

impl ReportDimensions {
    pub const ALL: [ReportDimensions; 5] = [
        ReportDimensions::CampaignSubId,
        ReportDimensions::Country,
        ReportDimensions::SubIdZone,
        ReportDimensions::Isp,
        ReportDimensions::Zone,
    ];

    pub fn grouping(&self) -> &'static [GroupingDimension] {
        match self {
            ReportDimensions::CampaignSubId => &[GroupingDimension::Campaign, GroupingDimension::SubId],
            ReportDimensions::Country => &[GroupingDimension::Country],
            ReportDimensions::SubIdZone => &[GroupingDimension::SubId, GroupingDimension::Zone],
            ReportDimensions::Isp => &[GroupingDimension::Isp],
            ReportDimensions::Zone => &[GroupingDimension::Zone],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportDimensions::CampaignSubId => "campaign+subid",
            ReportDimensions::Country => "country",
            ReportDimensions::SubIdZone => "subid+zone",
            ReportDimensions::Isp => "isp",
            ReportDimensions::Zone => "zone",
        }
    }
}

impl std::fmt::Display for ReportDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportDimensions {
    type Err = PerfsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept `campaign+subid`, `campaign_subid` and `campaign-subid`
        let normalized = s.trim().to_lowercase().replace(['_', '-'], "+");
        ReportDimensions::ALL
            .into_iter()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| {
                PerfsyncError::parse(format!(
                    "Unknown report type '{}'. Expected one of: campaign+subid, country, subid+zone, isp, zone",
                    s
                ))
            })
    }
}
