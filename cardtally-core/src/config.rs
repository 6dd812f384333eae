//! Configuration for input sheet layout and title conventions

use anyhow::Result;
use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default)]
    pub titles: TitleConfig,
}

impl TallyConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TallyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration values
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.columns.entries() {
            if value.trim().is_empty() {
                anyhow::bail!("Configuration error: column '{}' must not be empty", key);
            }
        }

        if self.titles.summary_title.trim().is_empty() {
            anyhow::bail!("Configuration error: summary_title must not be empty");
        }
        if self.titles.delimiter.is_empty() {
            anyhow::bail!("Configuration error: title delimiter must not be empty");
        }
        if self.titles.unknown_operator.trim().is_empty() {
            anyhow::bail!("Configuration error: unknown_operator must not be empty");
        }

        validate_date_format(&self.titles.date_format, self.titles.year)
    }
}

/// Header names of the columns every progress sheet carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub serial: String,
    pub name: String,
    pub phone: String,
    pub succeeded: String,
    pub failed: String,
}

impl ColumnConfig {
    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("serial", &self.serial),
            ("name", &self.name),
            ("phone", &self.phone),
            ("succeeded", &self.succeeded),
            ("failed", &self.failed),
        ]
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            serial: "序号".to_string(),
            name: "姓名".to_string(),
            phone: "电话".to_string(),
            succeeded: "是否领卡".to_string(),
            failed: "是否失败".to_string(),
        }
    }
}

/// Sheet title conventions (`DD.MM-location[-operator]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Reserved name of the generated summary sheet
    pub summary_title: String,
    /// Year combined with the day/month fragment of each title
    pub year: i32,
    pub delimiter: String,
    /// chrono format of the date fragment, without the year
    pub date_format: String,
    /// Operator label used when a title carries none
    pub unknown_operator: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            summary_title: "汇总".to_string(),
            year: 2022,
            delimiter: "-".to_string(),
            date_format: "%d.%m".to_string(),
            unknown_operator: "未知".to_string(),
        }
    }
}

fn validate_date_format(format: &str, year: i32) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("Configuration error: invalid date_format '{}'", format);
    }

    // The fragment must carry both day and month for titles to be orderable
    let probe = NaiveDate::from_ymd_opt(year, 11, 23)
        .ok_or_else(|| anyhow::anyhow!("Configuration error: invalid year {}", year))?;
    let rendered = format!("{}.{}", year, probe.format(format));
    match NaiveDate::parse_from_str(&rendered, &format!("%Y.{}", format)) {
        Ok(parsed) if parsed == probe => Ok(()),
        _ => anyhow::bail!(
            "Configuration error: date_format '{}' must identify both day and month",
            format
        ),
    }
}
