//! Sheet title parsing (`DD.MM-location[-operator]`) and date ordering

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::TitleConfig;
use crate::error::TallyError;

/// Structured key parsed from a sheet title, used for ordering and grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleKey {
    pub date: NaiveDate,
    pub location: String,
    pub operator: String,
}

/// Parses sheet titles according to a [`TitleConfig`]
#[derive(Debug, Clone)]
pub struct TitleParser {
    config: TitleConfig,
}

impl Default for TitleParser {
    fn default() -> Self {
        Self::new(TitleConfig::default())
    }
}

impl TitleParser {
    pub fn new(config: TitleConfig) -> Self {
        Self { config }
    }

    pub fn summary_title(&self) -> &str {
        &self.config.summary_title
    }

    pub fn is_summary(&self, title: &str) -> bool {
        title == self.config.summary_title
    }

    /// Parse `date-location[-operator]` into a [`TitleKey`]
    pub fn parse(&self, title: &str) -> Result<TitleKey, TallyError> {
        let invalid = |reason: String| TallyError::InvalidTitle {
            title: title.to_string(),
            reason,
        };

        let parts: Vec<&str> = title.split(self.config.delimiter.as_str()).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid(format!(
                "expected 2 or 3 parts separated by '{}', found {}",
                self.config.delimiter,
                parts.len()
            )));
        }

        let fragment = parts[0].trim();
        let date = NaiveDate::parse_from_str(
            &format!("{}.{}", self.config.year, fragment),
            &format!("%Y.{}", self.config.date_format),
        )
        .map_err(|e| invalid(format!("'{}' is not a calendar date ({})", fragment, e)))?;

        let location = parts[1].trim();
        if location.is_empty() {
            return Err(invalid("location is empty".to_string()));
        }

        let operator = match parts.get(2).map(|s| s.trim()) {
            Some(op) if !op.is_empty() => op.to_string(),
            _ => self.config.unknown_operator.clone(),
        };

        Ok(TitleKey {
            date,
            location: location.to_string(),
            operator,
        })
    }

    /// Date a title sorts by; the summary sheet sorts before every dated sheet
    pub fn sort_key(&self, title: &str) -> Result<NaiveDate, TallyError> {
        if self.is_summary(title) {
            return Ok(NaiveDate::default());
        }
        self.parse(title).map(|key| key.date)
    }

    /// Stable ascending sort of titles by date
    pub fn sort_titles<'a>(&self, titles: &[&'a str]) -> Result<Vec<&'a str>, TallyError> {
        let mut keyed = titles
            .iter()
            .map(|title| self.sort_key(title).map(|date| (date, *title)))
            .collect::<Result<Vec<_>, _>>()?;
        keyed.sort_by_key(|(date, _)| *date);
        Ok(keyed.into_iter().map(|(_, title)| title).collect())
    }
}
