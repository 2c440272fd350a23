use chrono::{DateTime, Utc};

use crate::WharfError;

/// Per-run metadata handed to every task. Lives for exactly one graph
/// execution; path templates are rendered against its fields so that
/// time-partitioned object keys resolve per run (and backfills render
/// against the run's logical date, not the wall clock).
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub execution_date: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, execution_date: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            execution_date,
        }
    }

    /// A context for an ad-hoc run dated now.
    pub fn now(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Utc::now())
    }

    /// Substitutes `{name}` placeholders in `template` with context fields.
    /// Supported names: `run_id`, `year`, `month`, `day`, `hour`, `ds`
    /// (YYYY-MM-DD), `ts` (RFC 3339). Any other name, or a dangling `{`,
    /// is an `UnresolvedPlaceholder` error.
    pub fn render(&self, template: &str) -> Result<String, WharfError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                out.push(c);
                continue;
            }
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(ch) => key.push(ch),
                    None => return Err(WharfError::UnresolvedPlaceholder(key)),
                }
            }
            match self.lookup(&key) {
                Some(value) => out.push_str(&value),
                None => return Err(WharfError::UnresolvedPlaceholder(key)),
            }
        }

        Ok(out)
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let date = &self.execution_date;
        match key {
            "run_id" => Some(self.run_id.clone()),
            "year" => Some(date.format("%Y").to_string()),
            "month" => Some(date.format("%m").to_string()),
            "day" => Some(date.format("%d").to_string()),
            "hour" => Some(date.format("%H").to_string()),
            "ds" => Some(date.format("%Y-%m-%d").to_string()),
            "ts" => Some(date.to_rfc3339()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> RunContext {
        RunContext::new(
            "run-7",
            Utc.with_ymd_and_hms(2018, 11, 3, 5, 0, 0).unwrap(),
        )
    }

    #[test]
    fn renders_date_partitioned_key() {
        let rendered = ctx()
            .render("log_data/{year}/{month}/{day}-events.json")
            .unwrap();
        assert_eq!(rendered, "log_data/2018/11/03-events.json");
    }

    #[test]
    fn renders_ds_and_run_id() {
        let rendered = ctx().render("runs/{run_id}/{ds}").unwrap();
        assert_eq!(rendered, "runs/run-7/2018-11-03");
    }

    #[test]
    fn plain_template_passes_through() {
        assert_eq!(ctx().render("song_data/A/A/A").unwrap(), "song_data/A/A/A");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let err = ctx().render("data/{epoch}/x").unwrap_err();
        assert!(matches!(err, WharfError::UnresolvedPlaceholder(key) if key == "epoch"));
    }

    #[test]
    fn dangling_brace_is_an_error() {
        assert!(matches!(
            ctx().render("data/{year").unwrap_err(),
            WharfError::UnresolvedPlaceholder(_)
        ));
    }
}
