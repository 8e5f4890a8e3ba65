use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Progress,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressDetails {
    pub processed: f64,
    pub total: f64,
    pub unit: &'static str,
}

impl ProgressDetails {
    /// Byte counts rendered as megabytes with one decimal.
    pub fn megabytes(processed: u64, total: u64) -> Self {
        let total = to_megabytes(total);
        Self {
            processed: to_megabytes(processed).min(total),
            total,
            unit: "MB",
        }
    }
}

fn to_megabytes(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0
}

/// A launch notification pushed to the frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub kind: ReportKind,
    text: String,
    pub details: Option<ProgressDetails>,
}

impl Report {
    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            kind: ReportKind::Progress,
            text: text.into(),
            details: None,
        }
    }

    pub fn progress_with(text: impl Into<String>, details: ProgressDetails) -> Self {
        Self {
            details: Some(details),
            ..Self::progress(text)
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ReportKind::Error,
            text: text.into(),
            details: None,
        }
    }

    pub fn text(&self) -> String {
        match self.kind {
            ReportKind::Progress => format!("{}...", self.text),
            ReportKind::Error => self.text.clone(),
        }
    }
}

pub type ReportHook<'a> = &'a dyn Fn(Report);

pub(crate) fn emit(hook: Option<ReportHook<'_>>, report: Report) {
    if let Some(hook) = hook {
        hook(report);
    }
}
