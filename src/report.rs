use strum_macros::{Display, EnumString};

/// Terminal state of one processed input or sub-segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum StatusKind {
    /// Already under the ceiling; copied byte-for-byte.
    Copied,
    /// Converged in the primary tier at original resolution.
    Optimized,
    /// Needed the floor-audio restart at original resolution.
    RescuedPrimary,
    /// Needed the downscale tier.
    RescuedDownscaled,
    /// Needed the single constant-quality pass.
    RescuedLastResort,
    /// Split into segments; both children succeeded.
    Split,
    /// Every tier's retry ceiling exhausted; designed terminal state.
    TooLarge,
    /// The encoder process itself failed; not retried.
    EncodeFailed,
    /// Lossless cut produced an empty segment or a child failed.
    SplitFailed,
    /// Missing, empty, or unprobable input.
    Unreadable,
    /// Byte-for-byte copy of an already-fitting input failed to write.
    CopyFailed,
}

impl StatusKind {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            StatusKind::Copied
                | StatusKind::Optimized
                | StatusKind::RescuedPrimary
                | StatusKind::RescuedDownscaled
                | StatusKind::RescuedLastResort
                | StatusKind::Split
        )
    }
}

/// One row of the session summary. Appended once per terminal leaf of the
/// recursion tree and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub name: String,
    pub original_bytes: u64,
    pub final_bytes: Option<u64>,
    pub status: StatusKind,
}

impl SessionRecord {
    /// None when the sizes are not comparable (failed encodes, zero-size
    /// originals); rendered as "-" rather than a string sentinel.
    pub fn reduction_percent(&self) -> Option<f64> {
        let final_bytes = self.final_bytes?;
        if self.original_bytes == 0 {
            return None;
        }
        Some((1.0 - final_bytes as f64 / self.original_bytes as f64) * 100.0)
    }
}

/// Append-only, process-wide session report owned by the top-level driver
/// and passed into each recursive call by mutable reference.
#[derive(Debug, Default)]
pub struct SessionReport {
    records: Vec<SessionRecord>,
}

impl SessionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: SessionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn any_failures(&self) -> bool {
        self.records.iter().any(|r| !r.status.is_success())
    }

    /// Tabular summary: name, original size, final size, reduction, status.
    pub fn render(&self) -> String {
        let mut name_width = "file".len();
        for record in &self.records {
            name_width = name_width.max(record.name.len());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{:name_width$}  {:>10}  {:>10}  {:>9}  status\n",
            "file",
            "original",
            "final",
            "reduced",
            name_width = name_width
        ));
        for record in &self.records {
            let final_col = match record.final_bytes {
                Some(bytes) => format!("{:.2} MB", crate::model::bytes_to_mb(bytes)),
                None => "-".to_string(),
            };
            let reduced_col = match record.reduction_percent() {
                Some(pct) => format!("{:.1}%", pct),
                None => "-".to_string(),
            };
            out.push_str(&format!(
                "{:name_width$}  {:>10}  {:>10}  {:>9}  {}\n",
                record.name,
                format!("{:.2} MB", crate::model::bytes_to_mb(record.original_bytes)),
                final_col,
                reduced_col,
                record.status,
                name_width = name_width
            ));
        }
        out
    }
}
