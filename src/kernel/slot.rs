use std::path::Path;

use serde::Serialize;

use super::error::PipelineError;
use super::sample::{ObservationId, Sample};

/// Static description of one observation point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSpec {
    pub index: ObservationId,
    pub source_file: String,
    pub source_line: u32,
    /// `None` when the point is collected unconditionally.
    pub condition: Option<String>,
    pub variable_expr: String,
    pub primary_expr: String,
    pub source_line_text: String,
}

impl SlotSpec {
    /// Parses an observation-point file.
    ///
    /// Each non-empty line is `file:line:condition:variable[:primary]`. Its
    /// index is its 0-based line position in the file; blank and `#` lines
    /// define no slot but still occupy a position.
    pub fn parse_points(text: &str) -> Result<Vec<SlotSpec>, PipelineError> {
        let mut specs = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 || fields.len() > 5 {
                return Err(PipelineError::Config(format!(
                    "observation point on line {} must have 4 or 5 ':'-separated fields, got {}",
                    lineno + 1,
                    fields.len()
                )));
            }

            let source_line: u32 = fields[1].trim().parse().map_err(|_| {
                PipelineError::Config(format!(
                    "observation point on line {} has invalid line number {:?}",
                    lineno + 1,
                    fields[1]
                ))
            })?;

            let condition = match fields[2].trim() {
                "" | "True" => None,
                expr => Some(expr.to_string()),
            };
            let variable_expr = fields[3].trim().to_string();
            let primary_expr = fields
                .get(4)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| variable_expr.clone());

            let source_file = fields[0].trim().to_string();
            let source_line_text = read_source_line(Path::new(&source_file), source_line);

            specs.push(SlotSpec {
                index: lineno as ObservationId,
                source_file,
                source_line,
                condition,
                variable_expr,
                primary_expr,
                source_line_text,
            });
        }
        Ok(specs)
    }

    pub fn load_points(path: &Path) -> Result<Vec<SlotSpec>, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("reading observation points {}: {}", path.display(), e))
        })?;
        Self::parse_points(&text)
    }
}

/// 1-based line lookup. Missing files and out-of-range lines yield "".
fn read_source_line(path: &Path, line: u32) -> String {
    if line == 0 {
        return String::new();
    }
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.lines().nth(line as usize - 1).map(|l| l.trim().to_string()))
        .unwrap_or_default()
}

/// Per-index accumulator of retained samples between flushes.
#[derive(Debug, Clone)]
pub struct ObservationSlot {
    spec: SlotSpec,
    retained: Vec<Sample>,
}

impl ObservationSlot {
    pub fn new(spec: SlotSpec) -> Self {
        Self {
            spec,
            retained: Vec::new(),
        }
    }

    pub fn spec(&self) -> &SlotSpec {
        &self.spec
    }

    /// Retention rule: a sample whose primary key equals the last retained
    /// one replaces it, anything else appends.
    pub fn retain(&mut self, sample: Sample) {
        if let Some(last) = self.retained.last_mut() {
            if last.primary_key == sample.primary_key {
                *last = sample;
                return;
            }
        }
        self.retained.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.retained
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Hands out the retained samples and leaves the slot empty but alive.
    pub fn take(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.retained)
    }
}
