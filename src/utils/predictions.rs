use super::bbox::{xywh_to_xyxy, Bbox};
use log::warn;
use std::path::Path;

/// Columns of a prediction row: class, cx, cy, w, h, confidence
const PREDICTION_COLUMNS: usize = 6;

/// Read a YOLO-style prediction file into corner-pair boxes.
///
/// Each row is `class cx cy w h confidence`, whitespace separated. A missing
/// or unreadable file, non-numeric content or rows of unequal length give an
/// empty list; the problem is only logged.
pub fn read_pred_file(path: &Path) -> Vec<Bbox> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("File not found: {} ({})", path.display(), e);
            return Vec::new();
        }
    };

    match parse_predictions(&content) {
        Ok(boxes) => boxes,
        Err(reason) => {
            warn!("Invalid content in file: {} ({})", path.display(), reason);
            Vec::new()
        }
    }
}

/// Parse the text of a prediction file
pub fn parse_predictions(content: &str) -> Result<Vec<Bbox>, String> {
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values = line
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| format!("line {}: not a number: {}", line_no + 1, token))
            })
            .collect::<Result<Vec<f64>, String>>()?;

        if let Some(first) = rows.first() {
            if first.len() != values.len() {
                return Err(format!(
                    "line {}: expected {} columns, found {}",
                    line_no + 1,
                    first.len(),
                    values.len()
                ));
            }
        } else if values.len() < PREDICTION_COLUMNS {
            return Err(format!(
                "line {}: expected at least {} columns, found {}",
                line_no + 1,
                PREDICTION_COLUMNS,
                values.len()
            ));
        }

        rows.push(values);
    }

    let xywh: Vec<[f64; 4]> = rows
        .iter()
        .map(|row| [row[1], row[2], row[3], row[4]])
        .collect();

    Ok(xywh_to_xyxy(&xywh)
        .into_iter()
        .zip(rows.iter())
        .map(|(xyxy, row)| Bbox::from_xyxy(xyxy, row[5]))
        .collect())
}
