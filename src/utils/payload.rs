//! Text form of detection boxes as stored by the alert API:
//! `[(x0, y0, x1, y1, conf), ...]`. Square brackets are accepted for the
//! inner groups as well, which is what JSON encoders produce.

use super::bbox::Bbox;
use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;

static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[]([^\(\)\[\]]*)[\)\]]").expect("valid bbox group regex"));

/// Parse a payload into boxes. Every group must hold exactly five numbers.
pub fn parse_bbox_payload(payload: &str) -> Result<Vec<Bbox>, Error> {
    let trimmed = payload.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::Parse(format!("bbox payload must be a list: {}", trimmed)))?
        .trim();

    if inner.is_empty() {
        return Ok(Vec::new());
    }

    let mut boxes = Vec::new();
    let mut last_end = 0;
    for caps in GROUP_RE.captures_iter(inner) {
        let whole = caps.get(0).expect("group 0 always matches");
        check_separator(&inner[last_end..whole.start()], boxes.is_empty())?;
        last_end = whole.end();

        let values = caps[1]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| Error::Parse(format!("not a number in bbox payload: {}", v)))
            })
            .collect::<Result<Vec<f64>, Error>>()?;

        match values.as_slice() {
            [x0, y0, x1, y1, conf] => boxes.push(Bbox::new(*x0, *y0, *x1, *y1, *conf)),
            other => {
                return Err(Error::Parse(format!(
                    "bbox needs 5 values, found {}",
                    other.len()
                )))
            }
        }
    }

    if boxes.is_empty() {
        return Err(Error::Parse(format!("no box found in payload: {}", trimmed)));
    }
    let tail = inner[last_end..].trim();
    if !(tail.is_empty() || tail == ",") {
        return Err(Error::Parse(format!("unexpected trailing text: {}", tail)));
    }

    Ok(boxes)
}

fn check_separator(between: &str, first: bool) -> Result<(), Error> {
    let between = between.trim();
    let ok = if first { between.is_empty() } else { between == "," };
    if ok {
        Ok(())
    } else {
        Err(Error::Parse(format!(
            "unexpected text between boxes: {:?}",
            between
        )))
    }
}

/// Render boxes in the payload format
pub fn format_bbox_payload(boxes: &[Bbox]) -> String {
    let groups: Vec<String> = boxes
        .iter()
        .map(|b| {
            format!(
                "({},{},{},{},{})",
                b.x_min, b.y_min, b.x_max, b.y_max, b.confidence
            )
        })
        .collect();
    format!("[{}]", groups.join(","))
}
