use std::collections::HashMap;

use super::model::Rect;

/// Splits an hOCR `title` attribute into its `key value` properties.
///
/// Entries are separated by `;` and trimmed; the first space separates the
/// key from the value. A bare key maps to an empty value and the last
/// duplicate wins. Never fails: anything unrecognisable is dropped.
pub fn parse_title(value: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(' ') {
            Some((key, rest)) => {
                map.insert(key.to_string(), rest.trim_start().to_string());
            }
            None => {
                map.insert(entry.to_string(), String::new());
            }
        }
    }
    map
}

/// Reads the `bbox` property of a title as four non-negative integers.
pub fn title_bbox(title: &str) -> Result<Rect, String> {
    let props = parse_title(title);
    let value = props
        .get("bbox")
        .ok_or_else(|| "title has no bbox entry".to_string())?;
    parse_bbox(value)
}

fn parse_bbox(value: &str) -> Result<Rect, String> {
    let tokens = value.split_whitespace().take(4).collect::<Vec<_>>();
    if tokens.len() != 4 {
        return Err(format!("bbox needs four integers, got '{}'", value));
    }
    let mut nums = [0u32; 4];
    for (slot, token) in nums.iter_mut().zip(&tokens) {
        *slot = token
            .parse::<u32>()
            .map_err(|_| format!("bbox value '{}' is not a non-negative integer", token))?;
    }
    let [x1, y1, x2, y2] = nums;
    if x2 < x1 || y2 < y1 {
        return Err(format!("bbox '{}' is inverted", value));
    }
    Ok(Rect::new(x1, y1, x2, y2))
}
