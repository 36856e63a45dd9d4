use jiff::Timestamp;

use crate::error::{Error, Result};

/// Compact age of a timestamp relative to `now`, e.g. `3d4h` or `12m5s`.
pub fn age_between(ts: &Timestamp, now: &Timestamp) -> String {
    let Ok(span) = now.since(*ts) else {
        return "unknown".to_string();
    };

    let total_secs = span.get_seconds().max(0);
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if days > 365 {
        format!("{}y{}d", days / 365, days % 365)
    } else if days > 7 {
        format!("{}d", days)
    } else if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m{}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Builds the image reference for a tag change.
///
/// A `new_tag` that already looks like a full reference (contains `/`, `:`
/// or `@`) is used as is. Otherwise the tag or digest of `current_image` is
/// replaced, leaving a registry port such as `host:5000/app` intact.
pub fn retag_image(current_image: &str, new_tag: &str) -> Result<String> {
    let new_tag = new_tag.trim();
    if new_tag.is_empty() {
        return Err(Error::InvalidInput("image tag must not be empty".into()));
    }
    if new_tag.contains(['/', ':', '@']) {
        return Ok(new_tag.to_string());
    }

    let current_image = current_image.trim();
    if current_image.is_empty() {
        return Err(Error::InvalidInput(
            "current image is required to change only the tag".into(),
        ));
    }

    let without_digest = current_image
        .split_once('@')
        .map_or(current_image, |(repo, _)| repo);
    let name_start = without_digest.rfind('/').map_or(0, |i| i + 1);
    let repository = match without_digest[name_start..].rfind(':') {
        Some(i) => &without_digest[..name_start + i],
        None => without_digest,
    };

    Ok(format!("{}:{}", repository, new_tag))
}
