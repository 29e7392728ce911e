use anyhow::Result;
use serde::Serialize;

use linecount::LiveEvent;

/// Print `value` as one JSON document on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Print a plain list, one entry per line, or as a JSON array.
pub fn print_list(title: &str, items: &[String], json: bool) -> Result<()> {
    if json {
        return print_json(items);
    }
    if items.is_empty() {
        println!("(no {title})");
        return Ok(());
    }
    for item in items {
        println!("{item}");
    }
    Ok(())
}

/// One-line summary of a live event.
pub fn describe_event(event: &LiveEvent) -> String {
    match event {
        LiveEvent::ObjectCounted {
            total_count,
            detail,
        } => {
            let field = |key: &str| detail.as_ref().and_then(|d| d.get(key));
            let label = field("object_label")
                .and_then(|v| v.as_str())
                .unwrap_or("object");
            match field("object_id") {
                Some(id) if !id.is_null() => format!("🔢 {total_count:>5}  {label} #{id} crossed"),
                _ => format!("🔢 {total_count:>5}  {label} crossed"),
            }
        }
        LiveEvent::GeneralUpdate {
            total_count,
            progress,
        } => match progress.and_then(|p| p.fraction().map(|f| (p, f))) {
            Some((p, f)) => format!(
                "📊 {total_count:>5}  frame {}/{} ({:.0}%)",
                p.processed_frames,
                p.total_frames,
                f * 100.0
            ),
            None => format!("📊 {total_count:>5}"),
        },
        LiveEvent::VideoEnded {
            total_count,
            output_path,
        } => match output_path {
            Some(path) => format!("🏁 {total_count:>5}  done: {path}"),
            None => format!("🏁 {total_count:>5}  done"),
        },
    }
}

pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linecount::live::Progress;
    use serde_json::json;

    #[test]
    fn describes_counted_objects() {
        let event = LiveEvent::ObjectCounted {
            total_count: 7,
            detail: Some(json!({"object_id": 12, "object_label": "car"})),
        };
        assert_eq!(describe_event(&event), "🔢     7  car #12 crossed");

        let bare = LiveEvent::ObjectCounted {
            total_count: 8,
            detail: None,
        };
        assert_eq!(describe_event(&bare), "🔢     8  object crossed");
    }

    #[test]
    fn describes_progress() {
        let event = LiveEvent::GeneralUpdate {
            total_count: 3,
            progress: Some(Progress {
                processed_frames: 25,
                total_frames: 100,
            }),
        };
        assert_eq!(describe_event(&event), "📊     3  frame 25/100 (25%)");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("äääääääääää", 6), "äää...");
    }
}
