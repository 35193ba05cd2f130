//! Latest result page

use axum::{extract::State, response::Html};
use cae_common::ColorResult;

use crate::AppState;

const COLOR_DISPLAY_HTML: &str = include_str!("../../ui/color_display.html");

/// Placeholder in the page template replaced by the result block
const RESULT_SLOT: &str = "<!-- RESULT -->";

/// GET /color_display
///
/// Shows the most recent result, or an empty state before the first one
pub async fn color_display(State(state): State<AppState>) -> Html<String> {
    let latest = state.coordinator.fetch_latest().await;
    Html(render(latest.as_ref()))
}

fn render(latest: Option<&ColorResult>) -> String {
    let block = match latest {
        Some(result) => format!(
            r#"<div class="swatch" style="background-color: {hex}"></div>
    <dl>
      <dt>Name</dt><dd id="color-name">{name}</dd>
      <dt>Hex</dt><dd id="color-hex">{hex}</dd>
      <dt>RGB</dt><dd id="color-rgb">({r}, {g}, {b})</dd>
    </dl>"#,
            hex = escape_html(&result.hex),
            name = escape_html(&result.name),
            r = result.rgb[0],
            g = result.rgb[1],
            b = result.rgb[2],
        ),
        None => r#"<p class="empty">No color analysed yet.</p>"#.to_string(),
    };
    COLOR_DISPLAY_HTML.replace(RESULT_SLOT, &block)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_empty_state() {
        let html = render(None);
        assert!(html.contains("No color analysed yet."));
        assert!(!html.contains(RESULT_SLOT));
    }

    #[test]
    fn test_render_result() {
        let result = ColorResult {
            id: "r1".to_string(),
            image_id: "i1".to_string(),
            rgb: [255, 0, 0],
            hex: "#ff0000".to_string(),
            name: "red".to_string(),
            created_at: Utc::now(),
        };
        let html = render(Some(&result));
        assert!(html.contains("background-color: #ff0000"));
        assert!(html.contains(">red<"));
        assert!(html.contains("(255, 0, 0)"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
