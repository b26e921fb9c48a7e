//! SVG badge rendering.
//!
//! Layout is a fixed table keyed by the status text's character count. The
//! label segment (`cover.run`) is always 61 units wide; the status segment
//! takes the rest of the total width. Text coordinates are in the
//! `scale(.1)` space, so they are ten times the pixel position.

use std::fmt::Write as _;

use crate::result::{Outcome, Resolution};

/// Left-hand label text.
pub const LABEL: &str = "cover.run";

/// Width of the label segment in pixels.
pub const LABEL_WIDTH: u32 = 61;

/// Named badge colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeColor {
    /// `#d6604a`.
    Red,
    /// `#96c40f`.
    Green,
    /// `#d6ae22`.
    Yellow,
    /// `#a4a61d`.
    YellowGreen,
    /// Any other name; `#9a9a9a`.
    Grey,
}

impl BadgeColor {
    /// Maps a color name, case-insensitively. Unknown names are grey.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "red" => Self::Red,
            "green" => Self::Green,
            "yellow" => Self::Yellow,
            "yellowgreen" => Self::YellowGreen,
            _ => Self::Grey,
        }
    }

    /// Returns the fill color.
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Red => "#d6604a",
            Self::Green => "#96c40f",
            Self::Yellow => "#d6ae22",
            Self::YellowGreen => "#a4a61d",
            Self::Grey => "#9a9a9a",
        }
    }
}

/// Badge shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BadgeStyle {
    /// Rounded corners with a gradient overlay.
    Curved,
    /// Square corners, no gradient.
    #[default]
    Flat,
}

impl BadgeStyle {
    /// Maps a style name. Unrecognized names fall back to flat.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "curved" | "curve" | "flat-curve" => Self::Curved,
            _ => Self::Flat,
        }
    }
}

/// Computed badge geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    /// Right-hand status text.
    pub status: String,
    /// Horizontal anchor of the status text (scaled by 10).
    pub status_x: u32,
    /// Total width in pixels.
    pub width: u32,
    /// Status segment fill.
    pub color: BadgeColor,
}

impl Badge {
    /// Lays out a badge for `status`.
    #[must_use]
    pub fn layout(color: BadgeColor, status: &str) -> Self {
        let len = u32::try_from(status.chars().count()).unwrap_or(u32::MAX / 16);
        let (status_x, width) = match len {
            1 => (725, 78),
            2 => (745, 90),
            3 => (775, 96),
            4 => (815, 104),
            5 => (835, 108),
            6 => (865, 114),
            7..=9 => (895, 120),
            _ => {
                let status_width = len * 8;
                (685 + status_width + 160, LABEL_WIDTH + status_width + 32)
            }
        };
        Self {
            status: status.to_string(),
            status_x,
            width,
            color,
        }
    }

    /// Width of the status segment in pixels.
    #[must_use]
    pub fn status_width(&self) -> u32 {
        self.width - LABEL_WIDTH
    }

    fn status_text_length(&self) -> u32 {
        self.status_width().saturating_sub(10) * 10
    }

    /// Serializes the badge as SVG.
    #[must_use]
    pub fn to_svg(&self, style: BadgeStyle) -> String {
        let width = self.width;
        let status_width = self.status_width();
        let fill = self.color.hex();
        let x = self.status_x;
        let text_len = self.status_text_length();
        let status = escape_xml(&self.status);

        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{width}" height="20">"#
        );
        match style {
            BadgeStyle::Curved => {
                svg.push_str(r##"<linearGradient id="b" x2="0" y2="100%"><stop offset="0" stop-color="#bbb" stop-opacity=".1"/><stop offset="1" stop-opacity=".1"/></linearGradient>"##);
                let _ = write!(
                    svg,
                    r##"<clipPath id="a"><rect width="{width}" height="20" rx="3" fill="#fff"/></clipPath><g clip-path="url(#a)"><path fill="#555" d="M0 0h{LABEL_WIDTH}v20H0z"/><path fill="{fill}" d="M{LABEL_WIDTH} 0h{status_width}v20H{LABEL_WIDTH}z"/><path fill="url(#b)" d="M0 0h{width}v20H0z"/></g>"##
                );
            }
            BadgeStyle::Flat => {
                let _ = write!(
                    svg,
                    r##"<g shape-rendering="crispEdges"><path fill="#555" d="M0 0h{LABEL_WIDTH}v20H0z"/><path fill="{fill}" d="M{LABEL_WIDTH} 0h{status_width}v20H{LABEL_WIDTH}z"/></g>"##
                );
            }
        }

        svg.push_str(r##"<g fill="#fff" text-anchor="middle" font-family="DejaVu Sans,Verdana,Geneva,sans-serif" font-size="110">"##);
        if style == BadgeStyle::Curved {
            let _ = write!(
                svg,
                r##"<text x="315" y="150" fill="#010101" fill-opacity=".3" transform="scale(.1)" textLength="510">{LABEL}</text>"##
            );
        }
        let _ = write!(
            svg,
            r#"<text x="315" y="140" transform="scale(.1)" textLength="510">{LABEL}</text>"#
        );
        if style == BadgeStyle::Curved {
            let _ = write!(
                svg,
                r##"<text x="{x}" y="150" fill="#010101" fill-opacity=".3" transform="scale(.1)" textLength="{text_len}">{status}</text>"##
            );
        }
        let _ = write!(
            svg,
            r#"<text x="{x}" y="140" transform="scale(.1)" textLength="{text_len}">{status}</text></g></svg>"#
        );
        svg
    }
}

/// Renders a badge. Pure and deterministic.
#[must_use]
pub fn render(color: &str, style: &str, status: &str) -> String {
    Badge::layout(BadgeColor::from_name(color), status).to_svg(BadgeStyle::from_name(style))
}

/// Chooses the color and status text for a resolution.
///
/// Pending jobs get `queued`/`testing`; anything whose text is not a
/// percentage renders as an error.
#[must_use]
pub fn badge_for(resolution: &Resolution) -> (BadgeColor, String) {
    match resolution.outcome {
        // "lightgrey" has no entry in the palette, so it renders grey
        Outcome::Queued => return (BadgeColor::Grey, "queued".to_string()),
        Outcome::InProgress => return (BadgeColor::YellowGreen, "testing".to_string()),
        _ => {}
    }

    let Ok(percent) = resolution
        .result
        .coverage_text
        .replace('%', "")
        .trim()
        .parse::<f64>()
    else {
        return (BadgeColor::Red, "error".to_string());
    };

    let color = if percent >= 70.0 {
        BadgeColor::Green
    } else if percent >= 45.0 {
        BadgeColor::Yellow
    } else {
        BadgeColor::Red
    };
    let rounded = (percent * 100.0).round() / 100.0;
    (color, format!("{rounded}%"))
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_key::CoverageJobKey;
    use crate::result::{CoverageResult, RunFailure};

    #[test]
    fn layout_table() {
        let cases = [
            ("", 845, 93),
            ("1", 725, 78),
            ("10", 745, 90),
            ("1%", 745, 90),
            ("50%", 775, 96),
            ("100%", 815, 104),
            ("error", 835, 108),
            ("82.35%", 865, 114),
            ("testing", 895, 120),
            ("100.00%", 895, 120),
            ("123456789", 895, 120),
            ("1234567890", 685 + 80 + 160, 61 + 80 + 32),
        ];
        for (status, x, width) in cases {
            let badge = Badge::layout(BadgeColor::Red, status);
            assert_eq!((badge.status_x, badge.width), (x, width), "{status}");
        }
    }

    #[test]
    fn empty_status_uses_general_formula() {
        let badge = Badge::layout(BadgeColor::Red, "");
        assert_eq!((badge.status_x, badge.width), (685 + 160, LABEL_WIDTH + 32));
        assert!(render("red", "flat", "").contains("width=\"93\""));
    }

    #[test]
    fn layout_counts_characters_not_bytes() {
        let badge = Badge::layout(BadgeColor::Red, "ñññ");
        assert_eq!(badge.width, 96);
    }

    #[test]
    fn render_is_deterministic() {
        assert_eq!(render("red", "flat", "100%"), render("red", "flat", "100%"));
    }

    #[test]
    fn flat_badge_geometry() {
        let svg = render("red", "flat", "100%");
        assert!(svg.contains(r#"width="104""#));
        assert!(svg.contains(r##"<path fill="#d6604a" d="M61 0h43v20H61z"/>"##));
        assert!(svg.contains(r#"<text x="815" y="140" transform="scale(.1)" textLength="330">100%</text>"#));
        assert!(!svg.contains("linearGradient"));
        assert!(svg.contains("crispEdges"));
    }

    #[test]
    fn curved_badge_has_gradient_and_shadow() {
        for style in ["curved", "curve", "flat-curve"] {
            let svg = render("green", style, "82.35%");
            assert!(svg.contains(r#"<linearGradient id="b""#), "{style}");
            assert!(svg.contains(r#"rx="3""#));
            assert!(svg.contains(r##"fill="#96c40f""##));
            assert!(svg.contains(r#"<text x="865" y="150""#));
            assert!(svg.contains(r##"<path fill="url(#b)" d="M0 0h114v20H0z"/>"##));
        }
    }

    #[test]
    fn unknown_names_fall_back() {
        assert_eq!(BadgeStyle::from_name("plastic"), BadgeStyle::Flat);
        assert_eq!(BadgeColor::from_name("lightgrey").hex(), "#9a9a9a");
        assert_eq!(BadgeColor::from_name("YellowGreen"), BadgeColor::YellowGreen);
    }

    #[test]
    fn status_text_is_escaped() {
        let svg = render("red", "flat", "<a&b>");
        assert!(svg.contains("&lt;a&amp;b&gt;"));
    }

    fn resolution(text: &str, outcome: Outcome) -> Resolution {
        let key = CoverageJobKey::new("github.com/acme/widget", "golang-1.10");
        let result = if outcome == Outcome::Ready {
            CoverageResult::measured(&key, text)
        } else {
            CoverageResult::failed(&key, text, Some(RunFailure::Runner))
        };
        Resolution::new(result, outcome)
    }

    #[test]
    fn badge_for_pending_jobs() {
        assert_eq!(
            badge_for(&resolution("", Outcome::Queued)),
            (BadgeColor::Grey, "queued".to_string())
        );
        assert_eq!(
            badge_for(&resolution("", Outcome::InProgress)),
            (BadgeColor::YellowGreen, "testing".to_string())
        );
    }

    #[test]
    fn badge_for_thresholds() {
        let cases = [
            ("100.00%", BadgeColor::Green, "100%"),
            ("70.00%", BadgeColor::Green, "70%"),
            ("82.35%", BadgeColor::Green, "82.35%"),
            ("69.99%", BadgeColor::Yellow, "69.99%"),
            ("45.00%", BadgeColor::Yellow, "45%"),
            ("44.50%", BadgeColor::Red, "44.5%"),
            ("0.00%", BadgeColor::Red, "0%"),
        ];
        for (text, color, status) in cases {
            assert_eq!(
                badge_for(&resolution(text, Outcome::Ready)),
                (color, status.to_string()),
                "{text}"
            );
        }
    }

    #[test]
    fn badge_for_error_text() {
        assert_eq!(
            badge_for(&resolution("Repository not found", Outcome::RepoNotFound)),
            (BadgeColor::Red, "error".to_string())
        );
    }
}
