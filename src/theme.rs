use ratatui::style::{Color, Modifier, Style};

use crate::styles::StyleTag;

/// Theme configuration for the editor and preview panes
#[derive(Clone, Debug)]
pub struct Theme {
    /// Background color for both panes
    pub background: Color,

    /// Foreground (text) color for the status bar
    pub status_bar_fg: Color,

    /// Background color for the status bar
    pub status_bar_bg: Color,

    /// Color for the current file name in the status bar
    pub filename_color: Color,

    /// Color for the pane borders
    pub border_color: Color,

    /// Color for headings of every level
    pub heading_color: Color,

    /// Foreground color for inline code
    pub code_fg: Color,

    /// Foreground color for code blocks
    pub code_block_fg: Color,

    /// Foreground color for block quotes
    pub blockquote_fg: Color,

    /// Color for synthesized bullets and ordinals
    pub list_marker_color: Color,

    /// Color for inline math
    pub math_inline_fg: Color,

    /// Color for display math
    pub math_display_fg: Color,

    /// Foreground color for math that failed to render
    pub math_error_fg: Color,

    /// Background color for math that failed to render
    pub math_error_bg: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color::Reset,
            status_bar_fg: Color::White,
            status_bar_bg: Color::Blue,
            filename_color: Color::LightYellow,
            border_color: Color::DarkGray,
            heading_color: Color::LightCyan,
            code_fg: Color::LightGreen,
            code_block_fg: Color::Green,
            blockquote_fg: Color::Gray,
            list_marker_color: Color::LightYellow,
            math_inline_fg: Color::LightMagenta,
            math_display_fg: Color::Magenta,
            math_error_fg: Color::White,
            math_error_bg: Color::Red,
        }
    }
}

impl Theme {
    /// Create a new theme with default colors
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the style for the status bar
    pub fn status_bar_style(&self) -> Style {
        Style::default()
            .fg(self.status_bar_fg)
            .bg(self.status_bar_bg)
    }

    /// Get the style for the filename in the status bar
    pub fn filename_style(&self) -> Style {
        Style::default().fg(self.filename_color)
    }

    pub fn border_style(&self) -> Style {
        Style::default().fg(self.border_color)
    }

    /// Get the style layered onto text covered by a span of `tag`.
    /// List items only style their marker, see [`Theme::list_marker_style`].
    pub fn tag_style(&self, tag: StyleTag) -> Style {
        match tag {
            StyleTag::Heading(1) => Style::default()
                .fg(self.heading_color)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            StyleTag::Heading(_) => Style::default()
                .fg(self.heading_color)
                .add_modifier(Modifier::BOLD),
            StyleTag::Paragraph | StyleTag::ListItem(_) => Style::default(),
            StyleTag::Code => Style::default().fg(self.code_fg),
            StyleTag::CodeBlock => Style::default()
                .fg(self.code_block_fg)
                .add_modifier(Modifier::DIM),
            StyleTag::Emphasis => Style::default().add_modifier(Modifier::ITALIC),
            StyleTag::Strong => Style::default().add_modifier(Modifier::BOLD),
            StyleTag::Blockquote => Style::default()
                .fg(self.blockquote_fg)
                .add_modifier(Modifier::ITALIC),
        }
    }

    pub fn list_marker_style(&self) -> Style {
        Style::default()
            .fg(self.list_marker_color)
            .add_modifier(Modifier::BOLD)
    }

    /// Get the style for a rendered math expression
    pub fn math_style(&self, display: bool) -> Style {
        if display {
            Style::default()
                .fg(self.math_display_fg)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(self.math_inline_fg)
        }
    }

    /// Get the style for the literal fallback of unrenderable math
    pub fn math_error_style(&self) -> Style {
        Style::default()
            .fg(self.math_error_fg)
            .bg(self.math_error_bg)
    }
}
