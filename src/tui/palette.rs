//! Colors for each theme

use crate::prefs::Theme;
use ratatui::style::Color;

/// Semantic color roles read by the drawing code
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub bg: Color,
    pub fg: Color,
    pub dim: Color,
    pub accent: Color,
    pub user: Color,
    pub assistant: Color,
    pub tool: Color,
    pub pending: Color,
    pub error: Color,
    pub code: Color,
    pub heading: Color,
    pub border: Color,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                bg: Color::Rgb(0x17, 0x17, 0x17),
                fg: Color::Rgb(0xe5, 0xe5, 0xe5),
                dim: Color::Rgb(0x73, 0x73, 0x73),
                accent: Color::Rgb(0xf4, 0x81, 0x20),
                user: Color::Rgb(0xf4, 0x81, 0x20),
                assistant: Color::Rgb(0xe5, 0xe5, 0xe5),
                tool: Color::Rgb(0x60, 0xa5, 0xfa),
                pending: Color::Rgb(0xfa, 0xcc, 0x15),
                error: Color::Rgb(0xf8, 0x71, 0x71),
                code: Color::Rgb(0xa3, 0xe6, 0x35),
                heading: Color::Rgb(0xfd, 0xba, 0x74),
                border: Color::Rgb(0x40, 0x40, 0x40),
            },
            Theme::Light => Self {
                bg: Color::Rgb(0xfa, 0xfa, 0xfa),
                fg: Color::Rgb(0x17, 0x17, 0x17),
                dim: Color::Rgb(0x73, 0x73, 0x73),
                accent: Color::Rgb(0xc2, 0x41, 0x0c),
                user: Color::Rgb(0xc2, 0x41, 0x0c),
                assistant: Color::Rgb(0x17, 0x17, 0x17),
                tool: Color::Rgb(0x1d, 0x4e, 0xd8),
                pending: Color::Rgb(0xa1, 0x62, 0x07),
                error: Color::Rgb(0xb9, 0x1c, 0x1c),
                code: Color::Rgb(0x15, 0x80, 0x3d),
                heading: Color::Rgb(0x9a, 0x34, 0x12),
                border: Color::Rgb(0xd4, 0xd4, 0xd4),
            },
        }
    }
}
