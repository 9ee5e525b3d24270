//! Terminal styling utilities
//!
//! One palette for all CLI output:
//! - Semantic colors for status (green/yellow/red)
//! - Cyan for headers and technical terms
//! - Bold for important identifiers
//! - Dim for secondary information

use crossterm::style::Stylize;

use crate::hub::LinkState;

/// Extension trait for consistent Sound Brick styling
///
/// # Examples
///
/// ```
/// use crossterm::style::Stylize;
/// use soundbrick::style::BrickStyle;
///
/// println!("{}", "Device".header());
/// println!("{}", "Connected".success());
/// println!("{}", "192.168.1.40".technical());
/// ```
pub trait BrickStyle: Stylize {
    /// Section headers (cyan bold)
    fn header(self) -> <<Self as Stylize>::Styled as Stylize>::Styled
    where
        Self: Sized,
        <Self as Stylize>::Styled: Stylize,
    {
        self.cyan().bold()
    }

    /// Positive states: "Up", "Running", accepted requests
    fn success(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.green()
    }

    /// Problems: "Down", "Not running", rejected requests
    fn error(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.red()
    }

    /// Transitional or partial states: "Connecting", "Muted"
    fn warning(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.yellow()
    }

    /// Addresses, paths, setting keys
    fn technical(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.cyan()
    }
}

impl<T: Stylize> BrickStyle for T {}

/// Link state as a colored word
#[must_use]
pub fn link_label(link: LinkState) -> String {
    match link {
        LinkState::Up { peer } => format!("Up ({peer})").success().to_string(),
        LinkState::Connecting => "Connecting".warning().to_string(),
        LinkState::Down => "Down".error().to_string(),
    }
}
