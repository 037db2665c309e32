pub mod headless;

pub use headless::{ChromeBrowser, ChromeTabFactory};
